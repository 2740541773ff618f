use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;

const MISSING_PID: u32 = 999_999_999;

fn json_stdout(args: &[&str]) -> Value {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level").arg("error").args(args);

    let output = cmd.output().expect("procscope should run");
    assert!(
        output.status.success(),
        "expected success, stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    serde_json::from_str(&stdout).expect("stdout should be valid json")
}

fn assert_envelope(parsed: &Value, schema_file: &str) {
    let schema_id = parsed["schema_id"].as_str().expect("schema_id");
    assert!(schema_id.ends_with(schema_file), "unexpected schema_id: {schema_id}");
    assert!(parsed["timestamp"].as_str().is_some());
    assert!(!parsed["platform"].as_str().unwrap_or_default().is_empty());
}

#[test]
fn show_self_json_has_envelope() {
    let me = std::process::id();
    let parsed = json_stdout(&["show", &me.to_string(), "--json"]);

    assert_envelope(&parsed, "process-detail.schema.json");
    assert_eq!(parsed["pid"].as_u64(), Some(me as u64));
    assert!(parsed["argv"].is_array());
    assert!(parsed.get("environ").is_none());
    assert!(parsed.get("raw").is_none());
}

#[test]
fn show_env_and_raw_add_sections() {
    let me = std::process::id().to_string();
    let parsed = json_stdout(&["show", &me, "--env", "--raw", "--json"]);

    assert!(parsed["environ"].is_object());
    assert!(parsed["raw"].is_object());
    assert!(parsed["raw"]["ppid"].is_number());
}

#[test]
fn show_text_lists_fields() {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level")
        .arg("error")
        .arg("show")
        .arg(std::process::id().to_string());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ppid"))
        .stdout(predicate::str::contains("footprint"))
        .stdout(predicate::str::contains("argv"));
}

#[test]
fn show_missing_pid_exits_with_not_found_code() {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level")
        .arg("error")
        .arg("show")
        .arg(MISSING_PID.to_string());

    cmd.assert()
        .code(5)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn show_pid_zero_is_invalid() {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level").arg("error").arg("show").arg("0");
    cmd.assert().code(1);
}

#[test]
fn children_json_includes_spawned_binary() {
    // The binary sees itself as a child of this test process
    let me = std::process::id();
    let parsed = json_stdout(&["children", &me.to_string(), "--json"]);

    assert_envelope(&parsed, "process-children.schema.json");
    assert_eq!(parsed["all"].as_bool(), Some(false));
    let children = parsed["children"].as_array().expect("children array");
    assert!(!children.is_empty(), "expected at least the procscope binary");
}

#[test]
fn children_all_lists_each_descendant_once() {
    let me = std::process::id().to_string();
    let parsed = json_stdout(&["children", &me, "--all", "--json"]);

    assert_eq!(parsed["all"].as_bool(), Some(true));
    let mut pids: Vec<u64> = parsed["children"]
        .as_array()
        .expect("children array")
        .iter()
        .filter_map(Value::as_u64)
        .collect();
    assert!(!pids.is_empty());
    let total = pids.len();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), total);
}

#[test]
fn children_missing_pid_fails() {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level")
        .arg("error")
        .arg("children")
        .arg(MISSING_PID.to_string());
    cmd.assert().code(5);
}

#[test]
fn tree_json_nests_spawned_binary_under_us() {
    let me = std::process::id();
    let parsed = json_stdout(&["tree", &me.to_string(), "--json"]);

    assert_envelope(&parsed, "process-tree.schema.json");
    let roots = parsed["roots"].as_array().expect("roots array");
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["pid"].as_u64(), Some(me as u64));
    assert!(!roots[0]["children"].as_array().expect("children").is_empty());
}

#[test]
fn tree_text_starts_at_requested_pid() {
    let me = std::process::id().to_string();
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level").arg("error").arg("tree").arg(&me);

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with(format!("{me} ")))
        .stdout(predicate::str::contains("└── "));
}

#[test]
fn find_by_full_path_reports_itself() {
    let parsed = json_stdout(&["find", env!("CARGO_BIN_EXE_procscope"), "--json"]);

    assert_envelope(&parsed, "process-match.schema.json");
    let matches = parsed["matches"].as_array().expect("matches array");
    assert!(
        !matches.is_empty(),
        "the running procscope binary should match its own path"
    );
}

#[test]
fn find_unknown_name_is_empty() {
    let parsed = json_stdout(&["find", "procscope-no-such-process-name", "--json"]);
    assert_eq!(parsed["matches"].as_array().map(Vec::len), Some(0));
}

#[test]
fn no_command_prints_platform() {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-level").arg("info");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Platform:"))
        .stderr(predicate::str::contains("procscope starting"))
        .stderr(predicate::str::contains("procscope finished"));
}

#[test]
fn json_logs_are_one_object_per_line() {
    let mut cmd = cargo_bin_cmd!("procscope");
    cmd.arg("--log-format").arg("json").arg("--log-level").arg("info");

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    let lines: Vec<Value> = stderr
        .lines()
        .map(|line| serde_json::from_str(line).expect("stderr line should be valid JSON"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["level"].as_str(), Some("INFO"));
    assert_eq!(lines[0]["fields"]["message"].as_str(), Some("procscope starting"));
    assert_eq!(lines[1]["fields"]["message"].as_str(), Some("procscope finished"));
}
