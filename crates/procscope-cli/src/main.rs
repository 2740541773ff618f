use std::collections::{BTreeMap, HashSet};

use clap::{Parser, Subcommand};
use procscope_core::schema::{
    PROCESS_CHILDREN_V1, PROCESS_DETAIL_V1, PROCESS_MATCH_V1, PROCESS_TREE_V1,
};
use procscope_core::{get_platform, is_supported, ProcscopeError, ProcscopeResult};
use procscope_proc::{process_by_pid, process_map, processes_by_name, Process, ProcessMap, Refresh};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Inspect processes: trees, name lookups, and per-process attributes.
#[derive(Parser, Debug)]
#[command(name = "procscope", version, about, long_about = None)]
struct Cli {
    /// The format for log output.
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// The minimum log level to display.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the process tree.
    ///
    /// Starts at PID when given, otherwise at every process whose parent
    /// is not visible.
    Tree(TreeArgs),

    /// Find processes by name.
    ///
    /// "/usr/bin/foo" matches the exact path, "foo" the command name, and
    /// "bin/foo" any path ending in "/bin/foo".
    Find(FindArgs),

    /// Show the attributes of one process.
    Show(ShowArgs),

    /// List the children of a process.
    Children(ChildrenArgs),
}

#[derive(Parser, Debug)]
struct TreeArgs {
    /// Root process ID (default: all roots).
    #[arg(value_name = "PID")]
    pid: Option<u32>,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct FindArgs {
    /// Process name, path, or path suffix.
    #[arg(value_name = "NAME")]
    name: String,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ShowArgs {
    /// Target process ID.
    #[arg(value_name = "PID")]
    pid: u32,

    /// Include the environment.
    #[arg(long)]
    env: bool,

    /// Include the platform control block as decoded from the kernel.
    #[arg(long)]
    raw: bool,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ChildrenArgs {
    /// Parent process ID.
    #[arg(value_name = "PID")]
    pid: u32,

    /// Include every descendant, not just direct children.
    #[arg(long)]
    all: bool,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    /// Human-readable text format.
    Text,
    /// Machine-readable JSON format.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive(cli.log_level.into());

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    info!(platform = get_platform(), "procscope starting");
    let Some(command) = cli.command else {
        println!("Platform: {}", get_platform());
        println!("Supported: {}", is_supported());
        info!("procscope finished");
        return;
    };

    match run_command(command) {
        Ok(()) => info!("procscope finished"),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(err.error_code());
        }
    }
}

fn run_command(command: Command) -> ProcscopeResult<()> {
    match command {
        Command::Tree(args) => run_tree(args),
        Command::Find(args) => run_find(args),
        Command::Show(args) => run_show(args),
        Command::Children(args) => run_children(args),
    }
}

// ============================================================================
// JSON envelope helpers
// ============================================================================

fn current_timestamp() -> String {
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    schema_id: &'static str,
    timestamp: String,
    platform: &'static str,
    #[serde(flatten)]
    body: T,
}

fn print_json<T: Serialize>(schema_id: &'static str, body: T) -> ProcscopeResult<()> {
    let envelope = Envelope {
        schema_id,
        timestamp: current_timestamp(),
        platform: get_platform(),
        body,
    };
    let text = serde_json::to_string_pretty(&envelope)
        .map_err(|e| ProcscopeError::internal(format!("serialize json: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Keep a value that could be read; log and drop one that couldn't.
fn readable<T>(pid: u32, field: &str, result: ProcscopeResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(pid, field, error = %err, "attribute unavailable");
            None
        }
    }
}

// ============================================================================
// tree
// ============================================================================

#[derive(Debug, Serialize)]
struct TreeNode {
    pid: u32,
    command: Option<String>,
    argv: Option<Vec<String>>,
    children: Vec<TreeNode>,
}

#[derive(Serialize)]
struct TreeJson {
    roots: Vec<TreeNode>,
}

fn run_tree(args: TreeArgs) -> ProcscopeResult<()> {
    let mut map = process_map()?;
    info!(processes = map.len(), "process map built");

    let roots = match args.pid {
        Some(pid) if map.get(pid).is_none() => return Err(ProcscopeError::not_found(pid)),
        Some(pid) => vec![pid],
        None => map.roots(),
    };

    let mut seen = HashSet::new();
    let nodes: Vec<TreeNode> = roots
        .into_iter()
        .map(|pid| build_node(&mut map, pid, &mut seen))
        .collect();

    if args.json {
        return print_json(PROCESS_TREE_V1, TreeJson { roots: nodes });
    }

    let mut out = String::new();
    for node in &nodes {
        render_tree(node, "", None, &mut out);
    }
    print!("{out}");
    Ok(())
}

fn build_node(map: &mut ProcessMap, pid: u32, seen: &mut HashSet<u32>) -> TreeNode {
    seen.insert(pid);
    let (command, argv) = match map.get_mut(pid) {
        Some(process) => (
            readable(pid, "command", process.command()),
            readable(pid, "argv", process.argv().map(<[String]>::to_vec)),
        ),
        None => (None, None),
    };

    let kids: Vec<u32> = map
        .children(pid)
        .iter()
        .copied()
        .filter(|kid| !seen.contains(kid))
        .collect();
    let children = kids
        .into_iter()
        .map(|kid| build_node(map, kid, seen))
        .collect();

    TreeNode {
        pid,
        command,
        argv,
        children,
    }
}

fn format_tree_node(node: &TreeNode) -> String {
    let command = node.command.as_deref().unwrap_or("?");
    match node.argv.as_deref() {
        Some(argv) if argv.len() > 1 => format!("{} {} {}", node.pid, command, argv[1..].join(" ")),
        _ => format!("{} {}", node.pid, command),
    }
}

/// Append `node` and its subtree. `last` is `None` for a root line.
fn render_tree(node: &TreeNode, prefix: &str, last: Option<bool>, out: &mut String) {
    let (connector, child_prefix) = match last {
        None => ("", String::new()),
        Some(true) => ("└── ", format!("{prefix}    ")),
        Some(false) => ("├── ", format!("{prefix}│   ")),
    };
    out.push_str(prefix);
    out.push_str(connector);
    out.push_str(&format_tree_node(node));
    out.push('\n');

    let count = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        render_tree(child, &child_prefix, Some(i + 1 == count), out);
    }
}

// ============================================================================
// find
// ============================================================================

#[derive(Serialize)]
struct MatchJson {
    pid: u32,
    path: Option<String>,
    command: Option<String>,
}

#[derive(Serialize)]
struct FindJson {
    name: String,
    matches: Vec<MatchJson>,
}

fn run_find(args: FindArgs) -> ProcscopeResult<()> {
    let found = processes_by_name(&args.name)?;
    info!(name = %args.name, matches = found.len(), "name lookup complete");

    let matches: Vec<MatchJson> = found
        .into_iter()
        .map(|mut p| {
            let pid = p.pid();
            MatchJson {
                pid,
                path: readable(pid, "path", p.path().map(str::to_string)),
                command: readable(pid, "command", p.command()),
            }
        })
        .collect();

    if args.json {
        return print_json(
            PROCESS_MATCH_V1,
            FindJson {
                name: args.name,
                matches,
            },
        );
    }

    for m in &matches {
        let label = m.path.as_deref().or(m.command.as_deref()).unwrap_or("?");
        println!("{}\t{}", m.pid, label);
    }
    Ok(())
}

// ============================================================================
// show
// ============================================================================

#[derive(Debug, Serialize)]
struct DetailJson {
    pid: u32,
    ppid: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    groups: Option<Vec<u32>>,
    tty: Option<String>,
    footprint: Option<u64>,
    path: Option<String>,
    command: Option<String>,
    argv: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environ: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<Value>,
}

fn run_show(args: ShowArgs) -> ProcscopeResult<()> {
    let mut p = process_by_pid(args.pid)?;
    let pid = p.pid();

    let environ: Option<BTreeMap<String, String>> = if args.env {
        let env = p.environ()?;
        Some(env.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    } else {
        None
    };
    let raw = if args.raw {
        Some(raw_record(&mut p)?)
    } else {
        None
    };

    let detail = DetailJson {
        pid,
        ppid: readable(pid, "ppid", p.ppid()),
        uid: readable(pid, "uid", p.uid()),
        gid: readable(pid, "gid", p.gid()),
        groups: readable(pid, "groups", p.groups()),
        tty: readable(pid, "tty", p.tty()),
        footprint: readable(pid, "footprint", p.footprint(Refresh::Cached)),
        path: readable(pid, "path", p.path().map(str::to_string)),
        command: readable(pid, "command", p.command()),
        argv: readable(pid, "argv", p.argv().map(<[String]>::to_vec)),
        environ,
        raw,
    };

    if args.json {
        return print_json(PROCESS_DETAIL_V1, detail);
    }

    print!("{}", format_detail(&detail)?);
    Ok(())
}

#[cfg(target_os = "linux")]
fn raw_record(p: &mut Process) -> ProcscopeResult<Value> {
    to_value(p.stat(Refresh::Cached)?)
}

#[cfg(target_os = "macos")]
fn raw_record(p: &mut Process) -> ProcscopeResult<Value> {
    to_value(p.kinfo(Refresh::Cached)?)
}

fn to_value<T: Serialize>(record: &T) -> ProcscopeResult<Value> {
    serde_json::to_value(record).map_err(|e| ProcscopeError::internal(format!("serialize json: {e}")))
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "?".to_string(), T::to_string)
}

fn format_detail(d: &DetailJson) -> ProcscopeResult<String> {
    let mut out = String::new();
    let groups = d.groups.as_ref().map(|g| {
        g.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    });
    let argv = d.argv.as_ref().map(|a| a.join(" "));

    for (label, value) in [
        ("pid", d.pid.to_string()),
        ("ppid", opt(&d.ppid)),
        ("uid", opt(&d.uid)),
        ("gid", opt(&d.gid)),
        ("groups", opt(&groups)),
        ("tty", opt(&d.tty)),
        ("footprint", opt(&d.footprint)),
        ("path", opt(&d.path)),
        ("command", opt(&d.command)),
        ("argv", opt(&argv)),
    ] {
        out.push_str(&format!("{label:<10} {value}\n"));
    }

    if let Some(env) = &d.environ {
        out.push_str("environ\n");
        for (k, v) in env {
            out.push_str(&format!("  {k}={v}\n"));
        }
    }
    if let Some(raw) = &d.raw {
        let text = serde_json::to_string_pretty(raw)
            .map_err(|e| ProcscopeError::internal(format!("serialize json: {e}")))?;
        out.push_str("raw\n");
        out.push_str(&text);
        out.push('\n');
    }
    Ok(out)
}

// ============================================================================
// children
// ============================================================================

#[derive(Serialize)]
struct ChildrenJson {
    pid: u32,
    all: bool,
    children: Vec<u32>,
}

fn run_children(args: ChildrenArgs) -> ProcscopeResult<()> {
    let map = process_map()?;
    if map.get(args.pid).is_none() {
        return Err(ProcscopeError::not_found(args.pid));
    }

    let children = if args.all {
        map.descendants(args.pid)
    } else {
        map.children(args.pid).to_vec()
    };
    info!(pid = args.pid, count = children.len(), "children listed");

    if args.json {
        return print_json(
            PROCESS_CHILDREN_V1,
            ChildrenJson {
                pid: args.pid,
                all: args.all,
                children,
            },
        );
    }

    for pid in children {
        println!("{pid}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(pid: u32, command: &str) -> TreeNode {
        TreeNode {
            pid,
            command: Some(command.to_string()),
            argv: Some(vec![command.to_string()]),
            children: Vec::new(),
        }
    }

    #[test]
    fn tree_renders_connectors() {
        let mut sh = leaf(10, "sh");
        sh.children = vec![leaf(11, "sleep"), leaf(12, "cat")];
        let mut root = leaf(1, "init");
        root.children = vec![sh, leaf(20, "sshd")];

        let mut out = String::new();
        render_tree(&root, "", None, &mut out);
        assert_eq!(
            out,
            "1 init\n\
             ├── 10 sh\n\
             │   ├── 11 sleep\n\
             │   └── 12 cat\n\
             └── 20 sshd\n"
        );
    }

    #[test]
    fn tree_node_shows_arguments_and_unreadable_command() {
        let mut node = leaf(7, "sleep");
        node.argv = Some(vec!["sleep".into(), "5".into()]);
        assert_eq!(format_tree_node(&node), "7 sleep 5");

        node.command = None;
        node.argv = None;
        assert_eq!(format_tree_node(&node), "7 ?");
    }

    #[test]
    fn detail_marks_unreadable_fields() {
        let detail = DetailJson {
            pid: 42,
            ppid: Some(1),
            uid: None,
            gid: Some(0),
            groups: Some(vec![0, 4]),
            tty: Some("-".into()),
            footprint: None,
            path: None,
            command: Some("daemon".into()),
            argv: None,
            environ: None,
            raw: None,
        };
        let text = format_detail(&detail).unwrap();
        assert!(text.contains("pid        42\n"));
        assert!(text.contains("uid        ?\n"));
        assert!(text.contains("groups     0,4\n"));
        assert!(text.contains("tty        -\n"));
        assert!(!text.contains("environ"));
    }

    #[test]
    fn envelope_flattens_body() {
        let envelope = Envelope {
            schema_id: PROCESS_CHILDREN_V1,
            timestamp: current_timestamp(),
            platform: get_platform(),
            body: ChildrenJson {
                pid: 1,
                all: false,
                children: vec![2, 3],
            },
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["schema_id"], PROCESS_CHILDREN_V1);
        assert_eq!(value["pid"], 1);
        assert_eq!(value["children"], serde_json::json!([2, 3]));
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn show_parses_flags() {
        let cli = Cli::try_parse_from(["procscope", "show", "1", "--env", "--raw", "--json"])
            .unwrap();
        let Command::Show(args) = cli.command.unwrap() else {
            panic!("expected show command");
        };
        assert_eq!(args.pid, 1);
        assert!(args.env && args.raw && args.json);
    }

    #[test]
    fn tree_pid_is_optional() {
        let cli = Cli::try_parse_from(["procscope", "tree"]).unwrap();
        let Command::Tree(args) = cli.command.unwrap() else {
            panic!("expected tree command");
        };
        assert_eq!(args.pid, None);
    }

    #[test]
    fn children_rejects_non_numeric_pid() {
        assert!(Cli::try_parse_from(["procscope", "children", "abc"]).is_err());
    }
}
