use procscope_core::ProcscopeError;
use procscope_proc::{process_by_pid, processes, Fill, Process, Refresh};

fn me() -> Process {
    process_by_pid(std::process::id()).expect("current process")
}

#[test]
fn ppid_matches_getppid() {
    let expected = unsafe { libc::getppid() } as u32;
    assert_eq!(me().ppid().expect("ppid"), expected);
}

#[test]
fn ids_match_libc() {
    let mut p = me();
    assert_eq!(p.uid().expect("uid"), unsafe { libc::getuid() });
    assert_eq!(p.gid().expect("gid"), unsafe { libc::getgid() });
}

#[test]
fn argv_matches_env_args() {
    let mut p = me();
    let expected: Vec<String> = std::env::args().collect();
    assert_eq!(p.argv().expect("argv"), expected.as_slice());
}

#[test]
fn environ_contains_inherited_variable() {
    let mut p = me();
    let env = p.environ().expect("environ");

    let (key, value) = std::env::vars()
        .find(|(k, _)| k == "PATH" || k == "HOME")
        .expect("PATH or HOME in test environment");
    assert_eq!(env.get(&key), Some(&value));
}

#[test]
fn path_names_the_test_binary() {
    let mut p = me();
    let exe = std::env::current_exe().expect("current_exe");
    let exe = exe.canonicalize().unwrap_or(exe);
    assert_eq!(p.path().expect("path"), exe.to_string_lossy());
}

#[test]
fn value_distinguishes_unset_from_missing_process() {
    let mut p = me();
    std::env::var("PATH").expect("PATH set for tests");
    assert!(!p.value("PATH").expect("PATH value").is_empty());

    let err = p
        .value("PROCSCOPE_SURELY_NOT_SET_ANYWHERE")
        .expect_err("unset variable");
    assert!(err.is_unset(), "unexpected: {err}");

    let mut gone = Process::new(999_999_999);
    let err = gone.value("PATH").expect_err("missing process");
    assert!(err.is_not_found(), "unexpected: {err}");
}

#[test]
fn missing_pid_is_not_found() {
    match process_by_pid(999_999_999) {
        Err(ProcscopeError::NotFound { pid }) => assert_eq!(pid, 999_999_999),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn forced_footprint_sees_allocation() {
    let mut p = me();
    let before = p.footprint(Refresh::Cached).expect("footprint");

    let block: Vec<u8> = vec![1; 128 * 1024 * 1024];
    std::hint::black_box(&block);

    assert_eq!(p.footprint(Refresh::Cached).expect("cached"), before);
    let after = p.footprint(Refresh::Force).expect("forced");
    assert!(after > before, "before={before} after={after}");
    drop(block);
}

#[test]
fn clean_drops_cached_attributes() {
    let mut p = me();
    p.argv().expect("argv");
    assert!(!p.is_clean());
    p.clean();
    assert!(p.is_clean());
    assert_eq!(p.pid(), std::process::id());
}

#[test]
fn lazy_and_eager_both_list_self() {
    for fill in [Fill::Lazy, Fill::Eager] {
        let all = processes(fill).expect("processes");
        assert!(
            all.iter().any(|p| p.pid() == std::process::id()),
            "{fill:?} listing is missing self"
        );
        assert!(all.iter().all(|p| p.pid() != 0));
    }
}
