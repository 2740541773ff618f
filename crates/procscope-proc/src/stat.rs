//! Tokenizer for the `/proc/<pid>/stat` line.
//!
//! Every field is whitespace separated except `comm`, which is everything
//! between the first `(` and the last `)` and may itself contain blanks and
//! parentheses. Fields are parsed in kernel order and the first bad field
//! fails the whole record.

use std::str::{FromStr, SplitAsciiWhitespace};

use procscope_core::{ProcscopeError, ProcscopeResult};
use serde::Serialize;

/// All 52 fields of `/proc/<pid>/stat` (see proc(5)).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    pub tty_nr: i32,
    pub tpgid: i32,
    pub flags: u32,
    pub minflt: u64,
    pub cminflt: u64,
    pub majflt: u64,
    pub cmajflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: i64,
    pub itrealvalue: i64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss: i64,
    pub rsslim: u64,
    pub startcode: u64,
    pub endcode: u64,
    pub startstack: u64,
    pub kstkesp: u64,
    pub kstkeip: u64,
    pub signal: u64,
    pub blocked: u64,
    pub sigignore: u64,
    pub sigcatch: u64,
    pub wchan: u64,
    pub nswap: u64,
    pub cnswap: u64,
    pub exit_signal: i32,
    pub processor: i32,
    pub rt_priority: u32,
    pub policy: u32,
    pub delayacct_blkio_ticks: u64,
    pub guest_time: u64,
    pub cguest_time: i64,
    pub start_data: u64,
    pub end_data: u64,
    pub start_brk: u64,
    pub arg_start: u64,
    pub arg_end: u64,
    pub env_start: u64,
    pub env_end: u64,
    pub exit_code: i32,
}

struct Fields<'a> {
    iter: SplitAsciiWhitespace<'a>,
}

impl Fields<'_> {
    fn next<T: FromStr>(&mut self, name: &'static str) -> ProcscopeResult<T> {
        let token = self
            .iter
            .next()
            .ok_or_else(|| ProcscopeError::decode("stat", format!("missing field {name}")))?;
        token.parse().map_err(|_| {
            ProcscopeError::decode("stat", format!("field {name}: invalid value {token:?}"))
        })
    }
}

impl Stat {
    /// Parse one stat line. A trailing newline is ignored.
    pub fn parse(line: &str) -> ProcscopeResult<Self> {
        let open = line
            .find('(')
            .ok_or_else(|| ProcscopeError::decode("stat", "missing '(' before comm"))?;
        let close = line
            .rfind(')')
            .filter(|&close| close > open)
            .ok_or_else(|| ProcscopeError::decode("stat", "missing ')' after comm"))?;

        let pid_token = line[..open].trim();
        let pid = pid_token.parse().map_err(|_| {
            ProcscopeError::decode("stat", format!("field pid: invalid value {pid_token:?}"))
        })?;
        let comm = line[open + 1..close].to_string();

        let mut f = Fields {
            iter: line[close + 1..].split_ascii_whitespace(),
        };

        Ok(Stat {
            pid,
            comm,
            state: f.next("state")?,
            ppid: f.next("ppid")?,
            pgrp: f.next("pgrp")?,
            session: f.next("session")?,
            tty_nr: f.next("tty_nr")?,
            tpgid: f.next("tpgid")?,
            flags: f.next("flags")?,
            minflt: f.next("minflt")?,
            cminflt: f.next("cminflt")?,
            majflt: f.next("majflt")?,
            cmajflt: f.next("cmajflt")?,
            utime: f.next("utime")?,
            stime: f.next("stime")?,
            cutime: f.next("cutime")?,
            cstime: f.next("cstime")?,
            priority: f.next("priority")?,
            nice: f.next("nice")?,
            num_threads: f.next("num_threads")?,
            itrealvalue: f.next("itrealvalue")?,
            starttime: f.next("starttime")?,
            vsize: f.next("vsize")?,
            rss: f.next("rss")?,
            rsslim: f.next("rsslim")?,
            startcode: f.next("startcode")?,
            endcode: f.next("endcode")?,
            startstack: f.next("startstack")?,
            kstkesp: f.next("kstkesp")?,
            kstkeip: f.next("kstkeip")?,
            signal: f.next("signal")?,
            blocked: f.next("blocked")?,
            sigignore: f.next("sigignore")?,
            sigcatch: f.next("sigcatch")?,
            wchan: f.next("wchan")?,
            nswap: f.next("nswap")?,
            cnswap: f.next("cnswap")?,
            exit_signal: f.next("exit_signal")?,
            processor: f.next("processor")?,
            rt_priority: f.next("rt_priority")?,
            policy: f.next("policy")?,
            delayacct_blkio_ticks: f.next("delayacct_blkio_ticks")?,
            guest_time: f.next("guest_time")?,
            cguest_time: f.next("cguest_time")?,
            start_data: f.next("start_data")?,
            end_data: f.next("end_data")?,
            start_brk: f.next("start_brk")?,
            arg_start: f.next("arg_start")?,
            arg_end: f.next("arg_end")?,
            env_start: f.next("env_start")?,
            env_end: f.next("env_end")?,
            exit_code: f.next("exit_code")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The 50 fields after `comm`, numbered so each is recognizable.
    fn tail_fields() -> Vec<String> {
        let mut fields = vec!["S".to_string()];
        fields.extend((3..=51).map(|n| n.to_string()));
        fields
    }

    fn line(pid: &str, comm: &str, tail: &[String]) -> String {
        format!("{pid} ({comm}) {}\n", tail.join(" "))
    }

    #[test]
    fn test_comm_with_spaces_and_parens() {
        let tail = tail_fields();
        assert_eq!(tail.len(), 50);

        let stat = Stat::parse(&line("123", "my (weird) proc", &tail)).unwrap();
        assert_eq!(stat.pid, 123);
        assert_eq!(stat.comm, "my (weird) proc");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 3);
        assert_eq!(stat.pgrp, 4);
        assert_eq!(stat.tty_nr, 6);
        assert_eq!(stat.utime, 13);
        assert_eq!(stat.vsize, 22);
        assert_eq!(stat.rss, 23);
        assert_eq!(stat.exit_signal, 37);
        assert_eq!(stat.guest_time, 42);
        assert_eq!(stat.exit_code, 51);
    }

    #[test]
    fn test_realistic_line() {
        let raw = "1 (systemd) S 0 1 1 0 -1 4194560 52341 2390877 103 1455 \
                   310 420 8061 2331 20 0 1 0 25 172793856 3142 18446744073709551615 \
                   1 1 0 0 0 0 671173123 4096 1260 0 0 0 17 3 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = Stat::parse(raw).unwrap();
        assert_eq!(stat.comm, "systemd");
        assert_eq!(stat.ppid, 0);
        assert_eq!(stat.tpgid, -1);
        assert_eq!(stat.vsize, 172_793_856);
        assert_eq!(stat.rsslim, u64::MAX);
        assert_eq!(stat.processor, 3);
    }

    #[test]
    fn test_serializes_with_field_names() {
        let stat = Stat::parse(&line("77", "bash", &tail_fields())).unwrap();
        let value = serde_json::to_value(&stat).unwrap();
        assert_eq!(value["pid"], 77);
        assert_eq!(value["comm"], "bash");
        assert_eq!(value["state"], "S");
        assert_eq!(value["ppid"], 3);
        assert_eq!(value["vsize"], 22);
    }

    #[test]
    fn test_empty_comm() {
        let stat = Stat::parse(&line("9", "", &tail_fields())).unwrap();
        assert_eq!(stat.comm, "");
        assert_eq!(stat.pid, 9);
    }

    #[test]
    fn test_truncated_line_fails() {
        let mut tail = tail_fields();
        tail.truncate(30);
        let err = Stat::parse(&line("5", "sh", &tail)).unwrap_err();
        match err {
            ProcscopeError::Decode { record, message } => {
                assert_eq!(record, "stat");
                assert!(message.contains("missing field"), "{message}");
            }
            other => panic!("Expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_numeric_field_fails_fast() {
        let mut tail = tail_fields();
        tail[1] = "notanumber".to_string();
        let err = Stat::parse(&line("5", "sh", &tail)).unwrap_err();
        match err {
            ProcscopeError::Decode { message, .. } => assert!(message.contains("ppid")),
            other => panic!("Expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_parens_fail() {
        assert!(Stat::parse("5 sh S 1 2 3").is_err());
        assert!(Stat::parse("5 (sh S 1 2 3").is_err());
        assert!(Stat::parse("x (sh) S").is_err());
        assert!(Stat::parse("").is_err());
    }

    #[test]
    fn test_multichar_state_fails() {
        let mut tail = tail_fields();
        tail[0] = "SS".to_string();
        assert!(Stat::parse(&line("5", "sh", &tail)).is_err());
    }
}
