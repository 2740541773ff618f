//! Decoder for the Darwin `struct kinfo_proc` control block.
//!
//! `sysctl(CTL_KERN, KERN_PROC, ...)` returns one or more `kinfo_proc`
//! records: an `extern_proc` (from `<sys/proc.h>`) followed by an `eproc`
//! (from `<sys/sysctl.h>`). The layout below is the LP64 one. Each field is
//! read at its declared width; kernel pointers and alignment holes are
//! skipped by size, never overlaid onto a Rust struct.

use std::fmt;
use std::sync::OnceLock;

use procscope_core::{ProcscopeError, ProcscopeResult};
use serde::Serialize;

use crate::cursor::Cursor;
use crate::dev::DevT;

/// `sizeof(struct kinfo_proc)` on 64-bit Darwin.
pub const KINFO_PROC_SIZE: usize = 648;

/// `MAXCOMLEN + 1`
const COMM_FIELD_LEN: usize = 17;

/// `NGROUPS` in `struct _ucred`
pub const KI_NGROUPS: usize = 16;

/// `extern_proc.p_flag` bits from `<sys/proc.h>`.
pub mod flags {
    /// Process may hold a POSIX advisory lock.
    pub const P_ADVLOCK: u32 = 0x0000_0001;
    /// Has a controlling terminal.
    pub const P_CONTROLT: u32 = 0x0000_0002;
    /// Process is LP64.
    pub const P_LP64: u32 = 0x0000_0004;
    /// No SIGCHLD when children stop.
    pub const P_NOCLDSTOP: u32 = 0x0000_0008;
    /// Parent waiting for child exec/exit.
    pub const P_PPWAIT: u32 = 0x0000_0010;
    /// Has started profiling.
    pub const P_PROFIL: u32 = 0x0000_0020;
    /// Process was stopped and continued.
    pub const P_CONTINUED: u32 = 0x0000_0080;
    /// Has set privileges since last exec.
    pub const P_SUGID: u32 = 0x0000_0100;
    /// System process: no signals, stats, or swap.
    pub const P_SYSTEM: u32 = 0x0000_0200;
    /// Debugged process being traced.
    pub const P_TRACED: u32 = 0x0000_0800;
    /// Address space layout randomization disabled.
    pub const P_DISABLE_ASLR: u32 = 0x0000_1000;
    /// Working on exiting.
    pub const P_WEXIT: u32 = 0x0000_2000;
    /// Process called exec.
    pub const P_EXEC: u32 = 0x0000_4000;
    /// Running under binary translation.
    pub const P_TRANSLATED: u32 = 0x0002_0000;
    /// Process called reboot().
    pub const P_REBOOT: u32 = 0x0020_0000;
    /// Process adopted a persona.
    pub const P_ADOPTPERSONA: u32 = 0x0400_0000;
    /// No zombies when children exit.
    pub const P_NOCLDWAIT: u32 = 0x4000_0000;

    /// `eproc.e_flag`: controlling tty vnode active.
    pub const EPROC_CTTY: u32 = 0x01;
    /// `eproc.e_flag`: session leader.
    pub const EPROC_SLEADER: u32 = 0x02;
}

/// A `struct timeval` as laid out on LP64 (16 bytes with tail padding).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i32,
}

/// A `struct itimerval`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ITimerval {
    pub interval: Timeval,
    pub value: Timeval,
}

/// Run state from `extern_proc.p_stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Zero: no state recorded.
    #[default]
    None,
    /// `SIDL`: being created by fork.
    Idle,
    /// `SRUN`: currently runnable.
    Runnable,
    /// `SSLEEP`: sleeping on an address.
    Sleeping,
    /// `SSTOP`: debugging or suspension.
    Stopped,
    /// `SZOMB`: awaiting collection by parent.
    Zombie,
    /// A value this decoder does not know.
    Other(u8),
}

impl RunState {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => RunState::None,
            1 => RunState::Idle,
            2 => RunState::Runnable,
            3 => RunState::Sleeping,
            4 => RunState::Stopped,
            5 => RunState::Zombie,
            n => RunState::Other(n),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::None => f.write_str("-"),
            RunState::Idle => f.write_str("I"),
            RunState::Runnable => f.write_str("R"),
            RunState::Sleeping => f.write_str("S"),
            RunState::Stopped => f.write_str("T"),
            RunState::Zombie => f.write_str("Z"),
            RunState::Other(n) => write!(f, "{n}"),
        }
    }
}

/// Decoded `struct kinfo_proc`.
///
/// Only the meaningful fields are kept; kernel pointers and deprecated
/// slots are skipped. `uid`/`gid` are the real ids from `e_pcred`, `euid`
/// is `e_ucred.cr_uid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KInfoProc {
    // extern_proc
    pub start_time: Timeval,
    pub flag: u32,
    pub stat: RunState,
    pub pid: u32,
    pub debugger: u32,
    pub sigwait: i32,
    pub estcpu: u32,
    pub cpticks: i32,
    pub pctcpu: u32,
    pub swtime: u32,
    pub slptime: u32,
    pub realtimer: ITimerval,
    pub rtime: Timeval,
    pub uticks: u64,
    pub sticks: u64,
    pub iticks: u64,
    pub traceflag: i32,
    pub holdcnt: i32,
    pub sigignore: u32,
    pub sigcatch: u32,
    pub priority: u8,
    pub usrpri: u8,
    pub nice: i8,
    pub comm: String,
    pub xstat: u16,
    pub acflag: u16,

    // eproc
    pub uid: u32,
    pub svuid: u32,
    pub gid: u32,
    pub svgid: u32,
    pub refcnt: i32,
    pub cred_refs: i32,
    pub euid: u32,
    pub ngroups: i16,
    pub groups: [u32; KI_NGROUPS],
    pub ppid: i32,
    pub pgid: i32,
    pub jobc: i16,
    pub tdev: DevT,
    pub tpgid: i32,
    pub xsize: u32,
    pub xrssize: i16,
    pub xccount: i16,
    pub xswrss: i16,
    pub eflag: u32,
}

static LAYOUT_CHECK: OnceLock<ProcscopeResult<()>> = OnceLock::new();

/// Verify once that this decoder matches the running kernel.
///
/// The result, including a mismatch, is cached for the life of the process.
pub(crate) fn verify_layout() -> ProcscopeResult<()> {
    LAYOUT_CHECK
        .get_or_init(|| check_layout(KInfoProc::decoded_len(), platform_kinfo_size()))
        .clone()
}

fn check_layout(decoded: usize, declared: usize) -> ProcscopeResult<()> {
    if decoded != KINFO_PROC_SIZE {
        return Err(ProcscopeError::layout_mismatch(
            "kinfo_proc",
            KINFO_PROC_SIZE,
            decoded,
        ));
    }
    if declared != KINFO_PROC_SIZE {
        return Err(ProcscopeError::layout_mismatch(
            "kinfo_proc",
            KINFO_PROC_SIZE,
            declared,
        ));
    }
    Ok(())
}

/// Size of one `KERN_PROC_PID` answer for the calling process.
///
/// Falls back to the compiled size if the probe itself cannot run.
#[cfg(target_os = "macos")]
fn platform_kinfo_size() -> usize {
    crate::macos::sysctl_kinfo_pid(std::process::id())
        .map(|data| data.len())
        .unwrap_or(KINFO_PROC_SIZE)
}

#[cfg(not(target_os = "macos"))]
fn platform_kinfo_size() -> usize {
    KINFO_PROC_SIZE
}

impl KInfoProc {
    /// Decode a single record. `data` must be exactly one `kinfo_proc`.
    pub fn decode(data: &[u8]) -> ProcscopeResult<Self> {
        verify_layout()?;
        if data.len() != KINFO_PROC_SIZE {
            return Err(ProcscopeError::decode(
                "kinfo_proc",
                format!("expected {} bytes, got {}", KINFO_PROC_SIZE, data.len()),
            ));
        }
        Ok(Self::read(&mut Cursor::new(data)))
    }

    /// Decode a `KERN_PROC_ALL` table of back-to-back records.
    pub fn decode_table(data: &[u8]) -> ProcscopeResult<Vec<Self>> {
        verify_layout()?;
        if data.len() % KINFO_PROC_SIZE != 0 {
            return Err(ProcscopeError::decode(
                "kinfo_proc",
                format!(
                    "table of {} bytes is not a multiple of {}",
                    data.len(),
                    KINFO_PROC_SIZE
                ),
            ));
        }
        Ok(data
            .chunks_exact(KINFO_PROC_SIZE)
            .map(|record| Self::read(&mut Cursor::new(record)))
            .collect())
    }

    /// The supplementary groups actually in use.
    pub fn group_list(&self) -> &[u32] {
        let n = (self.ngroups.max(0) as usize).min(KI_NGROUPS);
        &self.groups[..n]
    }

    /// Number of bytes the decoder consumes for one record.
    pub(crate) fn decoded_len() -> usize {
        let mut c = Cursor::new(&[]);
        Self::read(&mut c);
        c.position()
    }

    fn read(c: &mut Cursor<'_>) -> Self {
        let mut k = KInfoProc::default();

        // struct extern_proc
        k.start_time = read_timeval(c);
        c.skip(8); // p_vmspace
        c.skip(8); // p_sigacts
        k.flag = c.u32();
        k.stat = RunState::from_raw(c.u8());
        c.skip(3);
        k.pid = c.u32();
        c.skip(4); // p_oppid
        c.skip(4); // p_dupfd
        c.skip(4);
        c.skip(8); // user_stack
        c.skip(8); // exit_thread
        k.debugger = c.u32();
        k.sigwait = c.i32();
        k.estcpu = c.u32();
        k.cpticks = c.i32();
        k.pctcpu = c.u32();
        c.skip(4);
        c.skip(8); // p_wchan
        c.skip(8); // p_wmesg
        k.swtime = c.u32();
        k.slptime = c.u32();
        k.realtimer = ITimerval {
            interval: read_timeval(c),
            value: read_timeval(c),
        };
        k.rtime = read_timeval(c);
        k.uticks = c.u64();
        k.sticks = c.u64();
        k.iticks = c.u64();
        k.traceflag = c.i32();
        c.skip(4);
        c.skip(8); // p_tracep
        c.skip(4); // p_siglist
        c.skip(4);
        c.skip(8); // p_textvp
        k.holdcnt = c.i32();
        c.skip(4); // p_sigmask
        k.sigignore = c.u32();
        k.sigcatch = c.u32();
        k.priority = c.u8();
        k.usrpri = c.u8();
        k.nice = c.i8();
        k.comm = c_string(&c.bytes::<COMM_FIELD_LEN>());
        c.skip(4);
        c.skip(8); // p_pgrp
        c.skip(8); // p_addr
        k.xstat = c.u16();
        k.acflag = c.u16();
        c.skip(4);
        c.skip(8); // p_ru

        // struct eproc
        c.skip(8); // e_paddr
        c.skip(8); // e_sess
        c.skip(72); // e_pcred.pc_lock
        c.skip(8); // e_pcred.pc_ucred
        k.uid = c.u32();
        k.svuid = c.u32();
        k.gid = c.u32();
        k.svgid = c.u32();
        k.refcnt = c.i32();
        c.skip(4);
        k.cred_refs = c.i32();
        k.euid = c.u32();
        k.ngroups = c.i16();
        c.skip(2);
        for g in k.groups.iter_mut() {
            *g = c.u32();
        }
        c.skip(4);
        c.skip(64); // e_vm
        k.ppid = c.i32();
        k.pgid = c.i32();
        k.jobc = c.i16();
        c.skip(2);
        k.tdev = DevT(c.u32());
        k.tpgid = c.i32();
        c.skip(4);
        c.skip(8); // e_tsess
        c.skip(8); // e_wmesg
        k.xsize = c.u32();
        k.xrssize = c.i16();
        k.xccount = c.i16();
        k.xswrss = c.i16();
        c.skip(2);
        k.eflag = c.u32();
        c.skip(12); // e_login
        c.skip(16); // e_spare
        c.skip(4);

        k
    }
}

fn read_timeval(c: &mut Cursor<'_>) -> Timeval {
    let sec = c.i64();
    let usec = c.i32();
    c.skip(4);
    Timeval { sec, usec }
}

/// NUL-terminated bytes to a lossy string.
pub(crate) fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Byte offsets within the 64-bit `struct kinfo_proc`.
    mod off {
        pub const START_SEC: usize = 0;
        pub const START_USEC: usize = 8;
        pub const FLAG: usize = 32;
        pub const STAT: usize = 36;
        pub const PID: usize = 40;
        pub const UTICKS: usize = 168;
        pub const PRIORITY: usize = 240;
        pub const NICE: usize = 242;
        pub const COMM: usize = 243;
        pub const XSTAT: usize = 280;
        pub const RUID: usize = 392;
        pub const SVUID: usize = 396;
        pub const RGID: usize = 400;
        pub const SVGID: usize = 404;
        pub const EUID: usize = 420;
        pub const NGROUPS: usize = 424;
        pub const GROUPS: usize = 428;
        pub const PPID: usize = 560;
        pub const PGID: usize = 564;
        pub const JOBC: usize = 568;
        pub const TDEV: usize = 572;
        pub const TPGID: usize = 576;
        pub const EFLAG: usize = 612;
    }

    fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// A raw record for `pid`/`ppid` with recognizable values elsewhere.
    pub(crate) fn raw_record(pid: u32, ppid: i32, comm: &str) -> Vec<u8> {
        let mut buf = vec![0u8; KINFO_PROC_SIZE];
        put(&mut buf, off::START_SEC, &1_700_000_000i64.to_ne_bytes());
        put(&mut buf, off::START_USEC, &250_000i32.to_ne_bytes());
        put(&mut buf, off::FLAG, &(flags::P_LP64 | flags::P_EXEC).to_ne_bytes());
        buf[off::STAT] = 2;
        put(&mut buf, off::PID, &pid.to_ne_bytes());
        put(&mut buf, off::UTICKS, &99u64.to_ne_bytes());
        buf[off::PRIORITY] = 31;
        put(&mut buf, off::NICE, &(-5i8).to_ne_bytes());
        let name = comm.as_bytes();
        let n = name.len().min(COMM_FIELD_LEN - 1);
        put(&mut buf, off::COMM, &name[..n]);
        put(&mut buf, off::XSTAT, &9u16.to_ne_bytes());
        put(&mut buf, off::RUID, &501u32.to_ne_bytes());
        put(&mut buf, off::SVUID, &502u32.to_ne_bytes());
        put(&mut buf, off::RGID, &20u32.to_ne_bytes());
        put(&mut buf, off::SVGID, &21u32.to_ne_bytes());
        put(&mut buf, off::EUID, &0u32.to_ne_bytes());
        put(&mut buf, off::NGROUPS, &3i16.to_ne_bytes());
        for (i, g) in [20u32, 12, 61].iter().enumerate() {
            put(&mut buf, off::GROUPS + i * 4, &g.to_ne_bytes());
        }
        put(&mut buf, off::PPID, &ppid.to_ne_bytes());
        put(&mut buf, off::PGID, &(pid as i32).to_ne_bytes());
        put(&mut buf, off::JOBC, &1i16.to_ne_bytes());
        put(&mut buf, off::TDEV, &0x1000_0003u32.to_ne_bytes());
        put(&mut buf, off::TPGID, &(-1i32).to_ne_bytes());
        put(&mut buf, off::EFLAG, &flags::EPROC_CTTY.to_ne_bytes());
        buf
    }

    #[test]
    fn test_decoded_len_matches_declared_size() {
        assert_eq!(KInfoProc::decoded_len(), KINFO_PROC_SIZE);
        assert!(verify_layout().is_ok());
    }

    #[test]
    fn test_check_layout_rejects_mismatch() {
        let err = check_layout(KINFO_PROC_SIZE, 656).unwrap_err();
        assert_eq!(
            err,
            ProcscopeError::layout_mismatch("kinfo_proc", KINFO_PROC_SIZE, 656)
        );
        assert!(check_layout(640, KINFO_PROC_SIZE).is_err());
    }

    #[test]
    fn test_decode_fields_at_documented_offsets() {
        let raw = raw_record(4242, 1, "launchd-helper");
        let k = KInfoProc::decode(&raw).unwrap();

        assert_eq!(k.start_time, Timeval { sec: 1_700_000_000, usec: 250_000 });
        assert_eq!(k.flag, flags::P_LP64 | flags::P_EXEC);
        assert_eq!(k.stat, RunState::Runnable);
        assert_eq!(k.pid, 4242);
        assert_eq!(k.uticks, 99);
        assert_eq!(k.priority, 31);
        assert_eq!(k.nice, -5);
        assert_eq!(k.comm, "launchd-helper");
        assert_eq!(k.xstat, 9);
        assert_eq!(k.uid, 501);
        assert_eq!(k.svuid, 502);
        assert_eq!(k.gid, 20);
        assert_eq!(k.svgid, 21);
        assert_eq!(k.euid, 0);
        assert_eq!(k.group_list(), &[20, 12, 61]);
        assert_eq!(k.ppid, 1);
        assert_eq!(k.pgid, 4242);
        assert_eq!(k.jobc, 1);
        assert_eq!(k.tdev, DevT(0x1000_0003));
        assert_eq!(k.tpgid, -1);
        assert_eq!(k.eflag, flags::EPROC_CTTY);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let raw = vec![0u8; KINFO_PROC_SIZE - 8];
        let err = KInfoProc::decode(&raw).unwrap_err();
        assert!(matches!(err, ProcscopeError::Decode { record: "kinfo_proc", .. }));
    }

    #[test]
    fn test_decode_table_splits_records() {
        let mut table = raw_record(1, 0, "launchd");
        table.extend(raw_record(77, 1, "syslogd"));
        table.extend(raw_record(78, 77, "child"));

        let records = KInfoProc::decode_table(&table).unwrap();
        let pids: Vec<u32> = records.iter().map(|k| k.pid).collect();
        assert_eq!(pids, vec![1, 77, 78]);
        assert_eq!(records[2].ppid, 77);
        assert_eq!(records[1].comm, "syslogd");

        table.truncate(table.len() - 1);
        assert!(KInfoProc::decode_table(&table).is_err());
    }

    #[test]
    fn test_group_list_clamps_count() {
        let mut k = KInfoProc {
            ngroups: 40,
            ..Default::default()
        };
        assert_eq!(k.group_list().len(), KI_NGROUPS);
        k.ngroups = -1;
        assert!(k.group_list().is_empty());
    }

    #[test]
    fn test_run_state_display() {
        for (raw, want) in [
            (0u8, "-"),
            (1, "I"),
            (2, "R"),
            (3, "S"),
            (4, "T"),
            (5, "Z"),
            (42, "42"),
        ] {
            assert_eq!(RunState::from_raw(raw).to_string(), want, "state {raw}");
        }
    }

    #[test]
    fn test_comm_is_nul_terminated() {
        assert_eq!(c_string(b"sh\0garbage"), "sh");
        assert_eq!(c_string(b"no-terminator"), "no-terminator");
    }
}
