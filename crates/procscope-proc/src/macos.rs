//! macOS implementation using sysctl and libproc
//!
//! Uses the following APIs:
//! - `sysctl(CTL_KERN, KERN_PROC, KERN_PROC_ALL | KERN_PROC_PID)` - `kinfo_proc` control blocks
//! - `sysctl(CTL_KERN, KERN_PROCARGS2)` - argument and environment blob
//! - `sysctl(CTL_KERN, KERN_MAXPROC)` - process table size
//! - `proc_listallpids()` - enumerate all PIDs
//! - `proc_pidpath()` - resolved executable path
//! - `proc_pid_rusage()` with `RUSAGE_INFO_V5` - resource usage

use std::collections::HashMap;
use std::io;
use std::mem;
use std::ptr;

use libc::{c_int, c_uint, c_void};
use procscope_core::{ProcscopeError, ProcscopeResult};

use crate::fetch::{fetch_table, TableQuery};
use crate::kinfo::KInfoProc;
use crate::procargs::ProcArgs;
use crate::rusage::{AlignedBuffer, RUsage, RUSAGE_INFO_V5};
use crate::{base_name, cached, Attributes, DevT, Fill, Process, Refresh};

// ============================================================================
// libproc FFI Bindings
// ============================================================================

// Constants from <sys/param.h> and <libproc.h>
const MAXPATHLEN: usize = 1024;
const PROC_PIDPATHINFO_MAXSIZE: usize = 4 * MAXPATHLEN;

extern "C" {
    fn proc_listallpids(buffer: *mut c_void, buffersize: c_int) -> c_int;

    fn proc_pidpath(pid: c_int, buffer: *mut c_void, buffersize: u32) -> c_int;

    fn proc_pid_rusage(pid: c_int, flavor: c_int, buffer: *mut c_void) -> c_int;
}

/// The error for a failed libproc call, read from `errno`.
///
/// libproc does not always set `errno`; a bare failure means the pid is gone.
fn last_error(pid: u32, operation: &str) -> ProcscopeError {
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        None | Some(0) => ProcscopeError::not_found(pid),
        Some(_) => ProcscopeError::from_io(&err, pid, operation),
    }
}

// ============================================================================
// sysctl
// ============================================================================

/// A `sysctl` MIB as a growable kernel table.
struct Sysctl {
    mib: Vec<c_int>,
}

impl TableQuery for Sysctl {
    fn query(&mut self, buf: Option<&mut [u8]>) -> io::Result<usize> {
        let capacity = buf.as_ref().map_or(0, |b| b.len());
        let (data, mut size) = match buf {
            Some(b) => (b.as_mut_ptr() as *mut c_void, b.len()),
            None => (ptr::null_mut(), 0),
        };

        let ret = unsafe {
            libc::sysctl(
                self.mib.as_mut_ptr(),
                self.mib.len() as c_uint,
                data,
                &mut size,
                ptr::null_mut(),
                0,
            )
        };
        if ret == 0 {
            return Ok(size);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOMEM) && capacity > 0 {
            // The table grew past the buffer since the size probe
            return Ok(capacity + capacity / 2);
        }
        Err(err)
    }
}

fn sysctl(mib: &[c_int]) -> io::Result<Vec<u8>> {
    fetch_table(&mut Sysctl { mib: mib.to_vec() })
}

/// Raw `KERN_PROC_PID` answer. Empty when the pid does not exist.
pub(crate) fn sysctl_kinfo_pid(pid: u32) -> io::Result<Vec<u8>> {
    sysctl(&[libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_PID, pid as c_int])
}

/// Maximum number of processes the kernel allows (`kern.maxproc`).
pub fn maxproc() -> ProcscopeResult<u32> {
    let data = sysctl(&[libc::CTL_KERN, libc::KERN_MAXPROC]).map_err(|e| {
        ProcscopeError::system(
            format!("sysctl kern.maxproc failed: {e}"),
            e.raw_os_error().unwrap_or(0),
        )
    })?;
    let bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ProcscopeError::decode("maxproc", format!("{} bytes", data.len())))?;
    Ok(u32::from_ne_bytes(bytes))
}

fn read_kinfo(pid: u32) -> ProcscopeResult<KInfoProc> {
    let data = sysctl_kinfo_pid(pid)
        .map_err(|e| ProcscopeError::from_io(&e, pid, "read process info"))?;
    if data.is_empty() {
        return Err(ProcscopeError::not_found(pid));
    }
    KInfoProc::decode(&data)
}

fn read_kinfo_all() -> ProcscopeResult<Vec<KInfoProc>> {
    let data = sysctl(&[libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_ALL]).map_err(|e| {
        ProcscopeError::system(
            format!("sysctl kern.proc.all failed: {e}"),
            e.raw_os_error().unwrap_or(0),
        )
    })?;
    KInfoProc::decode_table(&data)
}

fn read_procargs(pid: u32) -> ProcscopeResult<ProcArgs> {
    match sysctl(&[libc::CTL_KERN, libc::KERN_PROCARGS2, pid as c_int]) {
        Ok(data) => ProcArgs::parse(&data),
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
            Err(procargs_einval(pid, list_all_pids()))
        }
        Err(e) => Err(ProcscopeError::from_io(&e, pid, "read arguments")),
    }
}

/// EINVAL from `KERN_PROCARGS2` means either no such process or someone
/// else's process. A pid listing that fails counts as "not listed".
fn procargs_einval(pid: u32, listed: ProcscopeResult<Vec<u32>>) -> ProcscopeError {
    match listed {
        Ok(pids) if pids.contains(&pid) => ProcscopeError::permission_denied(pid, "read arguments"),
        _ => ProcscopeError::not_found(pid),
    }
}

// ============================================================================
// libproc
// ============================================================================

/// Get list of all PIDs on the system.
fn list_all_pids() -> ProcscopeResult<Vec<u32>> {
    let max = maxproc()? as usize;
    let mut pids: Vec<c_int> = vec![0; max];

    let count = unsafe {
        proc_listallpids(
            pids.as_mut_ptr() as *mut c_void,
            (max * mem::size_of::<c_int>()) as c_int,
        )
    };
    if count < 0 {
        let err = io::Error::last_os_error();
        return Err(ProcscopeError::system(
            format!("proc_listallpids failed: {err}"),
            err.raw_os_error().unwrap_or(0),
        ));
    }

    pids.truncate(count as usize);
    Ok(pids.into_iter().filter(|&p| p > 0).map(|p| p as u32).collect())
}

fn read_path(pid: u32) -> ProcscopeResult<String> {
    let mut buffer = [0u8; PROC_PIDPATHINFO_MAXSIZE];
    let len = unsafe {
        proc_pidpath(
            pid as c_int,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len() as u32,
        )
    };
    if len <= 0 {
        return Err(last_error(pid, "read executable path"));
    }
    Ok(String::from_utf8_lossy(&buffer[..len as usize]).into_owned())
}

fn read_rusage(pid: u32) -> ProcscopeResult<RUsage> {
    let mut buffer = AlignedBuffer::zeroed();
    // SAFETY: the buffer is 8-byte aligned and larger than rusage_info_v5.
    let ret = unsafe {
        proc_pid_rusage(
            pid as c_int,
            RUSAGE_INFO_V5,
            buffer.0.as_mut_ptr() as *mut c_void,
        )
    };
    if ret != 0 {
        return Err(last_error(pid, "read resource usage"));
    }
    RUsage::decode(&buffer.0)
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct Cache {
    kinfo: Option<Box<KInfoProc>>,
    rusage: Option<Box<RUsage>>,
    path: Option<Box<String>>,
    args: Option<Box<ProcArgs>>,
}

impl Cache {
    fn kinfo(&mut self, pid: u32, refresh: Refresh) -> ProcscopeResult<&KInfoProc> {
        cached(&mut self.kinfo, refresh, || read_kinfo(pid))
    }

    fn rusage(&mut self, pid: u32, refresh: Refresh) -> ProcscopeResult<&RUsage> {
        cached(&mut self.rusage, refresh, || read_rusage(pid))
    }

    fn args(&mut self, pid: u32) -> ProcscopeResult<&ProcArgs> {
        cached(&mut self.args, Refresh::Cached, || read_procargs(pid))
    }

    #[cfg(test)]
    pub(crate) fn with_ppid(pid: u32, ppid: u32) -> Self {
        Cache {
            kinfo: Some(Box::new(KInfoProc {
                pid,
                ppid: ppid as i32,
                ..Default::default()
            })),
            ..Default::default()
        }
    }
}

impl Attributes for Cache {
    fn fill(&mut self, pid: u32) -> ProcscopeResult<()> {
        self.kinfo(pid, Refresh::Cached).map(|_| ())
    }

    fn ppid(&mut self, pid: u32) -> ProcscopeResult<u32> {
        Ok(self.kinfo(pid, Refresh::Cached)?.ppid.max(0) as u32)
    }

    fn uid(&mut self, pid: u32) -> ProcscopeResult<u32> {
        Ok(self.kinfo(pid, Refresh::Cached)?.uid)
    }

    fn gid(&mut self, pid: u32) -> ProcscopeResult<u32> {
        Ok(self.kinfo(pid, Refresh::Cached)?.gid)
    }

    fn groups(&mut self, pid: u32) -> ProcscopeResult<Vec<u32>> {
        Ok(self.kinfo(pid, Refresh::Cached)?.group_list().to_vec())
    }

    fn tty(&mut self, pid: u32) -> ProcscopeResult<DevT> {
        Ok(self.kinfo(pid, Refresh::Cached)?.tdev)
    }

    fn footprint(&mut self, pid: u32, refresh: Refresh) -> ProcscopeResult<u64> {
        Ok(self.rusage(pid, refresh)?.phys_footprint)
    }

    fn path(&mut self, pid: u32) -> ProcscopeResult<&str> {
        cached(&mut self.path, Refresh::Cached, || read_path(pid)).map(String::as_str)
    }

    fn command(&mut self, pid: u32) -> ProcscopeResult<String> {
        Ok(base_name(self.path(pid)?).to_string())
    }

    fn argv(&mut self, pid: u32) -> ProcscopeResult<&[String]> {
        Ok(&self.args(pid)?.argv)
    }

    fn environ(&mut self, pid: u32) -> ProcscopeResult<&HashMap<String, String>> {
        Ok(&self.args(pid)?.env)
    }

    fn clean(&mut self) {
        *self = Cache::default();
    }

    fn is_clean(&self) -> bool {
        self.kinfo.is_none() && self.rusage.is_none() && self.path.is_none() && self.args.is_none()
    }
}

// ============================================================================
// macOS-only accessors
// ============================================================================

impl Process {
    /// The decoded `kinfo_proc` control block.
    pub fn kinfo(&mut self, refresh: Refresh) -> ProcscopeResult<&KInfoProc> {
        self.cache.kinfo(self.pid, refresh)
    }

    /// The `rusage_info_v5` resource-usage snapshot.
    pub fn rusage(&mut self, refresh: Refresh) -> ProcscopeResult<&RUsage> {
        self.cache.rusage(self.pid, refresh)
    }

    /// The full `KERN_PROCARGS2` record, including the exec-time path.
    pub fn proc_args(&mut self) -> ProcscopeResult<&ProcArgs> {
        self.cache.args(self.pid)
    }
}

// ============================================================================
// Enumeration
// ============================================================================

pub(crate) fn processes(fill: Fill) -> ProcscopeResult<Vec<Process>> {
    Ok(match fill {
        Fill::Lazy => list_all_pids()?.into_iter().map(Process::new).collect(),
        Fill::Eager => read_kinfo_all()?
            .into_iter()
            .filter(|k| k.pid != 0)
            .map(|k| {
                let pid = k.pid;
                let cache = Cache {
                    kinfo: Some(Box::new(k)),
                    ..Default::default()
                };
                Process::with_cache(pid, cache)
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procargs_einval_classification() {
        let listed = Ok(vec![1, 42, 99]);
        assert!(procargs_einval(42, listed).is_permission_denied());
        assert!(procargs_einval(7, Ok(vec![1, 42])).is_not_found());

        let failed = Err(ProcscopeError::system("proc_listallpids failed", libc::ENOMEM));
        assert!(procargs_einval(42, failed).is_not_found());
    }

    #[test]
    fn test_maxproc() {
        assert!(maxproc().unwrap() > 0);
    }

    #[test]
    fn test_list_pids() {
        let pids = list_all_pids().unwrap();
        assert!(!pids.is_empty());
        // Should contain at least PID 1 (launchd)
        assert!(pids.contains(&1));
        assert!(pids.contains(&std::process::id()));
        assert!(!pids.contains(&0));
    }

    #[test]
    fn test_kinfo_pid_probe_has_declared_size() {
        let data = sysctl_kinfo_pid(std::process::id()).unwrap();
        assert_eq!(data.len(), crate::kinfo::KINFO_PROC_SIZE);
    }

    #[test]
    fn test_read_self_kinfo() {
        let pid = std::process::id();
        let k = read_kinfo(pid).unwrap();
        assert_eq!(k.pid, pid);
        assert_eq!(k.ppid, unsafe { libc::getppid() });
        assert_eq!(k.uid, unsafe { libc::getuid() });
        assert_eq!(k.gid, unsafe { libc::getgid() });
        assert!(!k.comm.is_empty());
    }

    #[test]
    fn test_kinfo_all_contains_self() {
        let all = read_kinfo_all().unwrap();
        assert!(all.iter().any(|k| k.pid == std::process::id()));
    }

    #[test]
    fn test_self_rusage() {
        let r = read_rusage(std::process::id()).unwrap();
        assert!(r.phys_footprint > 0);
        assert!(r.lifetime_max_phys_footprint >= r.phys_footprint);
    }

    #[test]
    fn test_self_procargs_match_env_args() {
        let args = read_procargs(std::process::id()).unwrap();
        let expected: Vec<String> = std::env::args().collect();
        assert_eq!(args.argv, expected);
        assert!(!args.exec_path.is_empty());
    }

    #[test]
    fn test_self_path() {
        let path = read_path(std::process::id()).unwrap();
        let exe = std::env::current_exe().unwrap();
        assert_eq!(
            std::fs::canonicalize(path).unwrap(),
            std::fs::canonicalize(exe).unwrap()
        );
    }

    #[test]
    fn test_nonexistent_pid() {
        assert!(read_kinfo(99_999_999).unwrap_err().is_not_found());
        assert!(read_procargs(99_999_999).unwrap_err().is_not_found());
        assert!(read_path(99_999_999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_launchd_args_or_permission_denied() {
        match read_procargs(1) {
            Ok(args) => assert!(!args.argv.is_empty()),
            Err(ProcscopeError::PermissionDenied { pid, .. }) => assert_eq!(pid, 1),
            Err(e) => panic!("Unexpected error reading PID 1 arguments: {:?}", e),
        }
    }
}
