//! procscope-proc: Normalized, cached access to kernel process state
//!
//! This crate reads per-process attributes straight from the kernel and
//! presents them through a single [`Process`] handle, plus process-tree and
//! name-lookup helpers built on top of it.
//!
//! ## Features
//!
//! - **Process handle**: Lazily fetched, individually cached attributes
//! - **Enumeration**: Every visible process, with or without a pre-filled control block
//! - **Process trees**: Parent to children maps and descendant sets
//! - **Name lookup**: Full path, command name, or path suffix matching
//!
//! ## Platform Support
//!
//! | Attribute | Linux | macOS |
//! |-----------|-------|-------|
//! | Control block | /proc/[pid]/stat | sysctl KERN_PROC_PID |
//! | uid / gid | owner of /proc/[pid] | kinfo_proc e_pcred |
//! | Groups | /proc/[pid]/status | kinfo_proc e_ucred |
//! | Footprint | stat vsize | proc_pid_rusage |
//! | Path | /proc/[pid]/exe | proc_pidpath |
//! | argv / environment | /proc/[pid]/cmdline, environ | sysctl KERN_PROCARGS2 |
//!
//! ## Caching
//!
//! Each attribute is fetched on first use and kept until [`Process::clean`]
//! is called or a [`Refresh::Force`] accessor replaces it. A failed fetch
//! caches nothing, so the next call retries. A handle is `Send`, but
//! accessors take `&mut self`; sharing one handle between threads needs
//! external locking.
//!
//! ## Example
//!
//! ```rust,no_run
//! use procscope_proc::{process_by_pid, Refresh};
//!
//! let mut me = process_by_pid(std::process::id()).unwrap();
//! println!("{} (ppid {})", me.command().unwrap(), me.ppid().unwrap());
//! println!("footprint: {} bytes", me.footprint(Refresh::Force).unwrap());
//!
//! for p in procscope_proc::processes_by_name("sshd").unwrap() {
//!     println!("sshd: {}", p.pid());
//! }
//! ```

use std::collections::HashMap;

use procscope_core::{ProcscopeError, ProcscopeResult};

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("procscope-proc supports Linux and macOS only");

mod dev;
mod matcher;
mod tree;

// Binary decoders are platform-neutral and unit tested everywhere
#[cfg(any(target_os = "macos", test))]
mod cursor;
#[cfg(any(target_os = "macos", test))]
mod fetch;
#[cfg(any(target_os = "macos", test))]
mod kinfo;
#[cfg(any(target_os = "macos", test))]
mod procargs;
#[cfg(any(target_os = "macos", test))]
mod rusage;

#[cfg(any(target_os = "linux", test))]
mod stat;
#[cfg(any(target_os = "linux", test))]
mod status;

// Platform-specific implementations
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
use linux as platform;
#[cfg(target_os = "macos")]
use macos as platform;

pub use dev::{device_names, device_names_loaded, reset_device_names, DevT, NO_DEV};
pub use matcher::{processes_by_name, NamePattern, COMM_LEN};
pub use tree::{children, descendants, process_map, ProcessMap};

#[cfg(target_os = "linux")]
pub use linux::FsStat;
#[cfg(target_os = "linux")]
pub use stat::Stat;
#[cfg(target_os = "linux")]
pub use status::{Creds, StatusValue};

#[cfg(target_os = "macos")]
pub use kinfo::{flags, ITimerval, KInfoProc, RunState, Timeval, KINFO_PROC_SIZE};
#[cfg(target_os = "macos")]
pub use macos::maxproc;
#[cfg(target_os = "macos")]
pub use procargs::ProcArgs;
#[cfg(target_os = "macos")]
pub use rusage::{RUsage, RUSAGE_INFO_V5_SIZE};

// ============================================================================
// Core Types
// ============================================================================

/// Whether an accessor may answer from its cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Refresh {
    /// Return the cached value if there is one.
    #[default]
    Cached,
    /// Discard any cached value and query the kernel again.
    Force,
}

/// How much [`processes`] fetches up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fill {
    /// Pids only; every attribute is fetched on first access.
    Lazy,
    /// Pre-fill each handle's control block, dropping processes that
    /// exit or become unreadable while being listed.
    #[default]
    Eager,
}

/// The attribute set each platform provides for one pid.
///
/// Exactly one implementation is compiled in. Every method follows the
/// same contract: answer from the cache when allowed, otherwise fetch
/// once, cache on success, and cache nothing on failure.
pub(crate) trait Attributes: Default {
    /// Fetch the control block (the record eager enumeration pre-fills).
    fn fill(&mut self, pid: u32) -> ProcscopeResult<()>;
    fn ppid(&mut self, pid: u32) -> ProcscopeResult<u32>;
    fn uid(&mut self, pid: u32) -> ProcscopeResult<u32>;
    fn gid(&mut self, pid: u32) -> ProcscopeResult<u32>;
    fn groups(&mut self, pid: u32) -> ProcscopeResult<Vec<u32>>;
    fn tty(&mut self, pid: u32) -> ProcscopeResult<DevT>;
    fn footprint(&mut self, pid: u32, refresh: Refresh) -> ProcscopeResult<u64>;
    fn path(&mut self, pid: u32) -> ProcscopeResult<&str>;
    fn command(&mut self, pid: u32) -> ProcscopeResult<String>;
    fn argv(&mut self, pid: u32) -> ProcscopeResult<&[String]>;
    fn environ(&mut self, pid: u32) -> ProcscopeResult<&HashMap<String, String>>;
    /// Drop every cached field.
    fn clean(&mut self);
    /// True when no field is cached.
    fn is_clean(&self) -> bool;
}

/// A handle on one process id.
///
/// The pid is never re-validated: if the process exits, accessors start
/// failing with `NotFound` while already-cached values stay readable.
#[derive(Debug, Default)]
pub struct Process {
    pid: u32,
    children: Vec<u32>,
    cache: platform::Cache,
}

impl Process {
    /// An unfilled handle. Nothing is fetched until an accessor is called.
    pub fn new(pid: u32) -> Self {
        Process {
            pid,
            children: Vec::new(),
            cache: platform::Cache::default(),
        }
    }

    pub(crate) fn with_cache(pid: u32, cache: platform::Cache) -> Self {
        Process {
            pid,
            children: Vec::new(),
            cache,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Direct child pids in enumeration order.
    ///
    /// Only populated for handles owned by a [`ProcessMap`].
    pub fn children(&self) -> &[u32] {
        &self.children
    }

    pub(crate) fn set_children(&mut self, children: Vec<u32>) {
        self.children = children;
    }

    pub fn ppid(&mut self) -> ProcscopeResult<u32> {
        self.cache.ppid(self.pid)
    }

    /// Real user id.
    pub fn uid(&mut self) -> ProcscopeResult<u32> {
        self.cache.uid(self.pid)
    }

    /// Real group id.
    pub fn gid(&mut self) -> ProcscopeResult<u32> {
        self.cache.gid(self.pid)
    }

    /// Supplementary group ids.
    pub fn groups(&mut self) -> ProcscopeResult<Vec<u32>> {
        self.cache.groups(self.pid)
    }

    /// Controlling terminal device number ([`NO_DEV`] when there is none).
    pub fn tty_device(&mut self) -> ProcscopeResult<DevT> {
        self.cache.tty(self.pid)
    }

    /// Controlling terminal name, e.g. `pts/3` or `ttys001`; `-` for none.
    pub fn tty(&mut self) -> ProcscopeResult<String> {
        Ok(self.tty_device()?.to_string())
    }

    /// Memory footprint in bytes.
    ///
    /// macOS reports the physical footprint, Linux the virtual size.
    pub fn footprint(&mut self, refresh: Refresh) -> ProcscopeResult<u64> {
        self.cache.footprint(self.pid, refresh)
    }

    /// Resolved executable path.
    pub fn path(&mut self) -> ProcscopeResult<&str> {
        self.cache.path(self.pid)
    }

    /// Command name: the last segment of [`Process::path`].
    ///
    /// On Linux, falls back to the kernel's (15 byte) `comm` when the path
    /// cannot be read.
    pub fn command(&mut self) -> ProcscopeResult<String> {
        self.cache.command(self.pid)
    }

    pub fn argv(&mut self) -> ProcscopeResult<&[String]> {
        self.cache.argv(self.pid)
    }

    pub fn environ(&mut self) -> ProcscopeResult<&HashMap<String, String>> {
        self.cache.environ(self.pid)
    }

    /// One environment variable.
    ///
    /// # Errors
    ///
    /// Returns `Unset` if the environment was read but has no `name`.
    /// Failing to read the environment at all is reported as-is
    /// (`NotFound`, `PermissionDenied`, ...).
    pub fn value(&mut self, name: &str) -> ProcscopeResult<&str> {
        self.environ()?
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ProcscopeError::unset(name))
    }

    /// Forget every cached attribute. The pid and child list are kept.
    pub fn clean(&mut self) {
        self.cache.clean();
    }

    /// True when no attribute is cached.
    pub fn is_clean(&self) -> bool {
        self.cache.is_clean()
    }
}

/// Return the value in `slot`, fetching it first if empty or forced.
///
/// A forced refresh stores a fresh allocation, so callers can tell a
/// refetched value from a cached one by address. A failed fetch leaves the
/// slot empty.
pub(crate) fn cached<T>(
    slot: &mut Option<Box<T>>,
    refresh: Refresh,
    fetch: impl FnOnce() -> ProcscopeResult<T>,
) -> ProcscopeResult<&T> {
    if refresh == Refresh::Force || slot.is_none() {
        match fetch() {
            Ok(value) => *slot = Some(Box::new(value)),
            Err(e) => {
                *slot = None;
                return Err(e);
            }
        }
    }
    slot.as_deref()
        .ok_or_else(|| ProcscopeError::internal("cache slot empty after fill"))
}

/// Last `/`-separated segment of a path.
pub(crate) fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ============================================================================
// Enumeration
// ============================================================================

/// Every visible process, excluding pid 0.
///
/// With [`Fill::Eager`] each handle's control block is already cached and
/// processes that could not be read are left out.
pub fn processes(fill: Fill) -> ProcscopeResult<Vec<Process>> {
    platform::processes(fill)
}

/// A handle for `pid` with its control block filled.
///
/// # Errors
///
/// Returns `InvalidArgument` for pid 0.
/// Returns `NotFound` if the process does not exist.
/// Returns `PermissionDenied` if the process cannot be read.
pub fn process_by_pid(pid: u32) -> ProcscopeResult<Process> {
    if pid == 0 {
        return Err(ProcscopeError::invalid_argument("PID 0 is not valid"));
    }
    let mut process = Process::new(pid);
    process.cache.fill(pid)?;
    Ok(process)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
impl Process {
    /// A handle whose control block claims the given parent.
    pub(crate) fn fake(pid: u32, ppid: u32) -> Self {
        Process::with_cache(pid, platform::Cache::with_ppid(pid, ppid))
    }
}
