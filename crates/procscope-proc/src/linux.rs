//! Linux implementation over the `/proc` filesystem.
//!
//! Uses:
//! - `/proc/[pid]/stat` - control block (ppid, tty, vsize, comm)
//! - `/proc/[pid]/status` - groups and the key/value status map
//! - `/proc/[pid]/exe` - resolved executable path
//! - `/proc/[pid]/cmdline`, `/proc/[pid]/environ` - NUL-separated strings
//! - `stat("/proc/[pid]")` - owner uid/gid

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use procscope_core::{ProcscopeError, ProcscopeResult};
use serde::Serialize;

use crate::stat::Stat;
use crate::status::{find_status_value, parse_status, StatusValue};
use crate::{base_name, cached, Attributes, DevT, Fill, Process, Refresh, NO_DEV};

/// Length the kernel truncates `comm` to (`TASK_COMM_LEN - 1`).
pub(crate) const COMM_LEN: usize = 15;

/// Owner and mode of `/proc/[pid]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FsStat {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Cache {
    stat: Option<Box<Stat>>,
    fs_stat: Option<Box<FsStat>>,
    status: Option<Box<HashMap<String, StatusValue>>>,
    path: Option<Box<String>>,
    argv: Option<Box<Vec<String>>>,
    env: Option<Box<HashMap<String, String>>>,
}

fn proc_path(pid: u32, name: &str) -> PathBuf {
    let mut path = PathBuf::from(format!("/proc/{pid}"));
    if !name.is_empty() {
        path.push(name);
    }
    path
}

fn read_proc(pid: u32, name: &str, operation: &str) -> ProcscopeResult<Vec<u8>> {
    fs::read(proc_path(pid, name)).map_err(|e| ProcscopeError::from_io(&e, pid, operation))
}

fn read_proc_string(pid: u32, name: &str, operation: &str) -> ProcscopeResult<String> {
    let data = read_proc(pid, name, operation)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn read_stat(pid: u32) -> ProcscopeResult<Stat> {
    Stat::parse(&read_proc_string(pid, "stat", "read stat")?)
}

fn read_fs_stat(pid: u32) -> ProcscopeResult<FsStat> {
    let meta = fs::metadata(proc_path(pid, ""))
        .map_err(|e| ProcscopeError::from_io(&e, pid, "stat proc directory"))?;
    Ok(FsStat {
        uid: meta.uid(),
        gid: meta.gid(),
        mode: meta.mode(),
    })
}

fn read_exe(pid: u32) -> ProcscopeResult<String> {
    let target = fs::read_link(proc_path(pid, "exe"))
        .map_err(|e| ProcscopeError::from_io(&e, pid, "read executable path"))?;
    Ok(target.to_string_lossy().into_owned())
}

/// Split a NUL-separated blob. One trailing NUL is dropped; empty is `[]`.
fn split_nul(data: &[u8]) -> Vec<String> {
    let data = data.strip_suffix(&[0]).unwrap_or(data);
    if data.is_empty() {
        return Vec::new();
    }
    data.split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn parse_environ(data: &[u8]) -> HashMap<String, String> {
    split_nul(data)
        .into_iter()
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (entry, String::new()),
        })
        .collect()
}

impl Cache {
    fn stat(&mut self, pid: u32, refresh: Refresh) -> ProcscopeResult<&Stat> {
        cached(&mut self.stat, refresh, || read_stat(pid))
    }

    fn fs_stat(&mut self, pid: u32) -> ProcscopeResult<FsStat> {
        cached(&mut self.fs_stat, Refresh::Cached, || read_fs_stat(pid)).copied()
    }

    fn status(
        &mut self,
        pid: u32,
        refresh: Refresh,
    ) -> ProcscopeResult<&HashMap<String, StatusValue>> {
        cached(&mut self.status, refresh, || {
            Ok(parse_status(&read_proc_string(pid, "status", "read status")?))
        })
    }

    #[cfg(test)]
    pub(crate) fn with_ppid(pid: u32, ppid: u32) -> Self {
        Cache {
            stat: Some(Box::new(Stat {
                pid: pid as i32,
                ppid: ppid as i32,
                state: 'S',
                ..Default::default()
            })),
            ..Default::default()
        }
    }
}

impl Attributes for Cache {
    fn fill(&mut self, pid: u32) -> ProcscopeResult<()> {
        self.stat(pid, Refresh::Cached).map(|_| ())
    }

    fn ppid(&mut self, pid: u32) -> ProcscopeResult<u32> {
        Ok(self.stat(pid, Refresh::Cached)?.ppid.max(0) as u32)
    }

    fn uid(&mut self, pid: u32) -> ProcscopeResult<u32> {
        Ok(self.fs_stat(pid)?.uid)
    }

    fn gid(&mut self, pid: u32) -> ProcscopeResult<u32> {
        Ok(self.fs_stat(pid)?.gid)
    }

    fn groups(&mut self, pid: u32) -> ProcscopeResult<Vec<u32>> {
        let status = self.status(pid, Refresh::Cached)?;
        let value = status
            .get("Groups")
            .ok_or_else(|| ProcscopeError::unset("Groups"))?;
        value
            .as_array()?
            .into_iter()
            .map(|g| {
                u32::try_from(g)
                    .map_err(|_| ProcscopeError::decode("status", format!("group id {g} out of range")))
            })
            .collect()
    }

    fn tty(&mut self, pid: u32) -> ProcscopeResult<DevT> {
        let tty_nr = self.stat(pid, Refresh::Cached)?.tty_nr;
        Ok(if tty_nr == 0 {
            NO_DEV
        } else {
            DevT(tty_nr as u32)
        })
    }

    fn footprint(&mut self, pid: u32, refresh: Refresh) -> ProcscopeResult<u64> {
        Ok(self.stat(pid, refresh)?.vsize)
    }

    fn path(&mut self, pid: u32) -> ProcscopeResult<&str> {
        cached(&mut self.path, Refresh::Cached, || read_exe(pid)).map(String::as_str)
    }

    fn command(&mut self, pid: u32) -> ProcscopeResult<String> {
        match self.path(pid) {
            Ok(path) => Ok(base_name(path).to_string()),
            Err(_) => Ok(self.stat(pid, Refresh::Cached)?.comm.clone()),
        }
    }

    fn argv(&mut self, pid: u32) -> ProcscopeResult<&[String]> {
        cached(&mut self.argv, Refresh::Cached, || {
            Ok(split_nul(&read_proc(pid, "cmdline", "read cmdline")?))
        })
        .map(Vec::as_slice)
    }

    fn environ(&mut self, pid: u32) -> ProcscopeResult<&HashMap<String, String>> {
        cached(&mut self.env, Refresh::Cached, || {
            Ok(parse_environ(&read_proc(pid, "environ", "read environment")?))
        })
    }

    fn clean(&mut self) {
        *self = Cache::default();
    }

    fn is_clean(&self) -> bool {
        self.stat.is_none()
            && self.fs_stat.is_none()
            && self.status.is_none()
            && self.path.is_none()
            && self.argv.is_none()
            && self.env.is_none()
    }
}

// ============================================================================
// Linux-only accessors
// ============================================================================

impl Process {
    /// The decoded `/proc/[pid]/stat` record.
    pub fn stat(&mut self, refresh: Refresh) -> ProcscopeResult<&Stat> {
        self.cache.stat(self.pid, refresh)
    }

    /// Every key of `/proc/[pid]/status`.
    pub fn status_map(&mut self, refresh: Refresh) -> ProcscopeResult<&HashMap<String, StatusValue>> {
        self.cache.status(self.pid, refresh)
    }

    /// A single status key, read fresh from `/proc/[pid]/status` on every call.
    ///
    /// # Errors
    ///
    /// Returns `Unset` if the file was read but has no such key.
    pub fn status_value(&mut self, name: &str) -> ProcscopeResult<StatusValue> {
        let text = read_proc_string(self.pid, "status", "read status")?;
        find_status_value(&text, name)
    }

    /// Owner and mode of `/proc/[pid]`.
    pub fn fs_stat(&mut self) -> ProcscopeResult<FsStat> {
        self.cache.fs_stat(self.pid)
    }
}

// ============================================================================
// Enumeration
// ============================================================================

fn list_all_pids() -> ProcscopeResult<Vec<u32>> {
    let entries = fs::read_dir("/proc").map_err(|e| {
        ProcscopeError::system(
            format!("Failed to read /proc: {e}"),
            e.raw_os_error().unwrap_or(0),
        )
    })?;

    let mut pids: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .filter(|&pid| pid != 0)
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

pub(crate) fn processes(fill: Fill) -> ProcscopeResult<Vec<Process>> {
    let pids = list_all_pids()?;
    Ok(match fill {
        Fill::Lazy => pids.into_iter().map(Process::new).collect(),
        Fill::Eager => pids
            .into_iter()
            .filter_map(|pid| {
                // Silently skip processes that exited or that we can't read
                let mut process = Process::new(pid);
                process.cache.fill(pid).ok()?;
                Some(process)
            })
            .collect(),
    })
}
