//! Find processes by name.
//!
//! The form of the requested name picks how it is compared:
//!
//! - `/bin/ps` (leading slash): the executable path must be exactly this.
//! - `sh` (no slash): the command name must equal it, or equal it cut to
//!   the kernel's command-name limit. `sh` never matches `ksh`.
//! - `bin/foo` (inner slash): the path must end in `/bin/foo`, so
//!   `/usr/bin/foo` matches and `/usr/sbin/foo` does not.
//!
//! Processes whose path or command cannot be read (usually someone else's
//! process) are skipped rather than reported.

use std::borrow::Cow;

use procscope_core::ProcscopeResult;

use crate::{processes, Fill, Process};

/// Longest command name the kernel reports when the path is unreadable.
///
/// Linux keeps 15 bytes of `comm`; macOS names always come from the path.
#[cfg(target_os = "linux")]
pub const COMM_LEN: Option<usize> = Some(crate::linux::COMM_LEN);

#[cfg(not(target_os = "linux"))]
pub const COMM_LEN: Option<usize> = None;

/// A parsed process-name query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    /// Exact executable path.
    FullPath(String),
    /// Command name, plus the same name cut to the kernel limit.
    Command { name: String, short: String },
    /// Path suffix, stored with its leading `/`.
    PathSuffix(String),
}

/// What the matcher needs from a candidate process.
pub(crate) trait NameSource {
    fn resolved_path(&mut self) -> Option<&str>;
    fn resolved_command(&mut self) -> Option<String>;
}

impl NameSource for Process {
    fn resolved_path(&mut self) -> Option<&str> {
        self.path().ok()
    }

    fn resolved_command(&mut self) -> Option<String> {
        self.command().ok()
    }
}

impl NamePattern {
    /// Classify `name`. Returns `None` for an empty name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::parse_with_limit(name, COMM_LEN)
    }

    fn parse_with_limit(name: &str, comm_len: Option<usize>) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        Some(match name.find('/') {
            Some(0) => NamePattern::FullPath(name.to_string()),
            Some(_) => NamePattern::PathSuffix(format!("/{name}")),
            None => NamePattern::Command {
                name: name.to_string(),
                short: truncate(name, comm_len).into_owned(),
            },
        })
    }

    pub(crate) fn matches<S: NameSource>(&self, candidate: &mut S) -> bool {
        match self {
            NamePattern::FullPath(path) => candidate.resolved_path() == Some(path.as_str()),
            NamePattern::PathSuffix(suffix) => candidate
                .resolved_path()
                .is_some_and(|path| path.ends_with(suffix.as_str())),
            NamePattern::Command { name, short } => candidate
                .resolved_command()
                .is_some_and(|cmd| cmd == *name || cmd == *short),
        }
    }

    /// Keep the processes that match, in their original order.
    pub fn filter(&self, processes: Vec<Process>) -> Vec<Process> {
        processes
            .into_iter()
            .filter_map(|mut p| self.matches(&mut p).then_some(p))
            .collect()
    }
}

/// Cut `name` to exactly `limit` bytes, the way the kernel cuts `comm`.
///
/// A multi-byte character split by the cut decodes to U+FFFD, matching the
/// lossy decoding of the kernel's truncated name.
fn truncate(name: &str, limit: Option<usize>) -> Cow<'_, str> {
    match limit {
        Some(limit) if name.len() > limit => String::from_utf8_lossy(&name.as_bytes()[..limit]),
        _ => Cow::Borrowed(name),
    }
}

/// Every process matching `name`, in enumeration order.
///
/// An empty name or no match yields an empty list.
pub fn processes_by_name(name: &str) -> ProcscopeResult<Vec<Process>> {
    let Some(pattern) = NamePattern::parse(name) else {
        return Ok(Vec::new());
    };
    Ok(pattern.filter(processes(Fill::Lazy)?))
}
