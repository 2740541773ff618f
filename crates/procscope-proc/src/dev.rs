//! Device numbers and their `/dev` names.
//!
//! A [`DevT`] renders as the name of the matching character or block
//! special file under `/dev`, or as `major/minor` when nothing matches.
//! The name table is scanned once per process and shared read-only after.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;

/// Packed device number as the kernel reports it for a controlling terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DevT(pub u32);

/// No controlling device. Always renders as `-`.
pub const NO_DEV: DevT = DevT(0xffff_ffff);

/// Bit layout of a packed device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Split {
    minor_bits: u32,
}

impl Split {
    const fn minor_mask(self) -> u32 {
        (1 << self.minor_bits) - 1
    }
}

/// 8-bit major, 8-bit minor (old `dev_t` encoding used in `tty_nr`).
const LINUX_SPLIT: Split = Split { minor_bits: 8 };

/// 8-bit major, 24-bit minor.
const DARWIN_SPLIT: Split = Split { minor_bits: 24 };

#[cfg(target_os = "linux")]
const PLATFORM_SPLIT: Split = LINUX_SPLIT;

#[cfg(not(target_os = "linux"))]
const PLATFORM_SPLIT: Split = DARWIN_SPLIT;

impl DevT {
    /// Pack `major`/`minor` using the platform layout. Excess bits are dropped.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self::pack(PLATFORM_SPLIT, major, minor)
    }

    /// Device number from `st_rdev`.
    pub fn from_rdev(rdev: u64) -> Self {
        DevT(rdev as u32)
    }

    /// Major number, or `None` for [`NO_DEV`].
    pub fn major(self) -> Option<u32> {
        self.major_in(PLATFORM_SPLIT)
    }

    /// Minor number, or `None` for [`NO_DEV`].
    pub fn minor(self) -> Option<u32> {
        self.minor_in(PLATFORM_SPLIT)
    }

    const fn pack(split: Split, major: u32, minor: u32) -> Self {
        DevT(((major & 0xff) << split.minor_bits) | (minor & split.minor_mask()))
    }

    fn major_in(self, split: Split) -> Option<u32> {
        (self != NO_DEV).then_some((self.0 >> split.minor_bits) & 0xff)
    }

    fn minor_in(self, split: Split) -> Option<u32> {
        (self != NO_DEV).then_some(self.0 & split.minor_mask())
    }
}

impl fmt::Display for DevT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NO_DEV {
            return f.write_str("-");
        }
        if let Some(name) = device_names().get(self) {
            return f.write_str(name);
        }
        match (self.major(), self.minor()) {
            (Some(major), Some(minor)) => write!(f, "{major}/{minor}"),
            _ => f.write_str("-"),
        }
    }
}

// ============================================================================
// Name cache
// ============================================================================

static DEVICE_NAMES: RwLock<Option<Arc<HashMap<DevT, String>>>> = RwLock::new(None);

#[cfg(target_os = "linux")]
const SCAN_SUBDIRECTORIES: bool = true;

#[cfg(not(target_os = "linux"))]
const SCAN_SUBDIRECTORIES: bool = false;

/// The process-wide device name table, scanning `/dev` on first use.
pub fn device_names() -> Arc<HashMap<DevT, String>> {
    {
        let guard = DEVICE_NAMES.read().unwrap_or_else(|e| e.into_inner());
        if let Some(names) = guard.as_ref() {
            return Arc::clone(names);
        }
    }

    let mut guard = DEVICE_NAMES.write().unwrap_or_else(|e| e.into_inner());
    // Another thread may have filled it while we waited for the write lock
    if let Some(names) = guard.as_ref() {
        return Arc::clone(names);
    }

    #[cfg(test)]
    SCANS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let names = Arc::new(scan_devices(Path::new("/dev"), SCAN_SUBDIRECTORIES));
    *guard = Some(Arc::clone(&names));
    names
}

/// Drop the name table so the next lookup rescans `/dev`.
pub fn reset_device_names() {
    let mut guard = DEVICE_NAMES.write().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

/// Whether the name table has been built.
pub fn device_names_loaded() -> bool {
    DEVICE_NAMES
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .is_some()
}

/// Map device numbers to names for the special files under `root`.
///
/// With `descend`, one level of subdirectories is included as `dir/entry`.
/// Entries are visited in name order; the first name seen for a number
/// wins, and top-level names beat subdirectory names. An unreadable
/// directory yields just the `NO_DEV` entry.
pub(crate) fn scan_devices(root: &Path, descend: bool) -> HashMap<DevT, String> {
    let mut names = HashMap::new();
    names.insert(NO_DEV, "-".to_string());

    let mut subdirs = Vec::new();
    for (name, meta) in sorted_entries(root) {
        let ft = meta.file_type();
        if ft.is_char_device() || ft.is_block_device() {
            names.entry(DevT::from_rdev(meta.rdev())).or_insert(name);
        } else if descend && ft.is_dir() {
            subdirs.push(name);
        }
    }

    for dir in subdirs {
        for (name, meta) in sorted_entries(&root.join(&dir)) {
            let ft = meta.file_type();
            if ft.is_char_device() || ft.is_block_device() {
                names
                    .entry(DevT::from_rdev(meta.rdev()))
                    .or_insert_with(|| format!("{dir}/{name}"));
            }
        }
    }

    names
}

/// Entry names with their (non-followed) metadata, sorted by name.
fn sorted_entries(dir: &Path) -> Vec<(String, fs::Metadata)> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<(String, fs::Metadata)> = read_dir
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            let name = entry.file_name().into_string().ok()?;
            Some((name, meta))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// Serializes tests that reset or inspect the shared name table.
/// Number of `/dev` scans `device_names` has run.
#[cfg(test)]
static SCANS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
