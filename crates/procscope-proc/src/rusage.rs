//! Decoder for Darwin `struct rusage_info_v5` (`proc_pid_rusage`).
//!
//! The kernel writes the record into a caller buffer with no length
//! handshake, so the buffer handed to it is oversized and 8-byte aligned;
//! only the first [`RUSAGE_INFO_V5_SIZE`] bytes are decoded.

use std::sync::OnceLock;

use procscope_core::{ProcscopeError, ProcscopeResult};
use serde::Serialize;

use crate::cursor::Cursor;

/// `RUSAGE_INFO_V5` flavor for `proc_pid_rusage`.
pub const RUSAGE_INFO_V5: i32 = 5;

/// `sizeof(struct rusage_info_v5)`: 16-byte uuid plus 36 `uint64_t`.
pub const RUSAGE_INFO_V5_SIZE: usize = 304;

/// Size of the buffer handed to the kernel.
pub(crate) const RUSAGE_BUFFER_SIZE: usize = 512;

/// Kernel writes through this as a struct of `uint64_t`; keep it aligned.
#[repr(C, align(8))]
pub(crate) struct AlignedBuffer(pub(crate) [u8; RUSAGE_BUFFER_SIZE]);

impl AlignedBuffer {
    pub(crate) fn zeroed() -> Self {
        AlignedBuffer([0u8; RUSAGE_BUFFER_SIZE])
    }
}

/// Decoded resource-usage snapshot.
///
/// Times are Mach absolute time units as reported; sizes are bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RUsage {
    pub uuid: [u8; 16],
    pub user_time: u64,
    pub system_time: u64,
    pub pkg_idle_wkups: u64,
    pub interrupt_wkups: u64,
    pub pageins: u64,
    pub wired_size: u64,
    pub resident_size: u64,
    pub phys_footprint: u64,
    pub proc_start_abstime: u64,
    pub proc_exit_abstime: u64,
    pub child_user_time: u64,
    pub child_system_time: u64,
    pub child_pkg_idle_wkups: u64,
    pub child_interrupt_wkups: u64,
    pub child_pageins: u64,
    pub child_elapsed_abstime: u64,
    pub diskio_bytesread: u64,
    pub diskio_byteswritten: u64,
    pub cpu_time_qos_default: u64,
    pub cpu_time_qos_maintenance: u64,
    pub cpu_time_qos_background: u64,
    pub cpu_time_qos_utility: u64,
    pub cpu_time_qos_legacy: u64,
    pub cpu_time_qos_user_initiated: u64,
    pub cpu_time_qos_user_interactive: u64,
    pub billed_system_time: u64,
    pub serviced_system_time: u64,
    pub logical_writes: u64,
    pub lifetime_max_phys_footprint: u64,
    pub instructions: u64,
    pub cycles: u64,
    pub billed_energy: u64,
    pub serviced_energy: u64,
    pub interval_max_phys_footprint: u64,
    pub runnable_time: u64,
    pub flags: u64,
}

static LAYOUT_CHECK: OnceLock<ProcscopeResult<()>> = OnceLock::new();

pub(crate) fn verify_layout() -> ProcscopeResult<()> {
    LAYOUT_CHECK
        .get_or_init(|| {
            let decoded = RUsage::decoded_len();
            if decoded == RUSAGE_INFO_V5_SIZE && decoded <= RUSAGE_BUFFER_SIZE {
                Ok(())
            } else {
                Err(ProcscopeError::layout_mismatch(
                    "rusage_info_v5",
                    RUSAGE_INFO_V5_SIZE,
                    decoded,
                ))
            }
        })
        .clone()
}

impl RUsage {
    /// Decode a record from at least [`RUSAGE_INFO_V5_SIZE`] bytes.
    pub fn decode(data: &[u8]) -> ProcscopeResult<Self> {
        verify_layout()?;
        if data.len() < RUSAGE_INFO_V5_SIZE {
            return Err(ProcscopeError::decode(
                "rusage_info_v5",
                format!(
                    "expected at least {} bytes, got {}",
                    RUSAGE_INFO_V5_SIZE,
                    data.len()
                ),
            ));
        }
        Ok(Self::read(&mut Cursor::new(&data[..RUSAGE_INFO_V5_SIZE])))
    }

    pub(crate) fn decoded_len() -> usize {
        let mut c = Cursor::new(&[]);
        Self::read(&mut c);
        c.position()
    }

    fn read(c: &mut Cursor<'_>) -> Self {
        RUsage {
            uuid: c.bytes(),
            user_time: c.u64(),
            system_time: c.u64(),
            pkg_idle_wkups: c.u64(),
            interrupt_wkups: c.u64(),
            pageins: c.u64(),
            wired_size: c.u64(),
            resident_size: c.u64(),
            phys_footprint: c.u64(),
            proc_start_abstime: c.u64(),
            proc_exit_abstime: c.u64(),
            child_user_time: c.u64(),
            child_system_time: c.u64(),
            child_pkg_idle_wkups: c.u64(),
            child_interrupt_wkups: c.u64(),
            child_pageins: c.u64(),
            child_elapsed_abstime: c.u64(),
            diskio_bytesread: c.u64(),
            diskio_byteswritten: c.u64(),
            cpu_time_qos_default: c.u64(),
            cpu_time_qos_maintenance: c.u64(),
            cpu_time_qos_background: c.u64(),
            cpu_time_qos_utility: c.u64(),
            cpu_time_qos_legacy: c.u64(),
            cpu_time_qos_user_initiated: c.u64(),
            cpu_time_qos_user_interactive: c.u64(),
            billed_system_time: c.u64(),
            serviced_system_time: c.u64(),
            logical_writes: c.u64(),
            lifetime_max_phys_footprint: c.u64(),
            instructions: c.u64(),
            cycles: c.u64(),
            billed_energy: c.u64(),
            serviced_energy: c.u64(),
            interval_max_phys_footprint: c.u64(),
            runnable_time: c.u64(),
            flags: c.u64(),
        }
    }

    /// Sum of user and system CPU time.
    pub fn cpu_time(&self) -> u64 {
        self.user_time.saturating_add(self.system_time)
    }
}
