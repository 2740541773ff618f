//! Error types for procscope operations.
//!
//! This module defines the error taxonomy shared by every procscope crate:
//! - [`ProcscopeError`] - Canonical error type for all procscope operations
//!
//! ## Design Principles
//!
//! - **Structured**: Errors carry typed context (pid, operation, record) not just messages
//! - **Distinguishable**: "not set" and "not found" are predicates, never string matches
//! - **ABI-aligned**: Uses `u32` for PIDs (unsigned for cross-platform consistency)
//! - **Verbatim**: Kernel failures keep their errno

use std::io;
use thiserror::Error;

// ============================================================================
// Canonical Error Type
// ============================================================================

/// Canonical error type for all procscope operations.
///
/// ## Error Code Mapping
///
/// | Variant | Code |
/// |---------|------|
/// | `InvalidArgument` | 1 |
/// | `PermissionDenied` | 4 |
/// | `NotFound` | 5 |
/// | `Unset` | 6 |
/// | `Decode` | 7 |
/// | `System` | 8 |
/// | `LayoutMismatch` | 9 |
/// | `Internal` | 99 |
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcscopeError {
    /// Invalid argument provided.
    ///
    /// Returned when input validation fails (e.g., pid = 0).
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of what was invalid.
        message: String,
    },

    /// Permission denied for the operation.
    ///
    /// Typically returned when reading another user's process.
    #[error("Permission denied for '{operation}' on PID {pid}")]
    PermissionDenied {
        /// The process ID we attempted to inspect.
        pid: u32,
        /// The operation that was denied (e.g., "read path").
        operation: String,
    },

    /// Target process not found.
    ///
    /// The specified PID does not exist or has already exited.
    #[error("Process {pid} not found")]
    NotFound {
        /// The process ID that was not found.
        pid: u32,
    },

    /// A requested key is absent from an otherwise successful fetch.
    ///
    /// Used for environment variables and `/proc/<pid>/status` keys.
    #[error("{name} is not set")]
    Unset {
        /// The key that was requested.
        name: String,
    },

    /// A kernel record could not be parsed.
    ///
    /// Recoverable: nothing is cached and the next access retries.
    #[error("Failed to decode {record}: {message}")]
    Decode {
        /// The record being decoded (e.g., "stat").
        record: &'static str,
        /// What went wrong.
        message: String,
    },

    /// System-level error with errno context.
    ///
    /// Used when a kernel query fails with an unexpected error code.
    #[error("System error: {message} (errno: {errno})")]
    System {
        /// Description of the error.
        message: String,
        /// The errno value.
        errno: i32,
    },

    /// The compiled structure layout disagrees with the running kernel.
    ///
    /// Fatal: decoders refuse to operate once this has been observed.
    #[error("{structure} layout mismatch: decoder expects {expected} bytes, platform reports {actual}")]
    LayoutMismatch {
        /// The kernel structure name.
        structure: &'static str,
        /// Size the decoder was built for.
        expected: usize,
        /// Size the platform reported.
        actual: usize,
    },

    /// Internal error (should not happen in normal operation).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl ProcscopeError {
    /// Get the stable numeric code for this error.
    ///
    /// The CLI uses it as its exit status.
    pub fn error_code(&self) -> i32 {
        match self {
            ProcscopeError::InvalidArgument { .. } => 1,
            ProcscopeError::PermissionDenied { .. } => 4,
            ProcscopeError::NotFound { .. } => 5,
            ProcscopeError::Unset { .. } => 6,
            ProcscopeError::Decode { .. } => 7,
            ProcscopeError::System { .. } => 8,
            ProcscopeError::LayoutMismatch { .. } => 9,
            ProcscopeError::Internal { .. } => 99,
        }
    }

    /// True if the process does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcscopeError::NotFound { .. })
    }

    /// True if the kernel refused access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ProcscopeError::PermissionDenied { .. })
    }

    /// True if a requested variable or key was absent.
    pub fn is_unset(&self) -> bool {
        matches!(self, ProcscopeError::Unset { .. })
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl ProcscopeError {
    /// Create an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ProcscopeError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a `PermissionDenied` error.
    pub fn permission_denied(pid: u32, operation: impl Into<String>) -> Self {
        ProcscopeError::PermissionDenied {
            pid,
            operation: operation.into(),
        }
    }

    /// Create a `NotFound` error.
    pub fn not_found(pid: u32) -> Self {
        ProcscopeError::NotFound { pid }
    }

    /// Create an `Unset` error.
    pub fn unset(name: impl Into<String>) -> Self {
        ProcscopeError::Unset { name: name.into() }
    }

    /// Create a `Decode` error.
    pub fn decode(record: &'static str, message: impl Into<String>) -> Self {
        ProcscopeError::Decode {
            record,
            message: message.into(),
        }
    }

    /// Create a `System` error.
    pub fn system(message: impl Into<String>, errno: i32) -> Self {
        ProcscopeError::System {
            message: message.into(),
            errno,
        }
    }

    /// Create a `LayoutMismatch` error.
    pub fn layout_mismatch(structure: &'static str, expected: usize, actual: usize) -> Self {
        ProcscopeError::LayoutMismatch {
            structure,
            expected,
            actual,
        }
    }

    /// Create an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        ProcscopeError::Internal {
            message: message.into(),
        }
    }

    /// Map an IO error from a per-process query.
    ///
    /// Missing entries and `ESRCH` become `NotFound`; `EPERM`/`EACCES` become
    /// `PermissionDenied`; anything else keeps its errno as `System`.
    pub fn from_io(err: &io::Error, pid: u32, operation: &str) -> Self {
        #[cfg(unix)]
        {
            match err.raw_os_error() {
                Some(libc::ESRCH) | Some(libc::ENOENT) => return ProcscopeError::not_found(pid),
                Some(libc::EPERM) | Some(libc::EACCES) => {
                    return ProcscopeError::permission_denied(pid, operation)
                }
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::NotFound => ProcscopeError::not_found(pid),
            io::ErrorKind::PermissionDenied => ProcscopeError::permission_denied(pid, operation),
            _ => ProcscopeError::system(
                format!("{operation} failed for PID {pid}: {err}"),
                err.raw_os_error().unwrap_or(0),
            ),
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for procscope operations.
pub type ProcscopeResult<T> = Result<T, ProcscopeError>;

// ============================================================================
// Tests
// ============================================================================
