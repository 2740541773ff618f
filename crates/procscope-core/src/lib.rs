//! procscope-core: Core types, errors, and platform detection
//!
//! This crate provides the foundational types used across all procscope modules:
//! - The canonical error type [`ProcscopeError`]
//! - Schema ID constants for JSON output contracts
//! - Platform detection utilities
//!
//! ## Error Handling
//!
//! procscope uses a single error type that distinguishes kernel query
//! failures, decode failures, layout mismatches, and "not set" lookups.
//! Callers test conditions with predicates such as
//! [`ProcscopeError::is_unset`] rather than by comparing messages.

use std::env::consts::OS;

pub mod error;
pub mod schema;

// Re-export canonical error type at crate root
pub use error::{ProcscopeError, ProcscopeResult};

// ============================================================================
// Platform Detection
// ============================================================================

/// Get the current platform identifier.
///
/// Returns one of: "linux", "macos", etc.
#[inline]
pub fn get_platform() -> &'static str {
    OS
}

/// Check if the current platform has a process backend.
#[inline]
pub const fn is_supported() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos"))
}
