//! Error types for the collector and monitor layer.
//!
//! `ProgrammingError` conditions (double registration, freeing a non-FIXED
//! object, refcount underflow) are never handed back as `Err` values a caller
//! could swallow - they abort via [`fatal`], matching the "implementations
//! must abort with diagnostics" contract. Everything else (`OutOfMemory`,
//! `IllegalMonitorState`, registry errors) is an ordinary recoverable
//! `Result`.

use std::sync::PoisonError;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GcError>;

#[derive(Debug, Error)]
pub enum GcError {
    #[error("out of memory: failed to allocate {size} bytes (class {class})")]
    OutOfMemory { size: usize, class: u32 },

    #[error("illegal monitor state: thread does not hold the monitor for address {address:#x}")]
    IllegalMonitorState { address: usize },

    #[error("allocation class {index} is already registered")]
    AlreadyRegistered { index: u32 },

    #[error("allocation class index {index} exceeds the registry bound {max}")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error("internal lock was poisoned: {0}")]
    Poisoned(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl<T> From<PoisonError<T>> for GcError {
    fn from(e: PoisonError<T>) -> Self {
        GcError::Poisoned(e.to_string())
    }
}

/// Abort the process with a diagnostic message. Used for the fatal
/// `ProgrammingError` class of bugs: these indicate a broken invariant in the
/// mutator or the collector itself, not a recoverable runtime condition, so
/// there is no `Err` path for them.
#[inline(never)]
#[cold]
pub fn fatal(message: impl std::fmt::Display) -> ! {
    log::error!("fatal collector error: {message}");
    panic!("fatal collector error: {message}");
}
