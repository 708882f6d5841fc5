/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lock-free primitive errors with serialization support
///
/// Lost CAS races never show up here: they are consumed by the retry loops.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LockFreeError {
    #[error("Node allocation of {size} bytes failed")]
    #[diagnostic(
        code(lockfree::allocation_failed),
        help("The allocator is out of memory. Shed load or retry once memory is released.")
    )]
    AllocationFailed { size: usize },

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(lockfree::invalid_config),
        help("Check the tuning values against the documented bounds.")
    )]
    InvalidConfig(String),
}

/// Result alias for fallible lock-free operations
pub type LockFreeResult<T> = Result<T, LockFreeError>;

/// Error returned by [`LockFreeStack::push`](crate::core::sync::LockFreeStack::push)
///
/// The rejected value is handed back so the caller can retry or drop it.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum PushError<T> {
    /// The node holding the value could not be allocated
    AllocationFailed { value: T, size: usize },
}

impl<T> PushError<T> {
    /// Recover the value that was not pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::AllocationFailed { value, .. } => value,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::AllocationFailed { size, .. } => f
                .debug_struct("AllocationFailed")
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::AllocationFailed { size, .. } => {
                write!(f, "pushing on a stack whose node allocation of {} bytes failed", size)
            }
        }
    }
}

impl<T> std::error::Error for PushError<T> {}

impl<T> From<PushError<T>> for LockFreeError {
    fn from(err: PushError<T>) -> Self {
        match err {
            PushError::AllocationFailed { size, .. } => LockFreeError::AllocationFailed { size },
        }
    }
}
