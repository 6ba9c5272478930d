//! Error types for the seqmux scheduler.
//!
//! Library code uses the specific [`SchedulerError`] variants; the
//! [`Status`] alias is the unit of propagation through completion
//! callbacks. Errors are `Clone` because a batch completion fans a single
//! status out to every payload's callback.

use thiserror::Error;

/// Errors surfaced by the sequence scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The request (or configuration) is malformed. Reported to the caller
    /// through its completion callback at admission time, or returned from
    /// scheduler construction.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was violated. Logged at error level; execution
    /// continues.
    #[error("internal: {0}")]
    Internal(String),

    /// The backend failed while executing a batch. Stamped onto payloads by
    /// the backend and relayed to each completion callback.
    #[error("backend: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Result of scheduling and executing one request.
pub type Status = Result<(), SchedulerError>;
