use std::time::Duration;

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Typed outcome of every store operation. The network layer decides which
/// status code each kind becomes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Identity or durable snapshot absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed identity, kind or value. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient connectivity failure; safe to retry with backoff.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Durable snapshot could not be parsed.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// Deadline exceeded before the operation landed.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a backend may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
