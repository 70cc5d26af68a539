//! Queue error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Lane list must contain \"main\"")]
    MissingMainLane,

    #[error("Duplicate lane name: {0}")]
    DuplicateLane(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
