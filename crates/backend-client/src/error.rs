//! Backend client error types.

use thiserror::Error;

/// Failures of one backend round-trip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend answer is not valid JSON: {0}")]
    MalformedAnswer(String),

    #[error("Backend responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("Backend reported an error: {0}")]
    ReportedError(String),

    #[error("Unknown backend answer: {0}")]
    UnknownAnswer(String),

    #[error("Backend answer was empty")]
    EmptyAnswer,

    #[error("Backend request failed: {0}")]
    Network(String),

    #[error("Backend did not answer within {0} ms")]
    Timeout(u64),
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;
