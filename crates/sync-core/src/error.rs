//! Core error types.

use thiserror::Error;

/// Errors raised while decoding protocol values or talking to the action log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An action mapping without a string `type` field.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// A meta mapping that could not be decoded.
    #[error("Invalid meta: {0}")]
    InvalidMeta(String),

    /// A command tuple that does not match any known command shape.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// An answer tuple whose tag is not part of the protocol vocabulary.
    #[error("Unknown answer: {0}")]
    UnknownAnswer(String),

    /// A resend payload that violates the allow-list rules.
    #[error("Invalid resend data: {0}")]
    InvalidResend(String),

    /// Action log storage failure.
    #[error("Log error: {0}")]
    Log(String),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
