//! Parser error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    /// The body is not a well-formed JSON array.
    #[error("Malformed answer at byte {offset}: {message}")]
    MalformedAnswer { offset: usize, message: String },
}

/// Result type alias using ParserError.
pub type ParserResult<T> = Result<T, ParserError>;
