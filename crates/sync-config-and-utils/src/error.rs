//! Configuration errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value is present but unusable.
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Home directory could not be determined.
    #[error("Path error: {0}")]
    Path(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
