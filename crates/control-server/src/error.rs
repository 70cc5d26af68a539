//! Control-plane failures and their HTTP statuses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Unknown route: {0}")]
    NotFound(String),

    #[error("Method not allowed for {0}")]
    MethodNotAllowed(String),

    #[error("Invalid body: {0}")]
    InvalidBody(String),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u64),

    #[error("Too many wrong secrets")]
    TooManyAttempts,

    #[error("Wrong secret")]
    WrongSecret,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Route failed: {0}")]
    RouteFailed(String),
}

impl ControlError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidBody(_) | Self::UnsupportedVersion(_) | Self::InvalidCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::WrongSecret => StatusCode::FORBIDDEN,
            Self::RouteFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        // Route failures can carry backend or log details.
        let body = match &self {
            Self::RouteFailed(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (self.status_code(), body).into_response()
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
