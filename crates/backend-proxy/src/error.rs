//! Proxy error types.

use backend_client::BackendError;
use thiserror::Error;

/// Why an exchange failed. Every variant is fatal to its own exchange only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Backend sent resend after access was decided")]
    ResendAfterAccess,

    #[error("Backend sent resend for a subscription")]
    ResendOnSubscription,

    #[error("Backend sent processed before approved")]
    ProcessedBeforeAccess,

    #[error("Invalid resend data: {0}")]
    InvalidResendData(String),

    #[error("Backend did not send required answers")]
    IncompleteAnswer,

    #[error("Unexpected {0} answer")]
    UnexpectedAnswer(String),

    #[error("No backend exchange for action {0}")]
    ExchangeNotFound(String),

    #[error("Action {0} is already being sent to the backend")]
    DuplicateAction(String),

    #[error("Backend exchange ended without an outcome")]
    OutcomeDropped,

    #[error("Too many failed authentication attempts")]
    Bruteforce,
}

/// Result type alias using ProxyError.
pub type ProxyResult<T> = Result<T, ProxyError>;
