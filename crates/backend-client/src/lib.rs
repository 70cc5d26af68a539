//! Backend protocol client.
//!
//! Each command is sent as its own `POST {version, secret, commands: [cmd]}`.
//! The response body is a JSON array of answer tuples, decoded incrementally
//! and handed to an [`AnswerHandler`] one answer at a time.

mod client;
mod error;

pub use client::{AnswerHandler, BackendClient, BackendConfig, BACKEND_PROTOCOL_VERSION};
pub use error::{BackendError, BackendResult};
