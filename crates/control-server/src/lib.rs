//! HTTP control plane.
//!
//! Operators and the backend talk to the server through secret-gated
//! routes:
//! - `command` routes accept `POST` envelopes
//!   `{version, secret, commands: [[kind, ...], ...]}`
//! - `request` routes answer `GET /<path>?<secret>`, or skip the secret
//!   when marked safe
//!
//! Wrong secrets count against the caller's address in a shared
//! [`bruteforce_guard::BruteforceGuard`]; locked addresses get 429.

mod error;
mod route;
mod server;

pub use error::{ControlError, ControlResult};
pub use route::{
    CommandRoute, ControlRequest, ControlRoute, HealthRoute, MetricsRoute, RequestRoute,
    RouteResponse,
};
pub use server::{ControlServer, CONTROL_PROTOCOL_VERSION};
