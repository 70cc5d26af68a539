//! Backend action proxy.
//!
//! Every action handed to [`BackendProxy`] becomes an `action` command sent
//! to the backend. The streamed answers drive an [`ActionExchange`] whose
//! access, resend and process outcomes answer the matching hooks.
//! Authentication goes through a separate `auth` command.

mod auth;
mod error;
mod exchange;
mod proxy;
mod table;

pub use error::{ProxyError, ProxyResult};
pub use exchange::{
    wait, ActionExchange, ExchangeInput, ExchangeMachine, ExchangeState, Outcome, OutcomeReceiver,
};
pub use proxy::BackendProxy;
pub use table::ExchangeTable;
