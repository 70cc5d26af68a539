//! Shared types for the sync server's action pipeline.
//!
//! This crate provides:
//! - `Action` / `Meta`: the action and its routing envelope
//! - `Command` / `Answer`: the backend protocol tuples
//! - `Resend`, undo records and id parsing
//! - Ports for the collaborators the pipeline drives: `ActionLog`,
//!   `HookRegistry` / `ActionHooks`, `Authenticator` and `Reporter`
//! - `MemoryLog`, an in-process `ActionLog`

mod action;
mod command;
mod error;
mod hooks;
mod log;
mod meta;
mod report;
mod resend;
mod undo;

pub use action::{Action, SUBSCRIBE_TYPE, UNDO_TYPE, UNSUBSCRIBE_TYPE};
pub use command::{Answer, Command};
pub use error::{CoreError, CoreResult};
pub use hooks::{
    Access, ActionHooks, AuthRequest, Authenticator, ChannelPattern, HookContext, HookRegistry,
    HookResult, UnknownKind,
};
pub use log::{now_ms, ActionLog, MemoryLog};
pub use meta::{parse_id, parse_node_id, Meta, ParsedId};
pub use report::{MetricsReporter, RecordingReporter, ReportEvent, Reporter, TracingReporter};
pub use resend::{Resend, RESEND_KEYS};
pub use undo::{undo_record, UndoReason};
