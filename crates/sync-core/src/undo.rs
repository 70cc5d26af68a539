//! Undo records sent back to the author of a rejected action.

use crate::action::UNDO_TYPE;
use crate::{Action, Meta};
use serde_json::Value;

/// Reason attached to an undo record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UndoReason {
    /// The backend or a local hook refused access.
    Denied,
    /// Authorization or processing failed.
    Error,
    /// No processor exists for the action type.
    UnknownType,
    /// No processor exists for the subscribed channel.
    WrongChannel,
}

impl UndoReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoReason::Denied => "denied",
            UndoReason::Error => "error",
            UndoReason::UnknownType => "unknownType",
            UndoReason::WrongChannel => "wrongChannel",
        }
    }
}

impl std::fmt::Display for UndoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build an undo record for `action`, addressed only to its author's client.
///
/// `undo_id` and `time` come from the log that will store the record.
/// `error_message` is attached only when verbose diagnostics are enabled by
/// the caller.
pub fn undo_record(
    action: &Action,
    meta: &Meta,
    reason: UndoReason,
    undo_id: String,
    time: f64,
    error_message: Option<&str>,
) -> (Action, Meta) {
    let mut undo = Action::new(UNDO_TYPE)
        .with("id", meta.id.clone())
        .with("reason", reason.as_str())
        .with("action", action.to_value());
    if let Some(message) = error_message {
        undo = undo.with("errorMessage", Value::String(message.to_string()));
    }

    let mut undo_meta = Meta::new(undo_id, time);
    undo_meta.clients = Some(vec![meta.parsed_id().client_id]);
    undo_meta.reasons = vec![UNDO_TYPE.to_string()];
    if let Some(subprotocol) = &meta.subprotocol {
        undo_meta.subprotocol = Some(subprotocol.clone());
    }

    (undo, undo_meta)
}
