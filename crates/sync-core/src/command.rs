//! Backend protocol commands and answers.
//!
//! Both are JSON arrays whose first element is a tag:
//!
//! ```text
//! ["action", action, meta, headers]
//! ["auth", authId, userId, token, headers, cookie]
//!
//! ["approved", id]        ["forbidden", id]      ["resend", id, {...}]
//! ["processed", id]       ["error", id, stack]   ["unknownAction", id]
//! ["unknownChannel", id]  ["authenticated", authId]  ["denied", authId]
//! ```

use crate::action::json_kind;
use crate::{Action, CoreError, CoreResult, Meta};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// A command sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action {
        action: Action,
        meta: Meta,
        headers: Map<String, Value>,
    },
    Auth {
        auth_id: String,
        user_id: String,
        token: Option<String>,
        headers: Map<String, Value>,
        cookie: Map<String, Value>,
    },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Action { .. } => "action",
            Command::Auth { .. } => "auth",
        }
    }

    /// The id answers to this command will carry.
    pub fn correlation_id(&self) -> &str {
        match self {
            Command::Action { meta, .. } => &meta.id,
            Command::Auth { auth_id, .. } => auth_id,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Command::Action {
                action,
                meta,
                headers,
            } => Value::Array(vec![
                Value::String("action".to_string()),
                action.to_value(),
                meta.to_value(),
                Value::Object(headers.clone()),
            ]),
            Command::Auth {
                auth_id,
                user_id,
                token,
                headers,
                cookie,
            } => Value::Array(vec![
                Value::String("auth".to_string()),
                Value::String(auth_id.clone()),
                Value::String(user_id.clone()),
                token.clone().map(Value::String).unwrap_or(Value::Null),
                Value::Object(headers.clone()),
                Value::Object(cookie.clone()),
            ]),
        }
    }

    /// Decode an `action` command (`[kind, action, meta, headers?]`).
    pub fn action_from_value(value: &Value) -> CoreResult<Self> {
        let items = value.as_array().ok_or_else(|| {
            CoreError::InvalidCommand(format!("expected array, got {}", json_kind(value)))
        })?;
        match items.first().and_then(Value::as_str) {
            Some("action") => {}
            Some(other) => {
                return Err(CoreError::InvalidCommand(format!(
                    "expected action command, got {}",
                    other
                )))
            }
            None => return Err(CoreError::InvalidCommand("missing command kind".to_string())),
        }
        let action = items
            .get(1)
            .ok_or_else(|| CoreError::InvalidCommand("missing action".to_string()))
            .and_then(Action::from_value)?;
        let meta: Meta = items
            .get(2)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::InvalidMeta(e.to_string()))?
            .unwrap_or_default();
        let headers = match items.get(3) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(CoreError::InvalidCommand(format!(
                    "headers must be an object, got {}",
                    json_kind(other)
                )))
            }
        };
        Ok(Command::Action {
            action,
            meta,
            headers,
        })
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// An answer streamed back by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Approved { id: String },
    Forbidden { id: String },
    Resend { id: String, resend: Value },
    Processed { id: String },
    Error { id: String, stack: String },
    UnknownAction { id: String },
    UnknownChannel { id: String },
    Authenticated { auth_id: String },
    Denied { auth_id: String },
}

impl Answer {
    /// Decode one element of an answer stream.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let items = value.as_array().ok_or_else(|| {
            CoreError::UnknownAnswer(format!("expected array, got {}", json_kind(value)))
        })?;
        let tag = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::UnknownAnswer("missing answer tag".to_string()))?;
        let id = items
            .get(1)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreError::UnknownAnswer(format!("{} without id", tag)))?;

        let answer = match tag {
            "approved" => Answer::Approved { id },
            "forbidden" => Answer::Forbidden { id },
            "resend" => Answer::Resend {
                id,
                resend: items.get(2).cloned().unwrap_or(Value::Null),
            },
            "processed" => Answer::Processed { id },
            "error" => Answer::Error {
                id,
                stack: match items.get(2) {
                    Some(Value::String(stack)) => stack.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
            },
            "unknownAction" => Answer::UnknownAction { id },
            "unknownChannel" => Answer::UnknownChannel { id },
            "authenticated" => Answer::Authenticated { auth_id: id },
            "denied" => Answer::Denied { auth_id: id },
            other => return Err(CoreError::UnknownAnswer(other.to_string())),
        };
        Ok(answer)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Answer::Approved { .. } => "approved",
            Answer::Forbidden { .. } => "forbidden",
            Answer::Resend { .. } => "resend",
            Answer::Processed { .. } => "processed",
            Answer::Error { .. } => "error",
            Answer::UnknownAction { .. } => "unknownAction",
            Answer::UnknownChannel { .. } => "unknownChannel",
            Answer::Authenticated { .. } => "authenticated",
            Answer::Denied { .. } => "denied",
        }
    }

    /// The `id` or `authId` this answer responds to.
    pub fn correlation_id(&self) -> &str {
        match self {
            Answer::Approved { id }
            | Answer::Forbidden { id }
            | Answer::Resend { id, .. }
            | Answer::Processed { id }
            | Answer::Error { id, .. }
            | Answer::UnknownAction { id }
            | Answer::UnknownChannel { id } => id,
            Answer::Authenticated { auth_id } | Answer::Denied { auth_id } => auth_id,
        }
    }
}
