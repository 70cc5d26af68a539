//! Backend re-routing instructions.

use crate::action::json_kind;
use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keys a backend may use in a `resend` answer. Anything else is dropped.
pub const RESEND_KEYS: [&str; 8] = [
    "channels", "channel", "nodes", "node", "clients", "client", "users", "user",
];

/// Additional recipients for an action, with singular keys folded into
/// their plural lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resend {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

impl Resend {
    /// Validate and normalize the payload of a `resend` answer.
    ///
    /// The payload must be a mapping; allow-listed values must be a string
    /// or an array of strings.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            CoreError::InvalidResend(format!("expected object, got {}", json_kind(value)))
        })?;

        let mut resend = Resend::default();
        for key in RESEND_KEYS {
            let Some(raw) = map.get(key) else {
                continue;
            };
            let targets = string_list(key, raw)?;
            let list = match key {
                "channels" | "channel" => &mut resend.channels,
                "nodes" | "node" => &mut resend.nodes,
                "clients" | "client" => &mut resend.clients,
                _ => &mut resend.users,
            };
            for target in targets {
                if !list.contains(&target) {
                    list.push(target);
                }
            }
        }
        Ok(resend)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
            && self.nodes.is_empty()
            && self.clients.is_empty()
            && self.users.is_empty()
    }
}

fn string_list(key: &str, value: &Value) -> CoreResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    CoreError::InvalidResend(format!(
                        "{} must contain only strings, found {}",
                        key,
                        json_kind(item)
                    ))
                })
            })
            .collect(),
        other => Err(CoreError::InvalidResend(format!(
            "{} must be a string or an array of strings, got {}",
            key,
            json_kind(other)
        ))),
    }
}
