//! Action meta envelope and id parsing.

use crate::resend::Resend;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// The mutable envelope that accompanies an action.
///
/// `id` has the form `<time> <node id> <sequence>`, where the node id is
/// `<user>:<client>[:<tab>]` for client nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub id: String,
    /// Creation time in epoch milliseconds. May be fractional.
    #[serde(default, serialize_with = "serialize_time")]
    pub time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_clients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,
    /// Fields this crate does not interpret, kept for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    pub fn new(id: impl Into<String>, time: impl Into<f64>) -> Self {
        Self {
            id: id.into(),
            time: time.into(),
            ..Default::default()
        }
    }

    /// Node, client and user identity encoded in `id`.
    pub fn parsed_id(&self) -> ParsedId {
        parse_id(&self.id)
    }

    /// Merge backend re-routing instructions into the envelope.
    ///
    /// Targets are appended to existing lists without duplicates.
    pub fn apply_resend(&mut self, resend: &Resend) {
        merge_targets(&mut self.channels, &resend.channels);
        merge_targets(&mut self.nodes, &resend.nodes);
        merge_targets(&mut self.clients, &resend.clients);
        merge_targets(&mut self.users, &resend.users);
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Whole times are written as integers.
fn serialize_time<S: Serializer>(time: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if time.fract() == 0.0 && time.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*time as i64)
    } else {
        serializer.serialize_f64(*time)
    }
}

fn merge_targets(target: &mut Option<Vec<String>>, extra: &[String]) {
    if extra.is_empty() {
        return;
    }
    let list = target.get_or_insert_with(Vec::new);
    for item in extra {
        if !list.contains(item) {
            list.push(item.clone());
        }
    }
}

/// Identity fields decoded from an action id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub node_id: String,
    pub client_id: String,
    pub user_id: Option<String>,
}

/// Split an action id into node, client and user ids.
///
/// Ids that do not have three space-separated parts are treated as a bare
/// node id.
pub fn parse_id(id: &str) -> ParsedId {
    let parts: Vec<&str> = id.split(' ').collect();
    let node_id = if parts.len() == 3 { parts[1] } else { id };
    parse_node_id(node_id)
}

/// Split a node id (`user:client:tab`) into client and user ids.
pub fn parse_node_id(node_id: &str) -> ParsedId {
    let parts: Vec<&str> = node_id.split(':').collect();
    if parts.len() < 2 {
        return ParsedId {
            node_id: node_id.to_string(),
            client_id: node_id.to_string(),
            user_id: None,
        };
    }

    let user_id = match parts[0] {
        "" | "false" => None,
        user => Some(user.to_string()),
    };

    ParsedId {
        node_id: node_id.to_string(),
        client_id: format!("{}:{}", parts[0], parts[1]),
        user_id,
    }
}
