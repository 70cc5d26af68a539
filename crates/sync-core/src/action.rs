//! Actions: typed, immutable facts carried through the pipeline.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action type used to open a channel subscription.
pub const SUBSCRIBE_TYPE: &str = "logux/subscribe";

/// Action type used to close a channel subscription.
pub const UNSUBSCRIBE_TYPE: &str = "logux/unsubscribe";

/// Action type of synthesized undo records.
pub const UNDO_TYPE: &str = "logux/undo";

/// An opaque mapping with a required string `type` field.
///
/// The mapping is validated on construction and never mutated afterwards;
/// builders return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Action {
    fields: Map<String, Value>,
}

impl Action {
    /// Create an action with only a `type` field.
    pub fn new(action_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(action_type.to_string()));
        Self { fields }
    }

    /// Return a copy of this action with an extra field set.
    ///
    /// Setting `type` to a non-string value is ignored.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if key == "type" && !value.is_string() {
            return self;
        }
        self.fields.insert(key.to_string(), value);
        self
    }

    /// The action's `type`.
    pub fn action_type(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether this is a subscribe or unsubscribe action.
    pub fn is_subscription(&self) -> bool {
        matches!(self.action_type(), SUBSCRIBE_TYPE | UNSUBSCRIBE_TYPE)
    }

    /// Channel name of a subscribe/unsubscribe action.
    pub fn channel(&self) -> Option<&str> {
        if !self.is_subscription() {
            return None;
        }
        self.fields.get("channel").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Decode an action from an arbitrary JSON value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Self::try_from(map.clone()),
            other => Err(CoreError::InvalidAction(format!(
                "expected object, got {}",
                json_kind(other)
            ))),
        }
    }
}

impl TryFrom<Map<String, Value>> for Action {
    type Error = CoreError;

    fn try_from(fields: Map<String, Value>) -> CoreResult<Self> {
        match fields.get("type") {
            Some(Value::String(_)) => Ok(Self { fields }),
            Some(other) => Err(CoreError::InvalidAction(format!(
                "type must be a string, got {}",
                json_kind(other)
            ))),
            None => Err(CoreError::InvalidAction("missing type".to_string())),
        }
    }
}

impl From<Action> for Map<String, Value> {
    fn from(action: Action) -> Self {
        action.fields
    }
}

/// Short name of a JSON value's kind, for error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
