//! Beacon Records
//!
//! A beacon record is an open-schema JSON object. The only field the bridge
//! interprets is the identifying `lighthouse_id`; everything else passes
//! through untouched.

use serde::Serialize;
use serde_json::{Map, Value};

/// Key that marks a JSON object as beacon data.
pub const IDENTIFYING_FIELD: &str = "lighthouse_id";

/// Key the beacon uses for its monotonically increasing sequence number.
pub const SEQUENCE_FIELD: &str = "beacon_sequence_number";

/// A validated beacon payload.
///
/// Serializes as the received JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BeaconRecord {
    fields: Map<String, Value>,
    #[serde(skip)]
    id: String,
}

impl BeaconRecord {
    /// Validate a decoded JSON object as beacon data.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if the identifying field is absent or is not a
    /// non-empty string or a number.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, RecordError> {
        let id = match fields.get(IDENTIFYING_FIELD) {
            None => return Err(RecordError::MissingId),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(RecordError::EmptyId);
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(RecordError::InvalidId(json_kind(other))),
        };

        Ok(Self { fields, id })
    }

    /// The beacon's identifier, rendered as a string.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The beacon sequence number, if the payload carries one.
    #[must_use]
    pub fn sequence_number(&self) -> Option<u64> {
        self.fields.get(SEQUENCE_FIELD).and_then(Value::as_u64)
    }

    /// Look up a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All payload fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl TryFrom<Value> for BeaconRecord {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            other => Err(RecordError::NotAnObject(json_kind(&other))),
        }
    }
}

/// Reasons a decoded JSON value is not beacon data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The value is not a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// The identifying field is absent.
    #[error("missing `lighthouse_id`")]
    MissingId,
    /// The identifying field is an empty string.
    #[error("`lighthouse_id` is empty")]
    EmptyId,
    /// The identifying field has an unusable type.
    #[error("`lighthouse_id` must be a string or number, got {0}")]
    InvalidId(&'static str),
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
