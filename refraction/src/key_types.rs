//! Row key normalisation
//!
//! Primary keys come back from the store as JSON scalars. [`RowKey`] gives them
//! a hashable, ordered form so relation batches can be correlated with their
//! owning rows without caring whether the key was an integer, a string or a UUID.

use sea_orm::Value;
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

use crate::entity_metadata::FieldType;
use crate::query_builders::projection::parse_temporal;

/// A normalised primary key value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Int(i64),
    String(String),
    Uuid(Uuid),
}

impl RowKey {
    /// Normalise a JSON scalar into a key. Floats, booleans, null and
    /// containers are not valid keys.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .map(Self::Int),
            JsonValue::String(s) => match Uuid::parse_str(s) {
                Ok(uuid) => Some(Self::Uuid(uuid)),
                Err(_) => Some(Self::String(s.clone())),
            },
            _ => None,
        }
    }

    /// Convert to a sea_orm::Value for database operations
    pub fn to_db_value(&self) -> Value {
        match self {
            Self::Int(value) => Value::BigInt(Some(*value)),
            Self::String(value) => Value::String(Some(Box::new(value.clone()))),
            Self::Uuid(value) => Value::Uuid(Some(Box::new(*value))),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(value) => JsonValue::from(*value),
            Self::String(value) => JsonValue::String(value.clone()),
            Self::Uuid(value) => JsonValue::String(value.to_string()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "{}", value),
            Self::Uuid(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RowKey {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Uuid> for RowKey {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<RowKey> for Value {
    fn from(key: RowKey) -> Self {
        key.to_db_value()
    }
}

/// Convert a JSON scalar into the closest sea_orm::Value.
/// Containers have no scalar form and yield `None`.
pub fn json_to_db_value(value: &JsonValue) -> Option<Value> {
    match value {
        JsonValue::Null => Some(Value::String(None)),
        JsonValue::Bool(b) => Some(Value::Bool(Some(*b))),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::BigInt(Some(i)))
            } else if let Some(u) = n.as_u64() {
                Some(Value::BigUnsigned(Some(u)))
            } else {
                n.as_f64().map(|f| Value::Double(Some(f)))
            }
        }
        JsonValue::String(s) => Some(Value::String(Some(Box::new(s.clone())))),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Like `json_to_db_value`, but strings compared against a `DateTime`
/// field bind as timestamps. Unreadable temporal strings yield `None`.
pub fn typed_db_value(value: &JsonValue, field_type: FieldType) -> Option<Value> {
    match (field_type, value) {
        (FieldType::DateTime, JsonValue::String(s)) => {
            parse_temporal(s).map(|dt| Value::ChronoDateTime(Some(Box::new(dt))))
        }
        _ => json_to_db_value(value),
    }
}
