use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Errors raised by the store collaborator, passed through untouched
pub type StoreError = sea_orm::DbErr;
// Crate-wide result alias for ergonomics
pub type RefractionResult<T> = std::result::Result<T, RefractionError>;

/// One row as returned by a `values` query, keyed by field path
pub type Row = serde_json::Map<String, JsonValue>;
/// One output record, keyed by external field name
pub type Record = serde_json::Map<String, JsonValue>;

/// Typed refraction errors
#[derive(Debug, thiserror::Error)]
pub enum RefractionError {
    #[error("RefractionError::InvalidSpecification: expected a mapping, got {found}")]
    InvalidSpecification { found: String },

    #[error("RefractionError::MissingPrimaryKeyMapping: entity='{entity}' primary_key='{primary_key}'")]
    MissingPrimaryKeyMapping { entity: String, primary_key: String },

    #[error("RefractionError::UnknownConversion: field='{field}' conversion='{conversion}'")]
    UnknownConversion { field: String, conversion: String },

    #[error("RefractionError::ManyValuedMapping: entity='{entity}' path='{path}'")]
    ManyValuedMapping { entity: String, path: String },

    #[error("RefractionError::UnknownEntity: entity='{entity}'")]
    UnknownEntity { entity: String },

    #[error("RefractionError::UnknownField: entity='{entity}' path='{path}'")]
    UnknownField { entity: String, path: String },

    #[error("RefractionError::InvalidMetadata: entity='{entity}' message='{message}'")]
    InvalidMetadata { entity: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RefractionError> for sea_orm::DbErr {
    fn from(err: RefractionError) -> Self {
        match err {
            RefractionError::Store(inner) => inner,
            other => sea_orm::DbErr::Custom(other.to_string()),
        }
    }
}

impl RefractionError {
    /// Create an invalid specification error from the offending value
    pub fn invalid_specification(value: &JsonValue) -> Self {
        Self::InvalidSpecification {
            found: json_type_name(value).to_string(),
        }
    }

    /// Create an unknown entity error
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity {
            entity: entity.into(),
        }
    }

    /// Create an unknown field error
    pub fn unknown_field(entity: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            path: path.into(),
        }
    }

    /// Create an invalid metadata error
    pub fn invalid_metadata(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Configuration errors are programmer errors and fatal to the call
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingPrimaryKeyMapping { .. }
                | Self::UnknownConversion { .. }
                | Self::ManyValuedMapping { .. }
                | Self::InvalidMetadata { .. }
        )
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "mapping",
    }
}

/// Field lookup operations, named after their query-key suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOp {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
}

impl FieldOp {
    pub fn suffix(self) -> &'static str {
        match self {
            FieldOp::Exact => "exact",
            FieldOp::IExact => "iexact",
            FieldOp::Contains => "contains",
            FieldOp::IContains => "icontains",
            FieldOp::StartsWith => "startswith",
            FieldOp::EndsWith => "endswith",
            FieldOp::In => "in",
            FieldOp::Gt => "gt",
            FieldOp::Gte => "gte",
            FieldOp::Lt => "lt",
            FieldOp::Lte => "lte",
            FieldOp::IsNull => "isnull",
        }
    }
}

/// A single field-lookup predicate: `path__op = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: String,
    pub op: FieldOp,
    pub value: JsonValue,
}

impl Predicate {
    pub fn new(path: impl Into<String>, op: FieldOp, value: JsonValue) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }

    /// Lookup expression as it would appear in a keyword filter
    pub fn lookup_expr(&self) -> String {
        format!("{}__{}", self.path, self.op.suffix())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.lookup_expr(), self.value)
    }
}

/// One step of a composed collection, applied in order
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStep {
    Filter(Predicate),
    Exclude(Predicate),
    Distinct,
}

impl fmt::Display for QueryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStep::Filter(p) => write!(f, "filter({})", p),
            QueryStep::Exclude(p) => write!(f, "exclude({})", p),
            QueryStep::Distinct => write!(f, "distinct()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_lookup_expr() {
        let p = Predicate::new("tags__name", FieldOp::In, json!(["red"]));
        assert_eq!(p.lookup_expr(), "tags__name__in");
        assert_eq!(p.to_string(), "tags__name__in=[\"red\"]");
    }

    #[test]
    fn test_error_into_db_err() {
        let err = RefractionError::unknown_field("widget", "colour");
        let db: sea_orm::DbErr = err.into();
        assert!(matches!(db, sea_orm::DbErr::Custom(ref m) if m.contains("colour")));

        let passthrough: sea_orm::DbErr =
            RefractionError::Store(sea_orm::DbErr::Custom("boom".into())).into();
        assert_eq!(passthrough.to_string(), sea_orm::DbErr::Custom("boom".into()).to_string());
    }

    #[test]
    fn test_configuration_errors() {
        let err = RefractionError::UnknownConversion {
            field: "created".into(),
            conversion: "epoch".into(),
        };
        assert!(err.is_configuration_error());
        assert!(!RefractionError::invalid_specification(&json!([1])).is_configuration_error());
    }
}
