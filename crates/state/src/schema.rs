//! Schema validation for state values.

use serde_json::Value;

use crate::error::{Result, StateError};

/// Trait for pluggable state schemas.
///
/// A schema is validated before any mutation; a failing write leaves both
/// the store and in-memory state untouched.
pub trait Schema: Send + Sync {
    /// Validate a candidate value for `key`.
    fn validate(&self, key: &str, value: &Value) -> Result<()>;
}

/// The JSON shape a [`TypeSchema`] expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    /// The kind of a concrete value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Label used in validation messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Structural schema: an expected JSON kind plus required object fields.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    expected: JsonKind,
    required_fields: Vec<String>,
}

impl TypeSchema {
    /// Expect values of the given kind.
    pub fn new(expected: JsonKind) -> Self {
        Self {
            expected,
            required_fields: Vec::new(),
        }
    }

    /// Expect an object carrying the given field (objects only).
    pub fn with_required_field(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }
}

impl Schema for TypeSchema {
    fn validate(&self, key: &str, value: &Value) -> Result<()> {
        let actual = JsonKind::of(value);
        if actual != self.expected {
            return Err(StateError::validation(
                key,
                format!(
                    "expected {}, got {}",
                    self.expected.as_str(),
                    actual.as_str()
                ),
            ));
        }
        if let Value::Object(map) = value {
            for field in &self.required_fields {
                if !map.contains_key(field) {
                    return Err(StateError::validation(
                        key,
                        format!("missing required field '{field}'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_mismatch_rejected() {
        let schema = TypeSchema::new(JsonKind::Object);
        assert!(schema.validate("k", &json!({"a": 1})).is_ok());
        assert!(schema.validate("k", &json!("not an object")).is_err());
        assert!(schema.validate("k", &json!(42)).is_err());
    }

    #[test]
    fn test_required_fields_enforced() {
        let schema = TypeSchema::new(JsonKind::Object)
            .with_required_field("items")
            .with_required_field("total");
        assert!(schema
            .validate("cart", &json!({"items": [], "total": 0}))
            .is_ok());

        let err = schema
            .validate("cart", &json!({"items": []}))
            .unwrap_err();
        assert!(err.to_string().contains("total"));
    }

    #[test]
    fn test_scalar_schema() {
        let schema = TypeSchema::new(JsonKind::Number);
        assert!(schema.validate("counter", &json!(7)).is_ok());
        assert!(schema.validate("counter", &json!(null)).is_err());
    }
}
