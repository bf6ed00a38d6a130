//! Runtime type tags for step inputs and outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The runtime shape of a JSON value.
///
/// Nodes declare their input and output kinds when a graph is built, and
/// suspensions declare the kind a resume payload must satisfy. Validation
/// happens against these tags instead of unchecked casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool,
    /// Whole number (fits `i64`/`u64`).
    Integer,
    /// Any number, including fractional.
    Float,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Matches every value.
    Any,
}

impl ValueKind {
    /// Classify a concrete value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Self::Integer
                } else {
                    Self::Float
                }
            }
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns `true` if `value` satisfies this kind.
    ///
    /// `Any` matches everything; `Float` also accepts whole numbers.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Float => value.is_number(),
            kind => Self::of(value) == *kind,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool => write!(f, "bool"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
            Self::Any => write!(f, "any"),
        }
    }
}
