//! Parameter vocabulary for operator construction.
//!
//! Planners parameterize operators either with a literal value, a reference
//! to a named column, or a numbered placeholder that is bound before
//! execution.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// Placeholder index within a prepared plan.
pub type PlaceholderId = u16;

/// A literal value, a column reference, or an unbound placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterVariant {
    Value(Value),
    Column(String),
    Placeholder(PlaceholderId),
}

impl ParameterVariant {
    /// The literal value, if this parameter carries one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ParameterVariant::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The referenced column name, if any.
    pub fn as_column(&self) -> Option<&str> {
        match self {
            ParameterVariant::Column(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ParameterVariant::Placeholder(_))
    }
}

impl fmt::Display for ParameterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterVariant::Value(v) => write!(f, "{}", v),
            ParameterVariant::Column(name) => write!(f, "{}", name),
            ParameterVariant::Placeholder(id) => write!(f, "?{}", id),
        }
    }
}

impl From<Value> for ParameterVariant {
    fn from(v: Value) -> Self {
        ParameterVariant::Value(v)
    }
}
