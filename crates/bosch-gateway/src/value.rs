use std::fmt;

use serde::{Deserialize, Serialize};

/// Value kinds supported by a gateway data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// A numeric value, such as a temperature setpoint.
    Number,
    /// A value chosen from a finite set of strings, such as an
    /// operation mode.
    Enum,
    /// A boolean value.
    Bool,
    /// A free-form string, such as the gateway UUID.
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => "number",
            Self::Enum => "enum",
            Self::Bool => "bool",
            Self::Text => "text",
        }
        .fmt(f)
    }
}

/// A typed data point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Bool(bool),
    /// An enumeration value.
    Enum(String),
    /// A free-form string.
    Text(String),
}

impl Value {
    /// Returns the [`ValueKind`] of the value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Number(_) => ValueKind::Number,
            Self::Bool(_) => ValueKind::Bool,
            Self::Enum(_) => ValueKind::Enum,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Returns the value as a number, if it is one.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// Returns the value as a boolean, if it is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a string, if it is an enumeration or a text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Enum(value) | Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Converts the value into the JSON representation sent to a gateway.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Number(number) => serde_json::Value::from(*number),
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Enum(value) | Self::Text(value) => serde_json::Value::String(value.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => number.fmt(f),
            Self::Bool(value) => value.fmt(f),
            Self::Enum(value) | Self::Text(value) => value.fmt(f),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
