use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::DataPath;
use crate::value::{Value, ValueKind};

// Gateway document types.
const FLOAT_VALUE: &str = "floatValue";
const STRING_VALUE: &str = "stringValue";
const BOOLEAN_VALUE: &str = "booleanValue";
const REF_ENUM: &str = "refEnum";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Number(i64),
    Bool(bool),
}

impl Flag {
    const fn is_set(&self) -> bool {
        match self {
            Self::Number(number) => *number != 0,
            Self::Bool(value) => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reference {
    id: DataPath,
}

// A document as returned by a gateway.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(alias = "path")]
    id: Option<DataPath>,
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<serde_json::Value>,
    writeable: Option<Flag>,
    unit_of_measure: Option<String>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    #[serde(default)]
    allowed_values: Vec<String>,
    #[serde(default)]
    references: Vec<Reference>,
}

/// A single addressable attribute of a gateway.
///
/// It holds the last known [`Value`] together with the metadata the gateway
/// reports for it, and the instant the value has been read or written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    path: DataPath,
    value: Value,
    kind: ValueKind,
    writeable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    allowed_values: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl DataPoint {
    /// Creates a writeable [`DataPoint`] whose kind is the kind of the
    /// given [`Value`].
    #[must_use]
    pub fn new(path: DataPath, value: Value) -> Self {
        Self {
            path,
            kind: value.kind(),
            value,
            writeable: true,
            unit: None,
            min: None,
            max: None,
            allowed_values: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Sets the unit of measure.
    #[must_use]
    #[inline]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the admitted range of a numeric data point.
    #[must_use]
    #[inline]
    pub const fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Sets the allowed values of an enumeration data point.
    #[must_use]
    #[inline]
    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the data point as read-only.
    #[must_use]
    #[inline]
    pub const fn read_only(mut self) -> Self {
        self.writeable = false;
        self
    }

    /// Returns the [`DataPath`].
    #[must_use]
    pub const fn path(&self) -> &DataPath {
        &self.path
    }

    /// Returns the last known [`Value`].
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the expected [`ValueKind`].
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Checks whether the data point accepts writes.
    #[must_use]
    pub const fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// Returns the unit of measure, if any.
    #[must_use]
    pub fn unit_of_measure(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Returns the admitted minimum, if any.
    #[must_use]
    pub const fn min(&self) -> Option<f64> {
        self.min
    }

    /// Returns the admitted maximum, if any.
    #[must_use]
    pub const fn max(&self) -> Option<f64> {
        self.max
    }

    /// Returns the allowed values of an enumeration.
    #[must_use]
    pub fn allowed(&self) -> &[String] {
        &self.allowed_values
    }

    /// Returns the instant the value was last read or written.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Checks whether a [`Value`] can be written to this data point.
    ///
    /// # Errors
    ///
    /// A validation error is returned when the data point is read-only,
    /// the value kind differs from the expected one, a number falls
    /// outside the admitted range, or an enumeration value is not allowed.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if !self.writeable {
            return Err(Error::validation(format!(
                "`{}` is read-only",
                self.path
            )));
        }

        if value.kind() != self.kind {
            return Err(Error::validation(format!(
                "`{}` expects a {} value, found a {} value",
                self.path,
                self.kind,
                value.kind()
            )));
        }

        match value {
            Value::Number(number) => {
                if !number.is_finite() {
                    return Err(Error::validation(format!(
                        "`{}` does not accept {number}",
                        self.path
                    )));
                }
                if self.min.is_some_and(|min| *number < min)
                    || self.max.is_some_and(|max| *number > max)
                {
                    return Err(Error::validation(format!(
                        "{number} is outside the range of `{}` [{}, {}]",
                        self.path,
                        self.min.unwrap_or(f64::NEG_INFINITY),
                        self.max.unwrap_or(f64::INFINITY)
                    )));
                }
            }
            Value::Enum(choice) => {
                if !self.allowed_values.is_empty() && !self.allowed_values.contains(choice) {
                    return Err(Error::validation(format!(
                        "`{choice}` is not an allowed value of `{}`: {:?}",
                        self.path, self.allowed_values
                    )));
                }
            }
            Value::Bool(_) | Value::Text(_) => {}
        }

        Ok(())
    }

    /// Replaces the value and refreshes the update instant.
    pub fn update(&mut self, value: Value) {
        self.value = value;
        self.updated_at = Utc::now();
    }

    /// Parses a gateway document into a [`DataPoint`].
    ///
    /// The `requested` path is used when the document does not carry its own.
    ///
    /// # Errors
    ///
    /// A payload error is returned when the document is not valid JSON or
    /// does not describe a data point.
    pub fn from_document(requested: &DataPath, payload: &[u8]) -> Result<Self> {
        match Resource::parse(payload, Some(requested))? {
            Resource::DataPoint(point) => Ok(point),
            Resource::References { path, .. } => Err(Error::payload(format!(
                "`{path}` is a reference listing, not a data point"
            ))),
            Resource::Other { path, .. } => Err(Error::payload(format!(
                "`{path}` does not describe a data point"
            ))),
        }
    }

    /// Encodes the data point into a gateway document.
    #[must_use]
    pub fn to_document(&self) -> serde_json::Value {
        let mut document = serde_json::Map::new();
        let _ = document.insert("id".into(), self.path.as_str().into());
        let kind = match self.kind {
            ValueKind::Number => FLOAT_VALUE,
            ValueKind::Enum | ValueKind::Text => STRING_VALUE,
            ValueKind::Bool => BOOLEAN_VALUE,
        };
        let _ = document.insert("type".into(), kind.into());
        let _ = document.insert("writeable".into(), u8::from(self.writeable).into());
        let _ = document.insert("value".into(), self.value.to_json());
        if let Some(unit) = &self.unit {
            let _ = document.insert("unitOfMeasure".into(), unit.as_str().into());
        }
        if let Some(min) = self.min {
            let _ = document.insert("minValue".into(), min.into());
        }
        if let Some(max) = self.max {
            let _ = document.insert("maxValue".into(), max.into());
        }
        if !self.allowed_values.is_empty() {
            let _ = document.insert("allowedValues".into(), self.allowed_values.clone().into());
        }
        serde_json::Value::Object(document)
    }
}

/// Encodes the document used to write a [`Value`] to a gateway.
///
/// # Errors
///
/// A payload error is returned when the value cannot be serialized.
pub fn write_document(value: &Value) -> Result<Vec<u8>> {
    let document = serde_json::json!({ "value": value.to_json() });
    Ok(serde_json::to_vec(&document)?)
}

/// What a gateway path resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// A data point.
    DataPoint(DataPoint),
    /// A listing of nested paths.
    References {
        /// Listing path.
        path: DataPath,
        /// Nested paths.
        references: Vec<DataPath>,
    },
    /// A document which is neither a data point nor a listing, such as a
    /// switch program or an error list.
    Other {
        /// Document path.
        path: DataPath,
        /// Raw document.
        document: serde_json::Value,
    },
}

impl Resource {
    /// Parses a gateway document.
    ///
    /// The `fallback` path is used when the document does not carry its own.
    ///
    /// # Errors
    ///
    /// A payload error is returned when the document is not valid JSON,
    /// carries no path at all, or contains a value that contradicts its
    /// declared type.
    pub fn parse(payload: &[u8], fallback: Option<&DataPath>) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(payload)?;
        let document: Document = serde_json::from_value(raw.clone())?;

        let path = match (document.id, fallback) {
            (Some(path), _) => path,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => {
                return Err(Error::payload("The gateway document carries no path"));
            }
        };

        if document.kind.as_deref() == Some(REF_ENUM) {
            return Ok(Self::References {
                path,
                references: document.references.into_iter().map(|r| r.id).collect(),
            });
        }

        let Some(json_value) = document.value else {
            return Ok(Self::Other {
                path,
                document: raw,
            });
        };

        let value = match (document.kind.as_deref(), json_value) {
            (Some(FLOAT_VALUE) | None, serde_json::Value::Number(number)) => {
                Value::Number(number.as_f64().ok_or_else(|| {
                    Error::payload(format!("`{path}` carries an invalid number"))
                })?)
            }
            (Some(BOOLEAN_VALUE) | None, serde_json::Value::Bool(value)) => Value::Bool(value),
            (Some(BOOLEAN_VALUE), serde_json::Value::String(value)) => {
                Value::Bool(parse_bool(&path, &value)?)
            }
            (Some(STRING_VALUE) | None, serde_json::Value::String(value)) => {
                if document.allowed_values.is_empty() {
                    Value::Text(value)
                } else {
                    Value::Enum(value)
                }
            }
            (Some(kind @ (FLOAT_VALUE | BOOLEAN_VALUE | STRING_VALUE)), value) => {
                return Err(Error::payload(format!(
                    "`{path}` declares a `{kind}` but carries `{value}`"
                )));
            }
            (_, _) => {
                return Ok(Self::Other {
                    path,
                    document: raw,
                });
            }
        };

        let mut point = DataPoint::new(path, value);
        point.writeable = document.writeable.as_ref().is_none_or(Flag::is_set);
        point.unit = document.unit_of_measure;
        point.min = document.min_value;
        point.max = document.max_value;
        point.allowed_values = document.allowed_values;

        Ok(Self::DataPoint(point))
    }

    /// Returns the [`DataPath`] of the resource.
    #[must_use]
    pub const fn path(&self) -> &DataPath {
        match self {
            Self::DataPoint(point) => point.path(),
            Self::References { path, .. } | Self::Other { path, .. } => path,
        }
    }
}

fn parse_bool(path: &DataPath, value: &str) -> Result<bool> {
    match value {
        "true" | "on" => Ok(true),
        "false" | "off" => Ok(false),
        _ => Err(Error::payload(format!(
            "`{path}` carries an invalid boolean `{value}`"
        ))),
    }
}
