use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// The hierarchical path of a gateway data point.
///
/// A path always starts with `/`, e.g. `/heatingCircuits/hc1/operationMode`.
/// Segments are never empty and never contain whitespace, and only the root
/// path `/` may end with a slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath(String);

impl DataPath {
    /// Creates a [`DataPath`].
    ///
    /// # Errors
    ///
    /// A validation error is returned when the path does not start with `/`,
    /// contains empty segments or whitespace, or ends with `/`.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        Self::check(&path)?;
        Ok(Self(path))
    }

    /// Returns the root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".into())
    }

    /// Returns the path as a [`&str`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Returns the last path segment, or `None` for the root path.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Appends a segment to the path.
    ///
    /// # Errors
    ///
    /// A validation error is returned when the segment is empty or contains
    /// `/` or whitespace.
    pub fn join(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains('/') {
            return Err(Error::validation(format!(
                "Invalid segment `{segment}` for path `{}`",
                self.0
            )));
        }
        if self.0 == "/" {
            Self::new(format!("/{segment}"))
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// Checks whether this path is equal to or nested below `other`.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        if other.0 == "/" || self.0 == other.0 {
            return true;
        }
        self.0
            .strip_prefix(other.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    fn check(path: &str) -> Result<()> {
        if path == "/" {
            return Ok(());
        }

        let Some(rest) = path.strip_prefix('/') else {
            return Err(Error::validation(format!(
                "Path `{path}` must start with `/`"
            )));
        };

        if rest.split('/').any(str::is_empty) {
            return Err(Error::validation(format!(
                "Path `{path}` contains an empty segment"
            )));
        }

        if path.chars().any(char::is_whitespace) {
            return Err(Error::validation(format!(
                "Path `{path}` contains whitespace"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DataPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for DataPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for DataPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl AsRef<str> for DataPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DataPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for DataPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DataPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let path = String::deserialize(deserializer)?;
        Self::new(path).map_err(serde::de::Error::custom)
    }
}
