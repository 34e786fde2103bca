use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A key has the wrong length or a ciphertext is corrupted.
    Crypto,
    /// A value or a path does not satisfy the expected constraints.
    Validation,
    /// A decrypted document is not a valid gateway document.
    Payload,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Crypto => "Crypto",
            Self::Validation => "Validation",
            Self::Payload => "Payload",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A data interface error.
#[derive(PartialEq, Eq, Clone)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Creates a [`ErrorKind::Crypto`] error.
    #[inline]
    pub fn crypto(info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Crypto, info)
    }

    /// Creates a [`ErrorKind::Validation`] error.
    #[inline]
    pub fn validation(info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Validation, info)
    }

    /// Creates a [`ErrorKind::Payload`] error.
    #[inline]
    pub fn payload(info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Payload, info)
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }

    fn error(&self) -> String {
        format!("{}: {}", self.kind, self.info)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::payload(format!("Invalid gateway document: {e}"))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::crypto(format!("Invalid base64 envelope: {e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
