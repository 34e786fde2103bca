use std::borrow::Cow;

use bosch_gateway::DataPath;
use bosch_gateway::error::{Error as GatewayError, ErrorKind as GatewayErrorKind};

use crate::transport::TransportKind;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A network or connection failure, a timeout, or a rejected
    /// authentication.
    Transport,
    /// A key mismatch or a corrupted ciphertext.
    Crypto,
    /// An operation issued before a successful connection.
    NotConnected,
    /// A value that does not match the expected data point type, or an
    /// invalid path.
    Validation,
    /// The gateway answered with a non-success status.
    Device,
    /// A decrypted payload which is not a valid gateway document.
    Payload,
    /// An invalid or unreadable configuration.
    Config,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Crypto => "Crypto",
            Self::NotConnected => "Not Connected",
            Self::Validation => "Validation",
            Self::Device => "Device",
            Self::Payload => "Payload",
            Self::Config => "Config",
        }
    }

    /// Checks whether an error of this kind might succeed when retried.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Transport)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A gateway client error.
///
/// Besides its [`ErrorKind`] and description, an error carries, when known,
/// the data path of the failed operation, the transport in use, and whether
/// the failure is a timeout.
#[derive(PartialEq, Clone)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
    path: Option<DataPath>,
    transport: Option<TransportKind>,
    timed_out: bool,
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
    pub(crate) fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
            path: None,
            transport: None,
            timed_out: false,
        }
    }

    pub(crate) fn transport(info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Transport, info)
    }

    pub(crate) fn timeout(info: impl Into<Cow<'static, str>>) -> Self {
        let mut error = Self::new(ErrorKind::Transport, info);
        error.timed_out = true;
        error
    }

    pub(crate) fn not_connected() -> Self {
        Self::new(
            ErrorKind::NotConnected,
            "The gateway session is not connected, call `connect` first",
        )
    }

    pub(crate) fn config(info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Config, info)
    }

    pub(crate) fn device(status: u16, info: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            ErrorKind::Device,
            format!("Gateway answered with status {status}: {}", info.into()),
        )
    }

    /// Attaches the [`DataPath`] of the failed operation, unless one is
    /// already present.
    #[must_use]
    pub(crate) fn with_path(mut self, path: &DataPath) -> Self {
        if self.path.is_none() {
            self.path = Some(path.clone());
        }
        self
    }

    /// Attaches the [`TransportKind`] in use, unless one is already present.
    #[must_use]
    pub(crate) fn with_transport(mut self, transport: TransportKind) -> Self {
        if self.transport.is_none() {
            self.transport = Some(transport);
        }
        self
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

    /// Returns the [`DataPath`] of the failed operation, if known.
    #[must_use]
    pub const fn path(&self) -> Option<&DataPath> {
        self.path.as_ref()
    }

    /// Returns the [`TransportKind`] in use, if known.
    #[must_use]
    pub const fn transport_kind(&self) -> Option<TransportKind> {
        self.transport
    }

    /// Checks whether the error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        self.timed_out
    }

    fn error(&self) -> String {
        let mut error = format!("{}: {}", self.kind, self.info);
        if let Some(path) = &self.path {
            error.push_str(&format!(" [path: {path}]"));
        }
        if let Some(transport) = self.transport {
            error.push_str(&format!(" [transport: {transport}]"));
        }
        error
    }
}

impl From<GatewayError> for Error {
    fn from(e: GatewayError) -> Self {
        let kind = match e.kind() {
            GatewayErrorKind::Crypto => ErrorKind::Crypto,
            GatewayErrorKind::Validation => ErrorKind::Validation,
            GatewayErrorKind::Payload => ErrorKind::Payload,
        };
        Self::new(kind, e.info().to_owned())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("HTTP request timed out: {e}"))
        } else {
            Self::transport(format!("HTTP request failed: {e}"))
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Payload, format!("Json error caused by {e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
