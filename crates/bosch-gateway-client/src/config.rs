use std::path::Path;
use std::time::Duration;

use bosch_gateway::DataPath;
use bosch_gateway::crypto::{Codec, SecretKey};

use serde::Deserialize;

use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transport::TransportKind;

// Default timeout of every network-bound operation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// Default interval between two keep-alive pings.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

// Default interval between two polling rounds.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

// Shortest keep-alive or polling interval.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

// Default number of pushes buffered for each subscriber.
const DEFAULT_PUSH_BUFFER: usize = 64;

// Path read to check that a gateway is reachable.
const DEFAULT_PROBE_PATH: &str = "/gateway/uuid";

// XMPP account defaults shared by all Bosch gateways.
const DEFAULT_XMPP_DOMAIN: &str = "wa2-mz36-qrmzh6.bosch.de";
const DEFAULT_CONTACT_PREFIX: &str = "rrccontact_";
const DEFAULT_GATEWAY_PREFIX: &str = "rrcgateway_";
const DEFAULT_PASSWORD_PREFIX: &str = "Ct7ZR03b_";

/// The credentials used to derive the payload key.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    /// The access key printed on the gateway and the user password.
    #[serde(rename_all = "camelCase")]
    AccessKey {
        /// Gateway access key.
        access_key: String,
        /// User password.
        password: String,
    },
    /// A raw hexadecimal key.
    Key {
        /// Hexadecimal key.
        key: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessKey { .. } => f
                .debug_struct("AccessKey")
                .field("access_key", &"<redacted>")
                .field("password", &"<redacted>")
                .finish(),
            Self::Key { .. } => f.debug_struct("Key").field("key", &"<redacted>").finish(),
        }
    }
}

impl Credentials {
    /// Creates [`Credentials`] from an access key and a password.
    #[must_use]
    pub fn access_key(access_key: impl Into<String>, password: impl Into<String>) -> Self {
        Self::AccessKey {
            access_key: access_key.into(),
            password: password.into(),
        }
    }

    /// Creates [`Credentials`] from a raw hexadecimal key.
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key { key: key.into() }
    }

    /// Derives the [`SecretKey`].
    ///
    /// # Errors
    ///
    /// A crypto error is returned when a raw key is not a valid 32-byte
    /// hexadecimal string.
    pub fn secret_key(&self) -> Result<SecretKey> {
        match self {
            Self::AccessKey {
                access_key,
                password,
            } => Ok(SecretKey::derive(access_key, password)),
            Self::Key { key } => Ok(SecretKey::from_hex(key)?),
        }
    }

    pub(crate) fn raw_access_key(&self) -> Option<Zeroizing<String>> {
        match self {
            Self::AccessKey { access_key, .. } => Some(Zeroizing::new(
                access_key
                    .chars()
                    .filter(|c| *c != '-' && !c.is_whitespace())
                    .collect(),
            )),
            Self::Key { .. } => None,
        }
    }
}

/// Account settings of the XMPP transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XmppSettings {
    /// XMPP server domain.
    pub domain: String,
    /// Prefix of the client JID local part.
    pub contact_prefix: String,
    /// Prefix of the gateway JID local part.
    pub gateway_prefix: String,
    /// Prefix of the XMPP account password.
    pub password_prefix: String,
}

impl Default for XmppSettings {
    fn default() -> Self {
        Self {
            domain: DEFAULT_XMPP_DOMAIN.into(),
            contact_prefix: DEFAULT_CONTACT_PREFIX.into(),
            gateway_prefix: DEFAULT_GATEWAY_PREFIX.into(),
            password_prefix: DEFAULT_PASSWORD_PREFIX.into(),
        }
    }
}

/// The XMPP account of a gateway session.
#[derive(Clone, PartialEq, Eq)]
pub struct XmppAccount {
    /// Bare JID of the client.
    pub jid: String,
    /// Account password, wiped from memory on drop.
    pub password: Zeroizing<String>,
    /// Bare JID of the gateway.
    pub gateway: String,
}

impl std::fmt::Debug for XmppAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmppAccount")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// The configuration of a gateway client.
///
/// A configuration is either built in code, starting from
/// [`GatewayConfig::http`] or [`GatewayConfig::xmpp`], or loaded from a
/// JSON file through [`GatewayConfig::from_json_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    host: String,
    transport: TransportKind,
    credentials: Credentials,
    timeout: Duration,
    retry: RetryPolicy,
    keep_alive: Duration,
    poll_interval: Duration,
    push_buffer: usize,
    probe_path: DataPath,
    xmpp: XmppSettings,
}

impl GatewayConfig {
    /// Creates a [`GatewayConfig`] for the HTTP transport.
    ///
    /// The host is the gateway IP address or hostname, optionally followed
    /// by a port.
    #[must_use]
    pub fn http(host: impl Into<String>, credentials: Credentials) -> Self {
        Self::new(host.into(), TransportKind::Http, credentials)
    }

    /// Creates a [`GatewayConfig`] for the XMPP transport.
    ///
    /// The host is the gateway serial number.
    #[must_use]
    pub fn xmpp(serial: impl Into<String>, credentials: Credentials) -> Self {
        Self::new(serial.into(), TransportKind::Xmpp, credentials)
    }

    fn new(host: String, transport: TransportKind, credentials: Credentials) -> Self {
        Self {
            host,
            transport,
            credentials,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            push_buffer: DEFAULT_PUSH_BUFFER,
            probe_path: DataPath::new(DEFAULT_PROBE_PATH).unwrap_or_else(|_| DataPath::root()),
            xmpp: XmppSettings::default(),
        }
    }

    /// Sets the timeout of every network-bound operation.
    #[must_use]
    #[inline]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the [`RetryPolicy`] used for transient failures and reconnections.
    #[must_use]
    #[inline]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval between two keep-alive pings.
    ///
    /// Intervals shorter than 10 milliseconds are raised to 10 milliseconds.
    #[must_use]
    #[inline]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = clamp_interval(keep_alive);
        self
    }

    /// Sets the interval between two polling rounds of the HTTP transport.
    ///
    /// Intervals shorter than 10 milliseconds are raised to 10 milliseconds.
    #[must_use]
    #[inline]
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = clamp_interval(poll_interval);
        self
    }

    /// Sets how many pushes are buffered for each subscriber.
    #[must_use]
    #[inline]
    pub const fn push_buffer(mut self, push_buffer: usize) -> Self {
        self.push_buffer = if push_buffer == 0 { 1 } else { push_buffer };
        self
    }

    /// Sets the path read to check that a gateway is reachable.
    #[must_use]
    #[inline]
    pub fn probe_path(mut self, probe_path: DataPath) -> Self {
        self.probe_path = probe_path;
        self
    }

    /// Sets the [`XmppSettings`].
    #[must_use]
    #[inline]
    pub fn xmpp_settings(mut self, xmpp: XmppSettings) -> Self {
        self.xmpp = xmpp;
        self
    }

    /// Loads a [`GatewayConfig`] from a JSON file.
    ///
    /// # Errors
    ///
    /// A configuration error is returned when the file cannot be read or
    /// does not contain a valid configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Impossible to read `{}`: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Parses a [`GatewayConfig`] from a JSON document.
    ///
    /// # Errors
    ///
    /// A configuration error is returned when the document is not a valid
    /// configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(text)
            .map_err(|e| Error::config(format!("Invalid configuration: {e}")))?;
        file.into_config()
    }

    /// Returns the gateway host, or the serial number for XMPP.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the selected [`TransportKind`].
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Returns the [`Credentials`].
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the timeout of network-bound operations.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the [`RetryPolicy`].
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns the interval between two keep-alive pings.
    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the interval between two polling rounds.
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns how many pushes are buffered for each subscriber.
    #[must_use]
    pub const fn push_capacity(&self) -> usize {
        self.push_buffer
    }

    /// Returns the path read to check that a gateway is reachable.
    #[must_use]
    pub const fn probe(&self) -> &DataPath {
        &self.probe_path
    }

    /// Returns the XMPP account of the gateway.
    ///
    /// # Errors
    ///
    /// A configuration error is returned when the credentials do not carry
    /// an access key, which is part of the account password.
    pub fn xmpp_account(&self) -> Result<XmppAccount> {
        let access_key = self.credentials.raw_access_key().ok_or_else(|| {
            Error::config("The XMPP transport requires an access key and a password")
        })?;

        let XmppSettings {
            domain,
            contact_prefix,
            gateway_prefix,
            password_prefix,
        } = &self.xmpp;

        Ok(XmppAccount {
            jid: format!("{contact_prefix}{}@{domain}", self.host),
            password: Zeroizing::new(format!("{password_prefix}{}", access_key.as_str())),
            gateway: format!("{gateway_prefix}{}@{domain}", self.host),
        })
    }

    pub(crate) fn codec(&self) -> Result<Codec> {
        Ok(Codec::new(self.credentials.secret_key()?))
    }
}

const fn clamp_interval(interval: Duration) -> Duration {
    if interval.as_nanos() < MIN_INTERVAL.as_nanos() {
        MIN_INTERVAL
    } else {
        interval
    }
}

// The JSON layout of a configuration file.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    host: String,
    #[serde(default)]
    transport: TransportKind,
    credentials: Credentials,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    keep_alive_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    push_buffer: Option<usize>,
    probe_path: Option<DataPath>,
    #[serde(default)]
    xmpp: XmppSettings,
}

impl ConfigFile {
    fn into_config(self) -> Result<GatewayConfig> {
        if self.host.trim().is_empty() {
            return Err(Error::config("The gateway host is empty"));
        }

        let mut config = GatewayConfig::new(self.host, self.transport, self.credentials)
            .xmpp_settings(self.xmpp);

        if let Some(probe_path) = self.probe_path {
            config = config.probe_path(probe_path);
        }

        if let Some(timeout) = self.timeout_ms {
            config = config.timeout(Duration::from_millis(timeout));
        }

        let mut retry = RetryPolicy::new(self.retries.unwrap_or(config.retry.attempts()));
        if let Some(backoff) = self.backoff_ms {
            retry = retry.base_delay(Duration::from_millis(backoff));
        }
        if let Some(max_backoff) = self.max_backoff_ms {
            retry = retry.max_delay(Duration::from_millis(max_backoff));
        }
        config = config.retry(retry);

        if let Some(keep_alive) = self.keep_alive_secs {
            config = config.keep_alive(Duration::from_secs(keep_alive));
        }
        if let Some(poll_interval) = self.poll_interval_secs {
            config = config.poll_interval(Duration::from_secs(poll_interval));
        }
        if let Some(push_buffer) = self.push_buffer {
            config = config.push_buffer(push_buffer);
        }

        // Fail early on malformed raw keys.
        let _ = config.credentials.secret_key()?;

        Ok(config)
    }
}
