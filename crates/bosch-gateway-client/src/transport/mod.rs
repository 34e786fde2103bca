/// The HTTP transport.
pub mod http;
/// The XMPP transport.
pub mod xmpp;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bosch_gateway::DataPath;
use bosch_gateway::crypto::Codec;

use futures_util::stream::{self, BoxStream, StreamExt};

use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::session::StateHandle;

use self::http::HttpTransport;
use self::xmpp::{StanzaConnector, XmppTransport};

/// The product name announced to gateways.
pub(crate) const USER_AGENT: &str = "TeleHeater/2.2.3";

/// Transport variants.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Request/response polling over the local network.
    #[default]
    Http,
    /// Persistent stanza streaming through the Bosch XMPP server.
    Xmpp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => "http",
            Self::Xmpp => "xmpp",
        }
        .fmt(f)
    }
}

/// Request methods understood by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Reads a path.
    Get,
    /// Writes a path.
    Put,
}

impl Method {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A gateway request.
///
/// The body is always plaintext, transports encrypt it right before
/// sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Target path.
    pub path: DataPath,
    /// Plaintext body.
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Creates a read [`Request`].
    #[must_use]
    pub const fn get(path: DataPath) -> Self {
        Self {
            method: Method::Get,
            path,
            body: None,
        }
    }

    /// Creates a write [`Request`].
    #[must_use]
    pub const fn put(path: DataPath, body: Vec<u8>) -> Self {
        Self {
            method: Method::Put,
            path,
            body: Some(body),
        }
    }
}

// The timeout of network-bound operations, shared between a gateway and its
// transport so that changes apply to requests already in place.
#[derive(Debug)]
pub(crate) struct RequestTimeout(AtomicU64);

impl RequestTimeout {
    pub(crate) fn new(timeout: Duration) -> Self {
        let shared = Self(AtomicU64::new(1));
        shared.set(timeout);
        shared
    }

    pub(crate) fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self.0.store(millis, Ordering::Relaxed);
    }
}

/// A stream of decrypted inbound pushes.
pub type PushStream = BoxStream<'static, Result<Vec<u8>>>;

/// A connected transport.
#[derive(Debug)]
pub enum Transport {
    /// HTTP transport.
    Http(HttpTransport),
    /// XMPP transport.
    Xmpp(XmppTransport),
}

impl Transport {
    /// Establishes the connection selected by the configuration.
    ///
    /// A connector replaces the default XMPP client, it is ignored by the
    /// HTTP transport.
    ///
    /// # Errors
    ///
    /// A transport error is returned when the gateway is unreachable,
    /// rejects the credentials, or does not answer in time.
    pub(crate) async fn connect(
        config: &GatewayConfig,
        codec: Arc<Codec>,
        timeout: Arc<RequestTimeout>,
        connector: Option<Arc<dyn StanzaConnector>>,
        state: StateHandle,
    ) -> Result<Self> {
        let kind = config.transport();
        let transport = match kind {
            TransportKind::Http => HttpTransport::connect(config, codec, timeout)
                .await
                .map(Self::Http),
            TransportKind::Xmpp => {
                let connector = match connector {
                    Some(connector) => connector,
                    None => xmpp::default_connector()?,
                };
                XmppTransport::connect(config, codec, timeout, connector, state)
                    .await
                    .map(Self::Xmpp)
            }
        };
        transport.map_err(|e| e.with_transport(kind))
    }

    /// Returns the [`TransportKind`].
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Http(_) => TransportKind::Http,
            Self::Xmpp(_) => TransportKind::Xmpp,
        }
    }

    /// Sends a [`Request`] and returns the plaintext reply.
    ///
    /// # Errors
    ///
    /// Network failures, timeouts, non-success statuses and undecryptable
    /// replies are all returned as errors.
    pub async fn send_request(&self, request: Request) -> Result<Vec<u8>> {
        let path = request.path.clone();
        let reply = match self {
            Self::Http(http) => http.send_request(request).await,
            Self::Xmpp(xmpp) => xmpp.send_request(request).await,
        };
        reply.map_err(|e| e.with_path(&path).with_transport(self.kind()))
    }

    /// Returns the stream of decrypted inbound pushes.
    ///
    /// The HTTP transport has no pushes, so its stream is empty.
    #[must_use]
    pub fn receive_stream(&self) -> PushStream {
        match self {
            Self::Http(_) => stream::empty().boxed(),
            Self::Xmpp(xmpp) => xmpp.receive_stream(),
        }
    }

    /// Releases the connection.
    pub async fn close(&self) {
        match self {
            Self::Http(http) => http.close(),
            Self::Xmpp(xmpp) => xmpp.close().await,
        }
    }
}
