use futures_util::future::BoxFuture;

use tokio::sync::mpsc;

use crate::config::XmppAccount;
use crate::error::Result;

/// A message stanza exchanged with a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    /// Stanza identifier, used to correlate a reply with its request.
    pub id: String,
    /// Stanza body, an HTTP-like frame.
    pub body: String,
}

impl Stanza {
    /// Creates a [`Stanza`].
    #[must_use]
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// What the client sends through a [`StanzaLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A message stanza addressed to the gateway.
    Stanza(Stanza),
    /// A keep-alive ping addressed to the server.
    Ping,
}

/// What a [`StanzaLink`] delivers to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A message stanza sent by the gateway.
    Stanza(Stanza),
    /// The connection dropped.
    Disconnected(String),
}

/// An authenticated XMPP connection to the gateway account.
///
/// Dropping the outbound sender closes the connection. The connection is
/// considered lost when the inbound receiver yields
/// [`LinkEvent::Disconnected`] or is closed.
#[derive(Debug)]
pub struct StanzaLink {
    /// Outbound stanzas.
    pub outbound: mpsc::Sender<Outbound>,
    /// Inbound events.
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens authenticated XMPP connections.
///
/// The default connector is built on `tokio-xmpp`. Tests and alternative
/// XMPP stacks implement this trait to plug into the XMPP transport.
pub trait StanzaConnector: Send + Sync + 'static {
    /// Opens a connection for the given account.
    ///
    /// The returned future resolves once the account is authenticated and
    /// its resource is bound.
    fn connect(&self, account: &XmppAccount) -> BoxFuture<'static, Result<StanzaLink>>;
}

impl std::fmt::Debug for dyn StanzaConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StanzaConnector")
    }
}
