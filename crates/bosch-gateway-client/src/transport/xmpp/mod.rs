#[cfg(feature = "xmpp")]
mod client;
mod driver;
mod frame;
mod link;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bosch_gateway::crypto::Codec;

use futures_util::stream::{self, StreamExt};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use tokio_util::sync::{CancellationToken, DropGuard};

use tracing::{debug, warn};

use crate::config::{GatewayConfig, XmppAccount};
use crate::error::{Error, Result};
use crate::session::StateHandle;

use super::{PushStream, Request, RequestTimeout};

use self::driver::{Command, Driver, Push};

#[cfg(feature = "xmpp")]
pub use self::client::XmppConnector;
pub use self::link::{LinkEvent, Outbound, Stanza, StanzaConnector, StanzaLink};

#[cfg(feature = "xmpp")]
pub(crate) fn default_connector() -> Result<Arc<dyn StanzaConnector>> {
    Ok(Arc::new(XmppConnector))
}

#[cfg(not(feature = "xmpp"))]
pub(crate) fn default_connector() -> Result<Arc<dyn StanzaConnector>> {
    Err(Error::config(
        "The `xmpp` feature is disabled, provide a `StanzaConnector`",
    ))
}

// Releases the reply slot of a request unless its reply has arrived.
struct Slot<'a> {
    id: Option<String>,
    commands: &'a mpsc::UnboundedSender<Command>,
}

impl Slot<'_> {
    fn complete(mut self) {
        self.id = None;
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.commands.send(Command::Cancel(id));
        }
    }
}

/// A persistent transport exchanging stanzas with a gateway through the
/// Bosch XMPP server.
///
/// A background task owns the connection: it correlates replies with their
/// requests, fans pushes out to subscribers, pings the server, and reopens
/// the connection when it drops. Dropping the transport stops the task.
pub struct XmppTransport {
    account: XmppAccount,
    codec: Arc<Codec>,
    timeout: Arc<RequestTimeout>,
    next_id: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    pushes: watch::Receiver<Option<broadcast::Sender<Push>>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    _guard: DropGuard,
}

impl std::fmt::Debug for XmppTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmppTransport")
            .field("account", &self.account)
            .field("next_id", &self.next_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl XmppTransport {
    pub(crate) async fn connect(
        config: &GatewayConfig,
        codec: Arc<Codec>,
        timeout: Arc<RequestTimeout>,
        connector: Arc<dyn StanzaConnector>,
        state: StateHandle,
    ) -> Result<Self> {
        let account = config.xmpp_account()?;
        debug!("Connecting `{}` to `{}`", account.jid, account.gateway);

        let link = tokio::time::timeout(timeout.get(), connector.connect(&account))
            .await
            .map_err(|_| Error::timeout(format!("No XMPP session within {:?}", timeout.get())))??;

        let (sender, _) = broadcast::channel(config.push_capacity());
        let (pushes_sender, pushes) = watch::channel(Some(sender));
        let (commands, commands_receiver) = mpsc::unbounded_channel();

        let driver = Driver {
            connector,
            account: account.clone(),
            codec: codec.clone(),
            retry: config.retry_policy(),
            timeout: timeout.clone(),
            keep_alive: config.keep_alive_interval(),
            push_buffer: config.push_capacity(),
            state,
            pushes: pushes_sender,
            commands: commands_receiver,
            pending: HashMap::new(),
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(driver.run(link, cancel.clone()));

        debug!("Connected `{}` to `{}`", account.jid, account.gateway);

        Ok(Self {
            account,
            codec,
            timeout,
            next_id: AtomicU64::new(1),
            commands,
            pushes,
            _guard: cancel.clone().drop_guard(),
            cancel,
            driver: Mutex::new(Some(handle)),
        })
    }

    pub(crate) async fn send_request(&self, request: Request) -> Result<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(Error::not_connected());
        }

        let body = request
            .body
            .as_deref()
            .map(|body| self.codec.seal(body))
            .transpose()?;

        let id = format!("bgc{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, receiver) = oneshot::channel();

        self.commands
            .send(Command::Send {
                id: id.clone(),
                body: frame::request_frame(&request, body.as_deref()),
                reply,
            })
            .map_err(|_| Error::transport("The XMPP connection is closed"))?;

        // Dropping this future or timing out releases the slot.
        let slot = Slot {
            id: Some(id),
            commands: &self.commands,
        };

        let timeout = self.timeout.get();
        let reply = tokio::time::timeout(timeout, receiver)
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "No reply to {} {} within {timeout:?}",
                    request.method, request.path
                ))
            })?
            .map_err(|_| Error::transport("The XMPP connection is closed"))??;
        slot.complete();

        let reply = frame::parse_reply(&reply)
            .ok_or_else(|| Error::transport("The gateway reply is not a valid frame"))?
            .into_body()?;

        if reply.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.codec.open(&reply)?)
    }

    pub(crate) fn receive_stream(&self) -> PushStream {
        let Some(receiver) = self.pushes.borrow().as_ref().map(broadcast::Sender::subscribe)
        else {
            return stream::empty().boxed();
        };

        stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(push) => Some((push, receiver)),
                Err(RecvError::Lagged(missed)) => {
                    warn!("A subscriber missed {missed} pushes");
                    Some((
                        Err(Error::transport(format!("Missed {missed} pushes"))),
                        receiver,
                    ))
                }
                Err(RecvError::Closed) => None,
            }
        })
        .boxed()
    }

    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("XMPP driver ended abnormally: {e}");
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_requests(&self) -> usize {
        let (sender, receiver) = oneshot::channel();
        if self.commands.send(Command::Pending(sender)).is_err() {
            return 0;
        }
        receiver.await.unwrap_or_default()
    }
}
