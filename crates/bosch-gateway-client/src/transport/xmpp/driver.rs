use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bosch_gateway::crypto::Codec;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::XmppAccount;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::session::{SessionEvent, StateHandle};
use crate::transport::RequestTimeout;

use super::frame;
use super::link::{LinkEvent, Outbound, Stanza, StanzaConnector, StanzaLink};

pub(crate) type Push = Result<Vec<u8>>;
pub(crate) type PushChannel = watch::Sender<Option<broadcast::Sender<Push>>>;

// Requests handled by the driver task.
#[derive(Debug)]
pub(crate) enum Command {
    // Sends a stanza and registers its reply slot.
    Send {
        id: String,
        body: String,
        reply: oneshot::Sender<Result<String>>,
    },
    // Releases the reply slot of a cancelled or timed out request.
    Cancel(String),
    // Reports how many reply slots are registered.
    Pending(oneshot::Sender<usize>),
}

// Why the driver stopped serving a link.
enum Exit {
    Closed,
    LinkLost(String),
}

// The task that owns the XMPP link.
//
// It is the only place where stanzas are written and where reply slots are
// registered, matched, and released.
pub(crate) struct Driver {
    pub(crate) connector: Arc<dyn StanzaConnector>,
    pub(crate) account: XmppAccount,
    pub(crate) codec: Arc<Codec>,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: Arc<RequestTimeout>,
    pub(crate) keep_alive: Duration,
    pub(crate) push_buffer: usize,
    pub(crate) state: StateHandle,
    pub(crate) pushes: PushChannel,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) pending: HashMap<String, oneshot::Sender<Result<String>>>,
}

impl Driver {
    pub(crate) async fn run(mut self, mut link: StanzaLink, cancel: CancellationToken) {
        loop {
            let reason = match self.serve(&mut link, &cancel).await {
                Exit::Closed => break,
                Exit::LinkLost(reason) => reason,
            };

            warn!("Connection to `{}` lost: {reason}", self.account.gateway);
            self.fail_pending(&reason);
            let _ = self.pushes.send_replace(None);
            let _ = self.state.apply(SessionEvent::LinkLost);

            match self.reconnect(&cancel).await {
                Some(new_link) => link = new_link,
                None => break,
            }
        }

        let _ = self.pushes.send_replace(None);
        self.fail_pending("the transport has been closed");
        debug!("XMPP driver for `{}` stopped", self.account.gateway);
    }

    async fn serve(&mut self, link: &mut StanzaLink, cancel: &CancellationToken) -> Exit {
        let mut keep_alive =
            tokio::time::interval_at(Instant::now() + self.keep_alive, self.keep_alive);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = cancel.cancelled() => return Exit::Closed,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Exit::Closed;
                    };
                    if let Err(reason) = self.handle(command, link).await {
                        return Exit::LinkLost(reason);
                    }
                }
                event = link.inbound.recv() => match event {
                    Some(LinkEvent::Stanza(stanza)) => self.dispatch(stanza),
                    Some(LinkEvent::Disconnected(reason)) => return Exit::LinkLost(reason),
                    None => return Exit::LinkLost("link closed".into()),
                },
                _ = keep_alive.tick() => {
                    if link.outbound.send(Outbound::Ping).await.is_err() {
                        return Exit::LinkLost("keep-alive failed".into());
                    }
                }
            }
        }
    }

    async fn handle(
        &mut self,
        command: Command,
        link: &StanzaLink,
    ) -> std::result::Result<(), String> {
        match command {
            Command::Send { id, body, reply } => {
                if reply.is_closed() {
                    return Ok(());
                }
                let stanza = Stanza::new(id.clone(), body);
                if link.outbound.send(Outbound::Stanza(stanza)).await.is_err() {
                    let _ = reply.send(Err(Error::transport("The XMPP connection is closed")));
                    return Err("outbound stream closed".into());
                }
                let _ = self.pending.insert(id, reply);
            }
            Command::Cancel(id) => {
                if self.pending.remove(&id).is_some() {
                    debug!("Released reply slot `{id}`");
                }
            }
            Command::Pending(sender) => {
                let _ = sender.send(self.pending.len());
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, stanza: Stanza) {
        if let Some(reply) = self.pending.remove(&stanza.id) {
            let _ = reply.send(Ok(stanza.body));
            return;
        }

        let body = frame::frame_body(&stanza.body);
        if body.is_empty() {
            debug!("Discarded empty stanza `{}`", stanza.id);
            return;
        }

        let push = self.codec.open(body).map_err(Error::from);
        if let Err(e) = &push {
            error!("Impossible to decrypt push `{}`: {e}", stanza.id);
        }

        if let Some(sender) = self.pushes.borrow().as_ref() {
            // No subscribers is not an error.
            let _ = sender.send(push);
        }
    }

    fn fail_pending(&mut self, reason: &str) {
        for (id, reply) in self.pending.drain() {
            debug!("Failing request `{id}`");
            let _ = reply.send(Err(Error::transport(format!(
                "XMPP connection lost: {reason}"
            ))));
        }
    }

    async fn reconnect(&mut self, cancel: &CancellationToken) -> Option<StanzaLink> {
        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            let _ = self.state.apply(SessionEvent::Connect);

            let delay = self.retry.delay(attempt);
            info!("Reconnecting to `{}` in {delay:?} ({attempt}/{attempts})", self.account.gateway);

            let opened = tokio::select! {
                () = cancel.cancelled() => return None,
                opened = async {
                    tokio::time::sleep(delay).await;
                    tokio::time::timeout(self.timeout.get(), self.connector.connect(&self.account)).await
                } => opened,
            };

            match opened {
                Ok(Ok(link)) => {
                    info!("Reconnected to `{}`", self.account.gateway);
                    let (sender, _) = broadcast::channel(self.push_buffer);
                    let _ = self.pushes.send_replace(Some(sender));
                    let _ = self.state.apply(SessionEvent::Established);
                    return Some(link);
                }
                Ok(Err(e)) => warn!("Reconnection attempt {attempt} failed: {e}"),
                Err(_) => warn!("Reconnection attempt {attempt} timed out"),
            }
            let _ = self.state.apply(SessionEvent::ConnectFailed);
        }

        error!(
            "Giving up on `{}` after {attempts} reconnection attempts",
            self.account.gateway
        );
        None
    }
}
