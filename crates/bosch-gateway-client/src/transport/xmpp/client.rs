use futures_util::StreamExt;
use futures_util::future::BoxFuture;

use tokio::sync::{mpsc, oneshot};

use tokio_xmpp::{AsyncClient, Event};

use tracing::{debug, warn};

use xmpp_parsers::{BareJid, Element};

use crate::config::XmppAccount;
use crate::error::{Error, Result};

use super::link::{LinkEvent, Outbound, Stanza, StanzaConnector, StanzaLink};

// Namespace of client stanzas.
const CLIENT_NS: &str = "jabber:client";

// Namespace of XEP-0199 pings.
const PING_NS: &str = "urn:xmpp:ping";

// The capacity of the link channels.
const LINK_CHANNEL_CAPACITY: usize = 32;

/// A [`StanzaConnector`] built on `tokio-xmpp`.
///
/// It authenticates the gateway contact account through SASL over
/// STARTTLS and binds a resource. Reconnections are left to the XMPP
/// transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmppConnector;

impl StanzaConnector for XmppConnector {
    fn connect(&self, account: &XmppAccount) -> BoxFuture<'static, Result<StanzaLink>> {
        let account = account.clone();
        Box::pin(open(account))
    }
}

async fn open(account: XmppAccount) -> Result<StanzaLink> {
    let jid = BareJid::new(&account.jid)
        .map_err(|e| Error::config(format!("Invalid JID `{}`: {e}", account.jid)))?;

    let (online_sender, online) = oneshot::channel();
    let (outbound, outbound_receiver) = mpsc::channel(LINK_CHANNEL_CAPACITY);
    let (inbound_sender, inbound) = mpsc::channel(LINK_CHANNEL_CAPACITY);

    drop(tokio::spawn(async move {
        let mut client = AsyncClient::new(jid, account.password.as_str());
        let _ = client.set_reconnect(false);

        let session = loop {
            match client.next().await {
                Some(Event::Online { .. }) => break Ok(()),
                Some(Event::Disconnected(e)) => {
                    break Err(Error::transport(format!(
                        "XMPP session for `{}` rejected: {e}",
                        account.jid
                    )));
                }
                Some(_) => {}
                None => {
                    break Err(Error::transport(
                        "XMPP stream ended before the session was established",
                    ));
                }
            }
        };

        let session = match session {
            Ok(()) => client
                .send_stanza(Element::builder("presence", CLIENT_NS).build())
                .await
                .map_err(|e| Error::transport(format!("Impossible to send the presence: {e}"))),
            Err(e) => Err(e),
        };

        let failed = session.is_err();
        if online_sender.send(session).is_err() || failed {
            return;
        }
        debug!("XMPP session for `{}` established", account.jid);

        let domain = account
            .gateway
            .rsplit_once('@')
            .map_or(account.gateway.as_str(), |(_, domain)| domain)
            .to_owned();
        let mut outbound = outbound_receiver;
        let mut ping_id = 0u64;

        loop {
            tokio::select! {
                command = outbound.recv() => {
                    // The link has been dropped.
                    let Some(command) = command else {
                        break;
                    };
                    let element = match command {
                        Outbound::Stanza(stanza) => message(&account.gateway, stanza),
                        Outbound::Ping => {
                            ping_id += 1;
                            ping(&domain, ping_id)
                        }
                    };
                    if let Err(e) = client.send_stanza(element).await {
                        let _ = inbound_sender.send(LinkEvent::Disconnected(e.to_string())).await;
                        return;
                    }
                }
                event = client.next() => match event {
                    Some(Event::Stanza(element)) => {
                        let Some(stanza) = parse_message(&account.gateway, &element) else {
                            continue;
                        };
                        if inbound_sender.send(LinkEvent::Stanza(stanza)).await.is_err() {
                            break;
                        }
                    }
                    Some(Event::Disconnected(e)) => {
                        let _ = inbound_sender.send(LinkEvent::Disconnected(e.to_string())).await;
                        return;
                    }
                    Some(_) => {}
                    None => {
                        let _ = inbound_sender
                            .send(LinkEvent::Disconnected("XMPP stream ended".into()))
                            .await;
                        return;
                    }
                }
            }
        }

        if let Err(e) = client.send_end().await {
            debug!("XMPP stream closed uncleanly: {e}");
        }
    }));

    online
        .await
        .map_err(|_| Error::transport("XMPP session task ended unexpectedly"))??;

    Ok(StanzaLink { outbound, inbound })
}

fn message(gateway: &str, stanza: Stanza) -> Element {
    Element::builder("message", CLIENT_NS)
        .attr("to", gateway.to_owned())
        .attr("id", stanza.id)
        .attr("type", "chat")
        .append(
            Element::builder("body", CLIENT_NS)
                .append(stanza.body)
                .build(),
        )
        .build()
}

fn ping(domain: &str, id: u64) -> Element {
    Element::builder("iq", CLIENT_NS)
        .attr("to", domain.to_owned())
        .attr("id", format!("ping{id}"))
        .attr("type", "get")
        .append(Element::builder("ping", PING_NS).build())
        .build()
}

fn parse_message(gateway: &str, element: &Element) -> Option<Stanza> {
    if !element.is("message", CLIENT_NS) {
        return None;
    }

    let from = element.attr("from").unwrap_or_default();
    if !from.starts_with(gateway) {
        warn!("Ignored message from `{from}`");
        return None;
    }

    let body = element.get_child("body", CLIENT_NS)?.text();
    let id = element.attr("id").unwrap_or_default();
    Some(Stanza::new(id, body))
}
