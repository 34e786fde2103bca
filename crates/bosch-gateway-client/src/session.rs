use std::sync::Arc;

use bosch_gateway::crypto::Codec;

use serde::Serialize;

use tokio::sync::{RwLock, watch};

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Connection states of a gateway session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    /// No connection has been opened, or it has been closed.
    #[default]
    Disconnected,
    /// A connection is being opened.
    Connecting,
    /// The connection is open and requests can be sent.
    Connected,
    /// The connection has been lost or has timed out.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
        .fmt(f)
    }
}

// What moves a session from a state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    // A connection is being opened, either by the caller or by a reconnection.
    Connect,
    // The connection is open.
    Established,
    // Opening the connection failed.
    ConnectFailed,
    // An open connection dropped.
    LinkLost,
    // An operation on an open connection timed out.
    TimedOut,
    // The caller closed the session.
    Close,
}

impl ConnectionState {
    // Transitions not listed here leave the state untouched.
    pub(crate) const fn next(self, event: SessionEvent) -> Self {
        match (self, event) {
            (_, SessionEvent::Close) => Self::Disconnected,
            (Self::Disconnected | Self::Failed | Self::Connected, SessionEvent::Connect) => {
                Self::Connecting
            }
            (Self::Connecting, SessionEvent::Established) => Self::Connected,
            (Self::Connecting, SessionEvent::ConnectFailed)
            | (Self::Connected, SessionEvent::LinkLost | SessionEvent::TimedOut) => Self::Failed,
            (state, _) => state,
        }
    }
}

/// A shared handle to the connection state.
#[derive(Debug, Clone)]
pub(crate) struct StateHandle(Arc<watch::Sender<ConnectionState>>);

impl StateHandle {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(ConnectionState::Disconnected);
        Self(Arc::new(sender))
    }

    pub(crate) fn apply(&self, event: SessionEvent) -> ConnectionState {
        let _ = self.0.send_if_modified(|state| {
            let next = state.next(event);
            if next == *state {
                return false;
            }
            debug!("Session state {state} -> {next} on {event:?}");
            *state = next;
            true
        });
        self.get()
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

// The connection of a gateway client.
//
// A session owns the transport and the codec. The transport lock is only
// held to swap or clone the transport handle, never across network calls.
#[derive(Debug)]
pub(crate) struct Session {
    codec: Arc<Codec>,
    state: StateHandle,
    transport: RwLock<Option<Arc<Transport>>>,
}

impl Session {
    pub(crate) fn new(codec: Codec) -> Self {
        Self {
            codec: Arc::new(codec),
            state: StateHandle::new(),
            transport: RwLock::new(None),
        }
    }

    pub(crate) fn codec(&self) -> Arc<Codec> {
        self.codec.clone()
    }

    pub(crate) const fn state(&self) -> &StateHandle {
        &self.state
    }

    // Returns the transport when the session is connected.
    pub(crate) async fn transport(&self) -> Result<Arc<Transport>> {
        if self.state.get() != ConnectionState::Connected {
            return Err(Error::not_connected());
        }
        self.transport
            .read()
            .await
            .clone()
            .ok_or_else(Error::not_connected)
    }

    // Installs a freshly connected transport, closing the previous one.
    pub(crate) async fn install(&self, transport: Transport) {
        let previous = self.transport.write().await.replace(Arc::new(transport));
        if let Some(previous) = previous {
            previous.close().await;
        }
        let _ = self.state.apply(SessionEvent::Established);
    }

    // Tears the transport down after one of its requests timed out.
    //
    // Returns `false` when that transport has already been replaced or
    // closed, in which case the current session is left untouched.
    pub(crate) async fn fail(&self, timed_out: &Arc<Transport>) -> bool {
        let transport = {
            let mut current = self.transport.write().await;
            if !current
                .as_ref()
                .is_some_and(|transport| Arc::ptr_eq(transport, timed_out))
            {
                return false;
            }
            let _ = self.state.apply(SessionEvent::TimedOut);
            current.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
        }
        true
    }

    // Tears the transport down on caller request.
    pub(crate) async fn close(&self) {
        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        let _ = self.state.apply(SessionEvent::Close);
    }
}
