//! The `bosch-gateway-client` library crate provides a set of APIs for
//! reading and writing the data points of a Bosch heating gateway.
//!
//! A gateway can be reached in two ways:
//!
//! - Over `HTTP`, on the local network, through request/response polling
//! - Over `XMPP`, through the Bosch server, with a persistent connection
//!   which also delivers the updates pushed by the gateway
//!
//! Both transports are hidden behind the same [`Gateway`] API, so switching
//! from one to the other only requires a different [`GatewayConfig`].
//! Every payload exchanged with a gateway is encrypted with a key derived
//! from the gateway access key and the user password.
//!
//! `bosch-gateway-client` leverages `tokio` as an asynchronous executor: a
//! [`Gateway`] can be shared among tasks, and requests issued concurrently
//! over `XMPP` are in flight at the same time.
//!
//! The `xmpp` feature enables the default `XMPP` client, built on
//! `tokio-xmpp`. Without it, an `XMPP` gateway requires a custom
//! [`StanzaConnector`](transport::xmpp::StanzaConnector).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Gateway configuration.
pub mod config;
/// Error management.
pub mod error;
/// The transport-agnostic gateway API.
pub mod gateway;
/// Retry policies.
pub mod retry;
/// Scans of the gateway path tree.
pub mod scan;
/// Connection states.
pub mod session;
/// Transports along with the requests they carry.
pub mod transport;

pub use bosch_gateway::{DataPath, DataPoint, Value, ValueKind};

pub use config::{Credentials, GatewayConfig};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{Gateway, GatewayInfo};
pub use session::ConnectionState;
pub use transport::TransportKind;

#[cfg(test)]
mod tests;
