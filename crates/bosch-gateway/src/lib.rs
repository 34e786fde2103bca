//! The data interface shared by a Bosch heating gateway and its clients.
//!
//! This crate provides APIs to:
//!
//! - Address gateway data points through hierarchical [`path::DataPath`]s.
//! - Represent typed data point values and validate writes against the
//!   metadata reported by the gateway, such as the allowed values of an
//!   enumeration or the range of a setpoint.
//! - Decode the JSON documents a gateway returns into data points or
//!   reference listings, and encode the documents used to write values.
//! - Encrypt and decrypt every payload exchanged with a gateway through a
//!   symmetric codec whose key is derived from the device credentials.
//!
//! A gateway encrypts its JSON documents while a client decrypts them and
//! uses the data for its tasks. Both sides rely on the same codec, so a test
//! gateway can be built on top of this crate as well.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Payload encryption and key derivation.
pub mod crypto;
/// Data points and the gateway documents describing them.
pub mod datapoint;
/// Error management.
pub mod error;
/// Hierarchical data point paths.
pub mod path;
/// Typed data point values.
pub mod value;

pub use datapoint::{DataPoint, Resource};
pub use path::DataPath;
pub use value::{Value, ValueKind};
