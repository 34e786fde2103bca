//! Payload encryption.
//!
//! Every document exchanged with a gateway travels inside an [`Envelope`]:
//!
//! ```text
//! base64( IV (16 bytes) || AES-256-CBC ciphertext (PKCS#7 padded) )
//! ```
//!
//! The 32-byte key is derived from the gateway access key and the user
//! password, see [`SecretKey::derive`].

mod codec;
mod envelope;
mod key;

pub use codec::{Codec, decrypt, encrypt};
pub use envelope::Envelope;
pub use key::SecretKey;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Initialization vector size in bytes.
pub const IV_SIZE: usize = 16;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
