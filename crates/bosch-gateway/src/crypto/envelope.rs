use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

use super::{BLOCK_SIZE, IV_SIZE};

/// The encrypted wire representation of a payload.
///
/// The ciphertext length is always a non-zero multiple of [`BLOCK_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    iv: [u8; IV_SIZE],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Creates an [`Envelope`] from an initialization vector and a
    /// ciphertext.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the ciphertext is empty or its length
    /// is not a multiple of the block size.
    pub fn new(iv: [u8; IV_SIZE], ciphertext: Vec<u8>) -> Result<Self> {
        if ciphertext.is_empty() {
            return Err(Error::crypto("Ciphertext is empty"));
        }

        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::crypto(format!(
                "Ciphertext length {} is not a multiple of the block size {BLOCK_SIZE}",
                ciphertext.len()
            )));
        }

        Ok(Self { iv, ciphertext })
    }

    /// Parses an [`Envelope`] from its `IV || ciphertext` byte layout.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the bytes are truncated or the
    /// ciphertext is not block aligned.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IV_SIZE + BLOCK_SIZE {
            return Err(Error::crypto(format!(
                "Envelope of {} bytes is truncated, at least {} bytes are required",
                bytes.len(),
                IV_SIZE + BLOCK_SIZE
            )));
        }

        let (iv, ciphertext) = bytes.split_at(IV_SIZE);
        let mut fixed_iv = [0u8; IV_SIZE];
        fixed_iv.copy_from_slice(iv);

        Self::new(fixed_iv, ciphertext.to_vec())
    }

    /// Parses an [`Envelope`] from its base64 wire text.
    ///
    /// Surrounding whitespace, as well as the zero padding some gateways
    /// append to their bodies, is ignored.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the text is not valid base64 or
    /// the decoded bytes are not a valid envelope.
    pub fn from_base64(text: &str) -> Result<Self> {
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        let bytes = STANDARD.decode(text)?;
        Self::from_bytes(&bytes)
    }

    /// Returns the initialization vector.
    #[must_use]
    pub const fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Returns the ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the `IV || ciphertext` byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(IV_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Returns the base64 wire text.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}
