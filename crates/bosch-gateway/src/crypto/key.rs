use md5::{Digest, Md5};

use zeroize::Zeroize;

use crate::error::{Error, Result};

use super::KEY_SIZE;

// Salt shared by every Bosch gateway.
const MAGIC: [u8; 32] = [
    0x86, 0x78, 0x45, 0xe9, 0x7c, 0x4e, 0x29, 0xdc, 0xe5, 0x22, 0xb9, 0xa7, 0xd3, 0xa3, 0xe0, 0x7b,
    0x15, 0x2b, 0xff, 0xad, 0xdd, 0xbe, 0xd7, 0xf5, 0xff, 0xd8, 0x42, 0xe9, 0x89, 0x5a, 0xd1, 0xe4,
];

/// The symmetric key shared with a gateway.
///
/// The key bytes are wiped from memory when the key is dropped and are never
/// printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Derives the key from the gateway access key and the user password.
    ///
    /// Dashes and whitespace in the access key are ignored, so the key can be
    /// typed as printed on the gateway label.
    #[must_use]
    pub fn derive(access_key: &str, password: &str) -> Self {
        let mut access_key: Vec<u8> = access_key
            .bytes()
            .filter(|byte| *byte != b'-' && !byte.is_ascii_whitespace())
            .collect();

        let mut key = [0u8; KEY_SIZE];

        let mut hasher = Md5::new();
        hasher.update(&access_key);
        hasher.update(MAGIC);
        key[..16].copy_from_slice(&hasher.finalize());

        let mut hasher = Md5::new();
        hasher.update(MAGIC);
        hasher.update(password.as_bytes());
        key[16..].copy_from_slice(&hasher.finalize());

        access_key.zeroize();

        Self(key)
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the slice is not exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::crypto(format!(
                "Key must be {KEY_SIZE} bytes long, found {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Creates a key from its hexadecimal representation.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the string is not valid hexadecimal
    /// or does not encode exactly 32 bytes.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut key = [0u8; KEY_SIZE];
        if let Err(e) = hex::decode_to_slice(hex.trim(), &mut key) {
            key.zeroize();
            return Err(Error::crypto(format!("Invalid hexadecimal key: {e}")));
        }
        Ok(Self(key))
    }

    /// Returns the key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
