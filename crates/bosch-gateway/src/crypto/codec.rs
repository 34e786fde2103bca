use aes::Aes256;

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{Error, Result};

use super::{Envelope, IV_SIZE, SecretKey};

type Aes256CbcEncryptor = cbc::Encryptor<Aes256>;
type Aes256CbcDecryptor = cbc::Decryptor<Aes256>;

/// Encrypts a plaintext with a fresh random initialization vector.
///
/// # Errors
///
/// A crypto error is returned when the key is not 32 bytes long or the
/// operating system cannot provide random bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Envelope> {
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv)
        .map_err(|e| Error::crypto(format!("Impossible to generate an IV: {e}")))?;
    encrypt_with_iv(plaintext, key, iv)
}

/// Decrypts an [`Envelope`] and strips its padding.
///
/// # Errors
///
/// A crypto error is returned when the key is not 32 bytes long, or when the
/// padding is malformed, which happens with a wrong key or a corrupted
/// ciphertext.
pub fn decrypt(envelope: &Envelope, key: &[u8]) -> Result<Vec<u8>> {
    let decryptor = Aes256CbcDecryptor::new_from_slices(key, envelope.iv())
        .map_err(|_| key_length_error(key))?;

    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(envelope.ciphertext())
        .map_err(|_| {
            Error::crypto("Malformed padding: wrong key or corrupted ciphertext")
        })
}

pub(crate) fn encrypt_with_iv(plaintext: &[u8], key: &[u8], iv: [u8; IV_SIZE]) -> Result<Envelope> {
    let encryptor =
        Aes256CbcEncryptor::new_from_slices(key, &iv).map_err(|_| key_length_error(key))?;

    Envelope::new(iv, encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn key_length_error(key: &[u8]) -> Error {
    Error::crypto(format!(
        "Key must be {} bytes long, found {} bytes",
        super::KEY_SIZE,
        key.len()
    ))
}

/// The payload codec bound to a [`SecretKey`].
///
/// A codec holds no state besides its key, so a single instance can be
/// shared among concurrent tasks.
#[derive(Debug, Clone)]
pub struct Codec {
    key: SecretKey,
}

impl Codec {
    /// Creates a [`Codec`].
    #[must_use]
    pub const fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Encrypts a plaintext into an [`Envelope`].
    ///
    /// # Errors
    ///
    /// A crypto error is returned when no random bytes are available for
    /// the initialization vector.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope> {
        encrypt(plaintext, self.key.as_bytes())
    }

    /// Decrypts an [`Envelope`].
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the padding is malformed.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        decrypt(envelope, self.key.as_bytes())
    }

    /// Encrypts a plaintext into its base64 wire text.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when no random bytes are available for
    /// the initialization vector.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        self.encrypt(plaintext).map(|envelope| envelope.to_base64())
    }

    /// Decrypts a base64 wire text.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the text is not a valid envelope or
    /// its padding is malformed.
    pub fn open(&self, text: &str) -> Result<Vec<u8>> {
        self.decrypt(&Envelope::from_base64(text)?)
    }
}
