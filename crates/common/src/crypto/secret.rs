//! Symmetric payload encryption using ChaCha20-Poly1305
//!
//! Every sealed chunk gets its own freshly generated `Secret`, so two
//! envelopes never share a key even when they carry the same plaintext.

use std::ops::Deref;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid secret size, expected {SECRET_SIZE}, got {0}")]
    InvalidSize(usize),
    #[error("entropy source failure: {0}")]
    Entropy(String),
    #[error("encrypt error")]
    Encrypt,
    #[error("decrypt error: {0}")]
    Decrypt(&'static str),
}

/// A 256-bit symmetric key for payload encryption
///
/// Ciphertext layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
/// Callers may bind extra associated data; decryption fails unless the same
/// bytes are presented again.
#[derive(PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Secret([u8; SECRET_SIZE]);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).map_err(|e| SecretError::Entropy(e.to_string()))?;
        Ok(Self(buff))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        let buff: [u8; SECRET_SIZE] = data
            .try_into()
            .map_err(|_| SecretError::InvalidSize(data.len()))?;
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Encrypt `data`, authenticating `aad` alongside it
    pub fn encrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.bytes()));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).map_err(|e| SecretError::Entropy(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: data, aad })
            .map_err(|_| SecretError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_ref());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt output of [`Secret::encrypt`]
    ///
    /// Fails if the input is truncated, was tampered with, was sealed under
    /// another key, or `aad` differs from what was bound at encryption.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecretError::Decrypt("ciphertext too short"));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.bytes()));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &data[NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| SecretError::Decrypt("authentication failed"))
    }
}
