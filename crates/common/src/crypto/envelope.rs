//! Hybrid public-key encryption of chunk payloads
//!
//! An envelope is `share (72 bytes) || nonce (12) || ciphertext || tag (16)`.
//! The share wraps a one-off [`Secret`] for the recipient; the share bytes
//! are bound as associated data, so a share cannot be swapped onto another
//! ciphertext.

use super::keys::{PublicKey, SecretKey};
use super::secret::{Secret, NONCE_SIZE, TAG_SIZE};
use super::secret_share::{SecretShare, SECRET_SHARE_SIZE};

/// Smallest possible envelope, sealing an empty payload
pub const ENVELOPE_OVERHEAD: usize = SECRET_SHARE_SIZE + NONCE_SIZE + TAG_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Seal `plaintext` so that only `recipient`'s secret key can open it
pub fn encrypt(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, EnvelopeError> {
    let secret = Secret::generate().map_err(|e| EnvelopeError::Encryption(e.to_string()))?;
    let share =
        SecretShare::new(&secret, recipient).map_err(|e| EnvelopeError::Encryption(e.to_string()))?;
    let ciphertext = secret
        .encrypt(plaintext, share.bytes())
        .map_err(|e| EnvelopeError::Encryption(e.to_string()))?;

    let mut envelope = Vec::with_capacity(SECRET_SHARE_SIZE + ciphertext.len());
    envelope.extend_from_slice(share.bytes());
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Open an envelope produced by [`encrypt`]
///
/// Fails with [`EnvelopeError::Decryption`] on a key mismatch, truncated
/// input, or any modified byte.
pub fn decrypt(envelope: &[u8], key: &SecretKey) -> Result<Vec<u8>, EnvelopeError> {
    if envelope.len() < ENVELOPE_OVERHEAD {
        return Err(EnvelopeError::Decryption(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }

    let (share_bytes, ciphertext) = envelope.split_at(SECRET_SHARE_SIZE);
    let share = SecretShare::try_from(share_bytes)
        .map_err(|e| EnvelopeError::Decryption(e.to_string()))?;
    let secret = share
        .recover(key)
        .map_err(|e| EnvelopeError::Decryption(e.to_string()))?;
    secret
        .decrypt(ciphertext, share_bytes)
        .map_err(|e| EnvelopeError::Decryption(e.to_string()))
}
