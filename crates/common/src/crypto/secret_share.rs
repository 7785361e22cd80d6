//! Per-recipient key wrapping using ECDH + AES Key Wrap
//!
//! A [`SecretShare`] carries a payload [`Secret`] to exactly one recipient:
//!
//! 1. generate an ephemeral Ed25519 keypair
//! 2. convert it and the recipient key to X25519 and run ECDH
//! 3. wrap the secret with AES-KW (RFC 3394) under the shared secret
//! 4. emit `ephemeral_pubkey || wrapped_secret`
//!
//! Recovery repeats the ECDH from the recipient side. AES-KW carries an
//! integrity check, so unwrapping with any other key fails instead of
//! yielding a wrong secret.

use aes_kw::KekAes256 as Kek;

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError, SECRET_SIZE};

/// AES-KW integrity block size in bytes
pub const KW_NONCE_SIZE: usize = 8;
/// Layout: ephemeral_pubkey (32) || wrapped_secret (40) = 72 bytes
pub const SECRET_SHARE_SIZE: usize = PUBLIC_KEY_SIZE + SECRET_SIZE + KW_NONCE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum SecretShareError {
    #[error("invalid share size, expected {SECRET_SHARE_SIZE}, got {0}")]
    InvalidSize(usize),
    #[error("key wrap failed")]
    Wrap,
    #[error("key unwrap failed")]
    Unwrap,
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// A secret wrapped for a single recipient public key
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SecretShare([u8; SECRET_SHARE_SIZE]);

impl From<[u8; SECRET_SHARE_SIZE]> for SecretShare {
    fn from(bytes: [u8; SECRET_SHARE_SIZE]) -> Self {
        SecretShare(bytes)
    }
}

impl TryFrom<&[u8]> for SecretShare {
    type Error = SecretShareError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SECRET_SHARE_SIZE] = bytes
            .try_into()
            .map_err(|_| SecretShareError::InvalidSize(bytes.len()))?;
        Ok(SecretShare(bytes))
    }
}

impl SecretShare {
    /// Wrap `secret` so only the holder of `recipient`'s secret key can recover it
    pub fn new(secret: &Secret, recipient: &PublicKey) -> Result<Self, SecretShareError> {
        let ephemeral_private = SecretKey::generate()?;
        let ephemeral_public = ephemeral_private.public();

        let shared_secret = ephemeral_private
            .to_x25519()
            .diffie_hellman(&recipient.to_x25519()?);

        let kek = Kek::from(*shared_secret.as_bytes());
        let wrapped = kek
            .wrap_vec(secret.bytes())
            .map_err(|_| SecretShareError::Wrap)?;
        if PUBLIC_KEY_SIZE + wrapped.len() != SECRET_SHARE_SIZE {
            return Err(SecretShareError::InvalidSize(PUBLIC_KEY_SIZE + wrapped.len()));
        }

        let mut share = [0u8; SECRET_SHARE_SIZE];
        share[..PUBLIC_KEY_SIZE].copy_from_slice(&ephemeral_public.to_bytes());
        share[PUBLIC_KEY_SIZE..].copy_from_slice(&wrapped);
        Ok(SecretShare(share))
    }

    /// Recover the wrapped secret with the recipient's private key
    pub fn recover(&self, recipient_secret: &SecretKey) -> Result<Secret, SecretShareError> {
        let ephemeral_public = PublicKey::try_from(&self.0[..PUBLIC_KEY_SIZE])?;

        let shared_secret = recipient_secret
            .to_x25519()
            .diffie_hellman(&ephemeral_public.to_x25519()?);

        let kek = Kek::from(*shared_secret.as_bytes());
        let unwrapped = kek
            .unwrap_vec(&self.0[PUBLIC_KEY_SIZE..])
            .map_err(|_| SecretShareError::Unwrap)?;

        Ok(Secret::from_slice(&unwrapped)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_share_secret() {
        let secret = Secret::from_slice(&[42u8; SECRET_SIZE]).unwrap();
        let private_key = SecretKey::generate().unwrap();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();
        assert_eq!(share.recover(&private_key).unwrap(), secret);
    }

    #[test]
    fn test_share_wrong_recipient() {
        let secret = Secret::generate().unwrap();
        let alice = SecretKey::generate().unwrap();
        let bob = SecretKey::generate().unwrap();

        let share = SecretShare::new(&secret, &alice.public()).unwrap();
        assert!(matches!(
            share.recover(&bob),
            Err(SecretShareError::Unwrap)
        ));
    }

    #[test]
    fn test_share_bytes_roundtrip() {
        let secret = Secret::generate().unwrap();
        let key = SecretKey::generate().unwrap();
        let share = SecretShare::new(&secret, &key.public()).unwrap();

        let parsed = SecretShare::try_from(share.bytes()).unwrap();
        assert_eq!(parsed, share);
        assert!(SecretShare::try_from(&share.bytes()[1..]).is_err());
    }
}
