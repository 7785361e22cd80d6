use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use curve25519_dalek::edwards::CompressedEdwardsY;
use iroh::{PublicKey as PPublicKey, SecretKey as SSecretKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Size of Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// PEM tag used when marshalling secret keys
pub const PEM_TAG: &str = "PRIVATE KEY";

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The key bytes could not be parsed
    #[error("malformed key: {0}")]
    Malformed(String),
    /// The OS random source failed
    #[error("entropy source failure: {0}")]
    Entropy(String),
}

/// Public half of an owner or node keypair
///
/// A thin wrapper around Iroh's `PublicKey`. The same type names both owners
/// (who publish records and receive encrypted chunks) and nodes (whose id on
/// the network is their public key).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Copy)]
pub struct PublicKey(PPublicKey);

impl Deref for PublicKey {
    type Target = PPublicKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<PPublicKey> for PublicKey {
    fn from(key: PPublicKey) -> Self {
        PublicKey(key)
    }
}

impl From<PublicKey> for PPublicKey {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            KeyError::Malformed(format!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl PublicKey {
    /// Build a public key from raw bytes, rejecting points off the curve
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, KeyError> {
        PPublicKey::from_bytes(bytes)
            .map(PublicKey)
            .map_err(|e| KeyError::Malformed(format!("invalid public key: {}", e)))
    }

    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|e| KeyError::Malformed(format!("public key hex decode error: {}", e)))?;
        Self::from_bytes(&buff)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Short prefix of the hex encoding, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..10].to_string()
    }

    /// Convert Ed25519 public key to X25519 (Montgomery curve) for ECDH
    ///
    /// Ed25519 uses the Edwards curve, while ECDH requires the Montgomery curve.
    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_x25519(&self) -> Result<X25519PublicKey, KeyError> {
        let edwards_bytes = self.to_bytes();
        let edwards_point = CompressedEdwardsY::from_slice(&edwards_bytes)
            .map_err(|_| KeyError::Malformed("public key invalid edwards point".into()))?
            .decompress()
            .ok_or_else(|| {
                KeyError::Malformed("public key failed to decompress edwards point".into())
            })?;

        let montgomery_point = edwards_point.to_montgomery();
        Ok(X25519PublicKey::from(montgomery_point.to_bytes()))
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(
        &self,
        msg: &[u8],
        signature: &ed25519_dalek::Signature,
    ) -> Result<(), ed25519_dalek::SignatureError> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&self.to_bytes())?;
        verifying_key.verify_strict(msg, signature)
    }
}

/// Secret half of an Ed25519 keypair
///
/// Owners use it to sign publication records and to decrypt chunks sealed
/// for their public key. Nodes use one as their network identity.
///
/// Persisted with [`SecretKey::marshal`] as PEM (tag `PRIVATE KEY`, 32 raw
/// bytes) and read back with [`SecretKey::load`]. The round trip is
/// bit-for-bit.
///
/// ```ignore
/// let key = SecretKey::generate()?;
/// std::fs::write("owner.pem", key.marshal())?;
/// let same = SecretKey::load(&std::fs::read("owner.pem")?)?;
/// assert_eq!(key.public(), same.public());
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretKey(pub SSecretKey);

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(SSecretKey::from_bytes(&secret))
    }
}

impl Deref for SecretKey {
    type Target = SSecretKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&self.public()).finish()
    }
}

impl SecretKey {
    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|e| KeyError::Malformed(format!("private key hex decode error: {}", e)))?;
        Ok(Self::from(buff))
    }

    /// Generate a new random secret key from the OS CSPRNG
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes).map_err(|e| KeyError::Entropy(e.to_string()))?;
        Ok(Self::from(bytes))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public())
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Serialize the key for storage
    pub fn marshal(&self) -> Vec<u8> {
        self.to_pem().into_bytes()
    }

    /// Deserialize a key produced by [`SecretKey::marshal`]
    pub fn load(bytes: &[u8]) -> Result<Self, KeyError> {
        let pem_str = std::str::from_utf8(bytes)
            .map_err(|_| KeyError::Malformed("key file is not valid utf-8".into()))?;
        Self::from_pem(pem_str)
    }

    pub fn to_pem(&self) -> String {
        let pem = pem::Pem::new(PEM_TAG, self.to_bytes());
        pem::encode(&pem)
    }

    /// Parse a secret key from PEM format
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Malformed`] if:
    /// - The PEM string is malformed
    /// - The PEM tag is not "PRIVATE KEY"
    /// - The key size is incorrect
    pub fn from_pem(pem_str: &str) -> Result<Self, KeyError> {
        let pem = pem::parse(pem_str)
            .map_err(|e| KeyError::Malformed(format!("failed to parse PEM: {}", e)))?;

        if pem.tag() != PEM_TAG {
            return Err(KeyError::Malformed(format!(
                "invalid PEM tag, expected {}, got {}",
                PEM_TAG,
                pem.tag()
            )));
        }

        let bytes: [u8; PRIVATE_KEY_SIZE] = pem.contents().try_into().map_err(|_| {
            KeyError::Malformed(format!(
                "invalid private key size in PEM, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                pem.contents().len()
            ))
        })?;
        Ok(Self::from(bytes))
    }

    /// Convert Ed25519 secret key to X25519 for ECDH
    ///
    /// The scalar bytes of the Ed25519 key are used as the X25519 private key.
    pub(crate) fn to_x25519(&self) -> StaticSecret {
        let signing_key = self.0.secret();
        let scalar_bytes = signing_key.to_scalar_bytes();
        StaticSecret::from(scalar_bytes)
    }

    /// Sign a message with this secret key using Ed25519.
    pub fn sign(&self, msg: &[u8]) -> ed25519_dalek::Signature {
        // iroh pins its own ed25519_dalek; both share the 64-byte encoding
        let sig = self.0.sign(msg);
        ed25519_dalek::Signature::from_bytes(&sig.to_bytes())
    }
}
