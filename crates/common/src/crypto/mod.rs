//! Cryptographic primitives for crabfs
//!
//! - **Identity & Authentication**: Ed25519 keypairs for owners and nodes
//! - **Payload encryption**: ChaCha20-Poly1305 under a fresh `Secret` per chunk
//! - **Key wrapping**: ECDH over X25519 (converted from Ed25519) + AES-KW
//!
//! # Security Model
//!
//! ## Owners
//! An owner's Ed25519 keypair both signs publication records and receives
//! chunk envelopes. Peers replicate envelopes and records without ever being
//! able to read chunk contents.
//!
//! ## Envelopes
//! `envelope::encrypt` seals a payload for one public key. Only the matching
//! secret key opens it; every other outcome is a decryption error.
//!
//! ## Content identifiers
//! Chunk ids are BLAKE3 keyed hashes of the plaintext under a key derived
//! from the owner's secret (`ChunkKey`, see `content`). Identical content
//! from one owner dedups; nobody else can confirm a guess against an id.

pub mod envelope;
mod keys;
mod secret;
mod secret_share;

pub use ed25519_dalek::Signature;
pub use envelope::EnvelopeError;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use secret::{Secret, SecretError};
pub use secret_share::{SecretShare, SecretShareError};
