//! Request/reply wire protocol between crabfs nodes
//!
//! Each request opens one bidirectional stream, writes a bincode
//! [`Message`], and reads back a single bincode [`Reply`].

mod messages;

pub use messages::{Message, Reply, Subject};

use serde::{de::DeserializeOwned, Serialize};

/// ALPN identifier for the crabfs protocol
pub const ALPN: &[u8] = b"/crabfs/1";

/// Largest message or reply accepted on a stream
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {0}: {1}")]
    Encode(&'static str, String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("frame of {0} bytes exceeds limit of {MAX_MESSAGE_SIZE}")]
    TooLarge(usize),
}

pub fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(value).map_err(|e| CodecError::Encode(what, e.to_string()))?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
