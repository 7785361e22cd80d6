use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::crypto::SecretKey;

pub const CHUNK_ID_SIZE: usize = 32;
/// Default fixed chunk size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
/// Upper bound on a configurable chunk size; keeps envelopes inside one
/// protocol message
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

const CHUNK_KEY_CONTEXT: &str = "crabfs 2024-06 chunk identifier key";

#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("invalid chunk size {0}, must be in 1..={MAX_CHUNK_SIZE}")]
    InvalidChunkSize(usize),
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Content identifier of a chunk: a keyed BLAKE3 hash of its plaintext
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId([u8; CHUNK_ID_SIZE]);

impl ChunkId {
    pub fn from_bytes(bytes: [u8; CHUNK_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut buff = [0u8; CHUNK_ID_SIZE];
        hex::decode_to_slice(s, &mut buff)?;
        Ok(Self(buff))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", &self.to_hex()[..12])
    }
}

impl FromStr for ChunkId {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Key for computing [`ChunkId`]s, derived from an owner's secret key
///
/// Ids are stable per owner, so re-uploading identical bytes dedups, while
/// observers without the key cannot link ids to guessed contents.
#[derive(Clone)]
pub struct ChunkKey([u8; 32]);

impl fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChunkKey(..)")
    }
}

impl ChunkKey {
    pub fn derive(owner: &SecretKey) -> Self {
        Self(blake3::derive_key(CHUNK_KEY_CONTEXT, &owner.to_bytes()))
    }

    pub fn id_for(&self, plaintext: &[u8]) -> ChunkId {
        ChunkId(*blake3::keyed_hash(&self.0, plaintext).as_bytes())
    }
}

/// An unencrypted piece of a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits a byte stream into fixed-size chunks
///
/// Every chunk but the last is exactly `chunk_size` bytes. Empty input
/// yields no chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    key: ChunkKey,
}

impl Chunker {
    pub fn new(chunk_size: usize, key: ChunkKey) -> Result<Self, ChunkerError> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ChunkerError::InvalidChunkSize(chunk_size));
        }
        Ok(Self { chunk_size, key })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Read the next chunk, or `None` at end of input
    pub async fn next_chunk<R>(&self, reader: &mut R) -> Result<Option<Chunk>, ChunkerError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(self.seal_chunk(Bytes::from(buf))))
    }

    /// Chunk the whole input
    pub async fn chunk<R>(&self, reader: &mut R) -> Result<Vec<Chunk>, ChunkerError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk(reader).await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    fn seal_chunk(&self, data: Bytes) -> Chunk {
        Chunk {
            id: self.key.id_for(&data),
            data,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key() -> ChunkKey {
        ChunkKey::derive(&SecretKey::from([9u8; 32]))
    }

    #[tokio::test]
    async fn test_fixed_boundaries() {
        let chunker = Chunker::new(4, key()).unwrap();
        let data = b"abcdefghij".to_vec();
        let chunks = chunker.chunk(&mut &data[..]).await.unwrap();

        let sizes: Vec<_> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let chunker = Chunker::new(4, key()).unwrap();
        let chunks = chunker.chunk(&mut &b""[..]).await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_deterministic_ids() {
        let chunker = Chunker::new(3, key()).unwrap();
        let a = chunker.chunk(&mut &b"abcabcab"[..]).await.unwrap();
        let b = chunker.chunk(&mut &b"abcabcab"[..]).await.unwrap();
        assert_eq!(a, b);
        // identical chunks share an id
        assert_eq!(a[0].id, a[1].id);
        assert_ne!(a[0].id, a[2].id);
    }

    #[test]
    fn test_ids_are_keyed_per_owner() {
        let other = ChunkKey::derive(&SecretKey::from([10u8; 32]));
        assert_ne!(key().id_for(b"same"), other.id_for(b"same"));
        assert_ne!(key().id_for(b"same").as_bytes(), blake3::hash(b"same").as_bytes());
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(Chunker::new(0, key()).is_err());
        assert!(Chunker::new(MAX_CHUNK_SIZE + 1, key()).is_err());
    }

    #[test]
    fn test_chunk_id_hex() {
        let id = key().id_for(b"x");
        assert_eq!(id.to_hex().parse::<ChunkId>().unwrap(), id);
    }
}
