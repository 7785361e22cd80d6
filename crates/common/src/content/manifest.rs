use serde::{Deserialize, Serialize};

use super::chunk::ChunkId;

/// BLAKE3 digest of an encrypted chunk envelope
pub type EnvelopeDigest = [u8; 32];

pub fn envelope_digest(envelope: &[u8]) -> EnvelopeDigest {
    *blake3::hash(envelope).as_bytes()
}

/// One manifest entry
///
/// `digest` lets any peer verify an envelope it received without being able
/// to decrypt it; `id` is checked again by the owner after decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: ChunkId,
    pub size: u32,
    pub digest: EnvelopeDigest,
}

impl BlockRef {
    pub fn verify_envelope(&self, envelope: &[u8]) -> bool {
        envelope_digest(envelope) == self.digest
    }
}

/// Ordered list of the chunks making up one blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    blocks: Vec<BlockRef>,
    size: u64,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: BlockRef) {
        self.size += u64::from(block.size);
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }

    pub fn ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.blocks.iter().map(|b| b.id)
    }

    /// Total plaintext size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl FromIterator<BlockRef> for Manifest {
    fn from_iter<T: IntoIterator<Item = BlockRef>>(iter: T) -> Self {
        let mut manifest = Manifest::new();
        for block in iter {
            manifest.push(block);
        }
        manifest
    }
}
