//! Chunking, content identifiers and reassembly

mod chunk;
mod manifest;
mod reassemble;

pub use chunk::{
    Chunk, ChunkId, ChunkKey, Chunker, ChunkerError, CHUNK_ID_SIZE, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE,
};
pub use manifest::{envelope_digest, BlockRef, EnvelopeDigest, Manifest};
pub use reassemble::{reassemble, ChunkFetcher};
