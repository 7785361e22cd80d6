use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::content::{ChunkId, CHUNK_ID_SIZE};
use crate::disk;

#[derive(Debug, thiserror::Error)]
pub enum ChunkStoreError {
    #[error("chunk store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local store of encrypted chunk envelopes
///
/// One file per chunk under a two-level fan-out:
/// `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`.
///
/// The first write of an id wins; later writes of the same id are no-ops,
/// so concurrent pushes and fetches of one chunk never clobber each other.
/// Envelopes are opaque here; integrity is checked by callers against a
/// manifest digest.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    base_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, ChunkStoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        let hex = id.to_hex();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    /// Store an envelope; `Ok(false)` if the id was already present
    pub async fn put(&self, id: ChunkId, envelope: Vec<u8>) -> Result<bool, ChunkStoreError> {
        let path = self.chunk_path(&id);
        let size = envelope.len();
        let written = disk::write_new(&path, envelope).await?;
        if written {
            tracing::debug!(%id, size, "stored chunk");
        }
        Ok(written)
    }

    pub async fn get(&self, id: &ChunkId) -> Result<Option<Bytes>, ChunkStoreError> {
        Ok(disk::read_optional(&self.chunk_path(id))
            .await?
            .map(Bytes::from))
    }

    pub async fn contains(&self, id: &ChunkId) -> Result<bool, ChunkStoreError> {
        match tokio::fs::metadata(self.chunk_path(id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, id: &ChunkId) -> Result<bool, ChunkStoreError> {
        let removed = disk::remove_optional(&self.chunk_path(id)).await?;
        if removed {
            tracing::debug!(%id, "removed chunk");
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<ChunkId>, ChunkStoreError> {
        let mut ids = Vec::new();

        let mut level0 = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(d0) = level0.next_entry().await? {
            if !d0.file_type().await?.is_dir() {
                continue;
            }
            let mut level1 = tokio::fs::read_dir(d0.path()).await?;
            while let Some(d1) = level1.next_entry().await? {
                if !d1.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = tokio::fs::read_dir(d1.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    // skips in-flight temp files
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if name.len() != CHUNK_ID_SIZE * 2 {
                        continue;
                    }
                    if let Ok(id) = ChunkId::from_hex(name) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}
