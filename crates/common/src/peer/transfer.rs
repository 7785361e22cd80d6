use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;

use super::chunk_store::{ChunkStore, ChunkStoreError};
use super::directory::{DirectoryError, PeerDirectory};
use super::jobs::JobDispatcher;
use super::protocol::{Message, Reply, Subject};
use super::transport::{request_with_timeout, Transport, TransportError};
use super::PeerAddr;
use crate::content::{envelope_digest, BlockRef, ChunkId, EnvelopeDigest};
use crate::context::{Cancelled, Context};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("chunk {0} could not be retrieved from any peer")]
    MissingChunk(ChunkId),
    #[error(transparent)]
    Store(#[from] ChunkStoreError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Peers asked concurrently for one chunk
    pub fanout: usize,
    /// Extra rounds after the first before giving up on a chunk
    pub retries: u32,
    /// Wait before the second round; doubles every round after
    pub backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fanout: 4,
            retries: 3,
            backoff: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Moves encrypted chunks between the local [`ChunkStore`] and peers
///
/// Fetches are verified against the manifest digest before anything is
/// cached or returned, so a lying peer costs a retry and nothing else.
#[derive(Debug)]
pub struct TransferEngine {
    transport: Arc<dyn Transport>,
    directory: Arc<PeerDirectory>,
    chunks: ChunkStore,
    jobs: JobDispatcher,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<PeerDirectory>,
        chunks: ChunkStore,
        jobs: JobDispatcher,
        config: TransferConfig,
    ) -> Self {
        Self {
            transport,
            directory,
            chunks,
            jobs,
            config,
        }
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Get the envelope for `block`, from disk if we have it, else from peers
    ///
    /// `hints` are peers likely to hold the chunk (the owner's seeders).
    pub async fn fetch(
        &self,
        ctx: &Context,
        block: &BlockRef,
        hints: &[PeerAddr],
    ) -> Result<Bytes, TransferError> {
        ctx.check()?;
        let id = block.id;

        if let Some(local) = self.chunks.get(&id).await? {
            if block.verify_envelope(&local) {
                return Ok(local);
            }
            tracing::warn!(%id, "local chunk does not match manifest digest, discarding");
            self.chunks.remove(&id).await?;
        }

        let subject = Subject::Chunk(id);
        let me = self.directory.local_addr().id;

        for round in 0..=self.config.retries {
            ctx.check()?;

            let mut candidates = self.directory.local_providers(&subject);
            candidates.extend(hints.iter().cloned());
            if round > 0 || candidates.is_empty() {
                match self.directory.find_providers(ctx, subject).await {
                    Ok(found) => candidates.extend(found),
                    Err(DirectoryError::Cancelled(c)) => return Err(c.into()),
                    Err(e) => tracing::debug!(%id, error = %e, "provider lookup failed"),
                }
                candidates.extend(self.directory.known_peers());
            }

            let mut unique: Vec<PeerAddr> = Vec::with_capacity(candidates.len());
            for peer in candidates {
                if peer.id == me {
                    continue;
                }
                match unique.iter_mut().find(|p| p.id == peer.id) {
                    Some(existing) => existing.merge(&peer),
                    None => unique.push(peer),
                }
            }
            unique.shuffle(&mut rand::rng());

            if let Some(envelope) = self.try_peers(ctx, block, unique).await? {
                if self.chunks.put(id, envelope.to_vec()).await? {
                    if let Err(e) = self.jobs.dispatch_announce(vec![subject]) {
                        tracing::debug!(%id, error = %e, "announce worker gone");
                    }
                }
                return Ok(envelope);
            }

            if round < self.config.retries {
                let wait = self.config.backoff.saturating_mul(1u32 << round.min(16));
                tracing::debug!(%id, round, ?wait, "chunk not found, retrying");
                ctx.sleep(wait).await?;
            }
        }

        tracing::warn!(%id, rounds = self.config.retries + 1, "giving up on chunk");
        Err(TransferError::MissingChunk(id))
    }

    /// Ask `peers` in parallel; the first digest-valid envelope wins
    async fn try_peers(
        &self,
        ctx: &Context,
        block: &BlockRef,
        peers: Vec<PeerAddr>,
    ) -> Result<Option<Bytes>, Cancelled> {
        if peers.is_empty() {
            return Ok(None);
        }
        let id = block.id;
        let timeout = self.config.request_timeout;

        let mut replies = stream::iter(peers)
            .map(|peer| async move {
                let result = request_with_timeout(
                    self.transport.as_ref(),
                    &peer,
                    Message::FetchChunk(id),
                    timeout,
                )
                .await;
                (peer, result)
            })
            .buffer_unordered(self.config.fanout.max(1));

        while let Some((peer, result)) = ctx.run(replies.next()).await? {
            match result {
                Ok(Reply::Chunk(Some(envelope))) => {
                    if block.verify_envelope(&envelope) {
                        self.directory.mark_success(&peer.id);
                        tracing::trace!(%id, peer = %peer.id.short(), "fetched chunk");
                        return Ok(Some(Bytes::from(envelope)));
                    }
                    tracing::warn!(
                        %id,
                        peer = %peer.id.short(),
                        "peer sent chunk with wrong digest, rejecting"
                    );
                    self.directory.mark_failure(&peer.id);
                }
                Ok(Reply::Chunk(None)) => {
                    tracing::trace!(%id, peer = %peer.id.short(), "peer does not have chunk");
                }
                Ok(other) => {
                    let e = TransportError::unexpected(peer.id, other);
                    tracing::debug!(%id, error = %e, "chunk request refused");
                }
                Err(e) => {
                    tracing::debug!(%id, error = %e, "chunk request failed");
                    self.directory.mark_failure(&peer.id);
                }
            }
        }
        Ok(None)
    }

    /// Store an envelope locally and queue its announcement
    ///
    /// Returns the digest of the envelope now on disk and whether this call
    /// wrote it. If the id was already stored, the existing envelope is kept
    /// and its digest returned.
    pub async fn push(
        &self,
        id: ChunkId,
        envelope: Vec<u8>,
    ) -> Result<(EnvelopeDigest, bool), TransferError> {
        let digest = envelope_digest(&envelope);
        let (digest, fresh) = loop {
            if self.chunks.put(id, envelope.clone()).await? {
                break (digest, true);
            }
            if let Some(stored) = self.chunks.get(&id).await? {
                break (envelope_digest(&stored), false);
            }
        };

        if let Err(e) = self.jobs.dispatch_announce(vec![Subject::Chunk(id)]) {
            tracing::debug!(%id, error = %e, "announce worker gone");
        }
        Ok((digest, fresh))
    }

    /// Announce every chunk on disk
    pub async fn reannounce(&self, ctx: &Context) -> Result<usize, TransferError> {
        let ids = self.chunks.list().await?;
        self.directory.hold(ids.into_iter().map(Subject::Chunk));
        match self.directory.reannounce(ctx).await {
            Ok(acks) => Ok(acks),
            Err(DirectoryError::Cancelled(c)) => Err(c.into()),
            Err(e) => {
                tracing::debug!(error = %e, "reannounce failed");
                Ok(0)
            }
        }
    }

    pub async fn handle_fetch(&self, id: ChunkId) -> Reply {
        match self.chunks.get(&id).await {
            Ok(envelope) => Reply::Chunk(envelope.map(|b| b.to_vec())),
            Err(e) => {
                tracing::warn!(%id, error = %e, "failed to read chunk for peer");
                Reply::Rejected("chunk unavailable".to_string())
            }
        }
    }
}
