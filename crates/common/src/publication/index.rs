use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use super::provider::{PutOutcome, RecordProvider};
use super::record::{RecordError, RecordKey, SignedRecord};
use crate::context::{Cancelled, Context};
use crate::crypto::PublicKey;
use crate::peer::directory::{DirectoryError, DirectoryState, PeerDirectory};
use crate::peer::protocol::{Message, Reply};
use crate::peer::transport::{request_with_timeout, Transport, TransportError};
use crate::peer::PeerAddr;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("no record published for {0}")]
    NotFound(RecordKey),
    #[error("no peers reachable to resolve {0}")]
    NoPeersReachable(RecordKey),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("record provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

fn provider_err<E: std::error::Error>(e: E) -> IndexError {
    IndexError::Provider(e.to_string())
}

/// Maps (owner, bucket, filename) to the owner's current signed manifest
///
/// Records live in a local [`RecordProvider`] and are replicated to every
/// peer that announced the owner's key. Reads gather the local copy plus
/// whatever those peers hold and keep the newest authentic one.
#[derive(Debug)]
pub struct PublicationIndex<R: RecordProvider> {
    records: R,
    directory: Arc<PeerDirectory>,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    fanout: usize,
}

impl<R: RecordProvider> PublicationIndex<R> {
    pub fn new(
        records: R,
        directory: Arc<PeerDirectory>,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
        fanout: usize,
    ) -> Self {
        Self {
            records,
            directory,
            transport,
            request_timeout,
            fanout: fanout.max(1),
        }
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    async fn owner_peers(&self, ctx: &Context, owner: PublicKey) -> Result<Vec<PeerAddr>, Cancelled> {
        match self.directory.find_peers_for(ctx, owner).await {
            Ok(peers) => Ok(peers),
            Err(DirectoryError::Cancelled(c)) => Err(c),
            Err(e) => {
                tracing::debug!(owner = %owner.short(), error = %e, "owner lookup failed");
                Ok(Vec::new())
            }
        }
    }

    /// Store a signed record and push it to the owner's peers
    ///
    /// Stale records are kept out: only a strictly newer timestamp replaces
    /// the current one. Replication is best effort and never fails the call.
    pub async fn publish(
        &self,
        ctx: &Context,
        signed: SignedRecord,
    ) -> Result<PutOutcome, IndexError> {
        ctx.check()?;
        signed.verify()?;
        let key = signed.key();

        let outcome = self
            .records
            .put(signed.clone())
            .await
            .map_err(provider_err)?;
        if let PutOutcome::Superseded { current } = outcome {
            tracing::info!(%key, %current, "record superseded by a newer one, not publishing");
            return Ok(outcome);
        }

        let peers = self.owner_peers(ctx, key.owner).await?;
        let signed = &signed;
        let pushes = stream::iter(peers)
            .map(|peer| async move {
                let message = Message::Publish(signed.clone());
                match request_with_timeout(self.transport.as_ref(), &peer, message, self.request_timeout)
                    .await
                {
                    Ok(Reply::Ack) => true,
                    Ok(other) => {
                        let e = TransportError::unexpected(peer.id, other);
                        tracing::debug!(error = %e, "record push refused");
                        false
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "record push failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.fanout)
            .filter(|acked| futures::future::ready(*acked))
            .count();
        let replicas = ctx.run(pushes).await?;

        tracing::info!(%key, ?outcome, replicas, "published record");
        Ok(outcome)
    }

    /// Current record for `key` and the peers that serve its owner
    pub async fn resolve(
        &self,
        ctx: &Context,
        key: &RecordKey,
    ) -> Result<(SignedRecord, Vec<PeerAddr>), IndexError> {
        ctx.check()?;
        let local = self.records.get(key).await.map_err(provider_err)?;
        let peers = self.owner_peers(ctx, key.owner).await?;

        let queries = stream::iter(peers.iter().cloned())
            .map(|peer| async move {
                let message = Message::Lookup(key.clone());
                let result =
                    request_with_timeout(self.transport.as_ref(), &peer, message, self.request_timeout)
                        .await;
                (peer, result)
            })
            .buffer_unordered(self.fanout)
            .collect::<Vec<_>>();
        let replies = ctx.run(queries).await?;

        let mut best = local.clone();
        let mut answered = 0usize;
        for (peer, result) in replies {
            match result {
                Ok(Reply::Record(Some(record))) => {
                    answered += 1;
                    if let Err(e) = record.verify_for(key) {
                        tracing::warn!(peer = %peer.id.short(), error = %e, "skipping untrusted record");
                        self.directory.mark_failure(&peer.id);
                        continue;
                    }
                    if best.as_ref().map_or(true, |b| record.supersedes(b)) {
                        best = Some(record);
                    }
                }
                Ok(Reply::Record(None)) => answered += 1,
                Ok(other) => {
                    let e = TransportError::unexpected(peer.id, other);
                    tracing::debug!(%key, error = %e, "lookup refused");
                }
                Err(e) => tracing::debug!(%key, error = %e, "lookup failed"),
            }
        }

        match best {
            Some(record) => {
                if local.as_ref() != Some(&record) {
                    if let Err(e) = self.records.put(record.clone()).await {
                        tracing::warn!(%key, error = %e, "failed to cache resolved record");
                    }
                }
                tracing::debug!(%key, timestamp = %record.timestamp(), "resolved record");
                Ok((record, peers))
            }
            None => {
                let unreachable = !peers.is_empty() && answered == 0;
                if unreachable || self.directory.state() == DirectoryState::Disconnected {
                    Err(IndexError::NoPeersReachable(key.clone()))
                } else {
                    Err(IndexError::NotFound(key.clone()))
                }
            }
        }
    }

    pub async fn lookup(&self, ctx: &Context, key: &RecordKey) -> Result<SignedRecord, IndexError> {
        Ok(self.resolve(ctx, key).await?.0)
    }

    /// Every record held locally
    pub async fn list_local(&self) -> Result<Vec<SignedRecord>, IndexError> {
        self.records.list().await.map_err(provider_err)
    }

    pub async fn handle_publish(&self, signed: SignedRecord) -> Reply {
        if let Err(e) = signed.verify() {
            tracing::warn!(error = %e, "rejecting pushed record");
            return Reply::Rejected(e.to_string());
        }
        match self.records.put(signed).await {
            Ok(outcome) => {
                tracing::debug!(?outcome, "accepted pushed record");
                Reply::Ack
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to store pushed record");
                Reply::Rejected("record store unavailable".to_string())
            }
        }
    }

    pub async fn handle_lookup(&self, key: RecordKey) -> Reply {
        match self.records.get(&key).await {
            Ok(record) => Reply::Record(record),
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to read record for peer");
                Reply::Rejected("record store unavailable".to_string())
            }
        }
    }
}
