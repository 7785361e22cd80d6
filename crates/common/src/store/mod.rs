//! The store facade: open a node, put and get blobs, seed, collect garbage
//!
//! A [`Store`] ties the pieces together. Put reads a stream, chunks and
//! encrypts it for the owner, pushes every chunk, and only then signs and
//! publishes the record. Get resolves the record, fetches and decrypts
//! chunks, and hands back a [`BlobReader`] yielding verified plaintext in
//! order.

mod blob_reader;
mod handler;
mod options;
mod seed;

pub use blob_reader::BlobReader;
pub use options::StoreOptions;
pub use seed::SeedHandle;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::address::{validate_bucket, validate_filename, AddressError};
use crate::content::{
    envelope_digest, reassemble, BlockRef, Chunk, ChunkFetcher, ChunkId, ChunkKey, Chunker,
    ChunkerError, Manifest,
};
use crate::context::{CancelHandle, Cancelled, Context};
use crate::crypto::{envelope, EnvelopeError, KeyError, PublicKey, SecretKey};
use crate::disk;
use crate::peer::jobs::{self, JobDispatcher};
use crate::peer::{
    ChunkStore, ChunkStoreError, DirectoryConfig, DirectoryError, IrohTransport, PeerAddr,
    PeerDirectory, Subject, TransferConfig, TransferEngine, TransferError, Transport,
    TransportError,
};
use crate::publication::{
    FsRecordProvider, IndexError, PublicationIndex, PublicationRecord, PutOutcome, RecordError,
    RecordKey, RecordProvider,
};

use handler::NodeHandler;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("not found: {0}")]
    NotFound(RecordKey),
    #[error("no peers reachable: {0}")]
    NoPeersReachable(String),
    #[error("chunk {0} is not retrievable from any peer")]
    MissingChunk(ChunkId),
    #[error("trust violation: {0}")]
    TrustViolation(String),
    #[error(transparent)]
    MalformedAddress(#[from] AddressError),
    #[error("invalid store options: {0}")]
    InvalidOptions(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("record store error: {0}")]
    Records(String),
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
}

impl From<Cancelled> for StoreError {
    fn from(_: Cancelled) -> Self {
        StoreError::Cancelled
    }
}

impl From<KeyError> for StoreError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::Malformed(reason) => StoreError::MalformedKey(reason),
            KeyError::Entropy(reason) => StoreError::Default(anyhow::anyhow!(reason)),
        }
    }
}

impl From<EnvelopeError> for StoreError {
    fn from(e: EnvelopeError) -> Self {
        StoreError::Decryption(e.to_string())
    }
}

impl From<RecordError> for StoreError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Encoding(reason) => StoreError::Records(reason),
            other => StoreError::TrustViolation(other.to_string()),
        }
    }
}

impl From<IndexError> for StoreError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::NotFound(key) => StoreError::NotFound(key),
            IndexError::NoPeersReachable(key) => StoreError::NoPeersReachable(key.to_string()),
            IndexError::Record(e) => e.into(),
            IndexError::Provider(reason) => StoreError::Records(reason),
            IndexError::Cancelled(_) => StoreError::Cancelled,
        }
    }
}

impl From<DirectoryError> for StoreError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Cancelled(_) => StoreError::Cancelled,
            other => StoreError::NoPeersReachable(other.to_string()),
        }
    }
}

impl From<TransferError> for StoreError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::MissingChunk(id) => StoreError::MissingChunk(id),
            TransferError::Store(e) => e.into(),
            TransferError::Cancelled(_) => StoreError::Cancelled,
        }
    }
}

impl From<ChunkStoreError> for StoreError {
    fn from(e: ChunkStoreError) -> Self {
        match e {
            ChunkStoreError::Io(e) => StoreError::Io(e),
        }
    }
}

impl From<ChunkerError> for StoreError {
    fn from(e: ChunkerError) -> Self {
        match e {
            ChunkerError::Io(e) => StoreError::Io(e),
            other => StoreError::InvalidOptions(other.to_string()),
        }
    }
}

/// What a successful put produced
#[derive(Debug, Clone)]
pub struct PutSummary {
    pub key: RecordKey,
    pub manifest: Manifest,
    pub outcome: PutOutcome,
}

impl PutSummary {
    pub fn size(&self) -> u64 {
        self.manifest.size()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcSummary {
    pub removed: usize,
    pub kept: usize,
}

#[derive(Debug)]
struct StoreInner<R: RecordProvider> {
    options: StoreOptions,
    ctx: Context,
    cancel: CancelHandle,
    transport: Arc<dyn Transport>,
    directory: Arc<PeerDirectory>,
    index: PublicationIndex<R>,
    transfer: TransferEngine,
    jobs: JobDispatcher,
    // puts share; gc and put rollback exclude
    gc_lock: tokio::sync::RwLock<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// A crabfs node bound to a root directory
///
/// Cheap to clone; clones share the node. Call [`Store::close`] when done.
#[derive(Debug)]
pub struct Store<R: RecordProvider = FsRecordProvider> {
    inner: Arc<StoreInner<R>>,
}

impl<R: RecordProvider> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Store<FsRecordProvider> {
    /// Open a store on an iroh endpoint with records kept under `root`
    pub async fn open(options: StoreOptions) -> Result<Self, StoreError> {
        options.validate().map_err(StoreError::InvalidOptions)?;
        tokio::fs::create_dir_all(&options.root).await?;

        let node_key = load_or_create_node_key(&options).await?;
        let transport =
            IrohTransport::bind(&node_key, options.listen_addr, options.dht_discovery).await?;
        let records = FsRecordProvider::new(options.records_dir())
            .map_err(|e| StoreError::Records(e.to_string()))?;

        Self::open_with(options, Arc::new(transport), records).await
    }
}

async fn load_or_create_node_key(options: &StoreOptions) -> Result<SecretKey, StoreError> {
    let path = options.node_key_path();
    if let Some(bytes) = disk::read_optional(&path).await? {
        return Ok(SecretKey::load(&bytes)?);
    }
    let key = SecretKey::generate()?;
    disk::write_atomic(&path, key.marshal()).await?;
    tracing::info!(path = %path.display(), node_id = %key.public(), "created node identity");
    Ok(key)
}

impl<R: RecordProvider> Store<R> {
    /// Open a store over any transport and record provider
    ///
    /// Serves inbound requests, bootstraps the peer directory, and starts
    /// the announce worker. Fails with `NoPeersReachable` when the
    /// bootstrap policy is not met.
    pub async fn open_with(
        options: StoreOptions,
        transport: Arc<dyn Transport>,
        records: R,
    ) -> Result<Self, StoreError> {
        options.validate().map_err(StoreError::InvalidOptions)?;
        let chunks = ChunkStore::new(options.chunks_dir())?;
        let (ctx, cancel) = options.context.with_cancel();

        let directory = Arc::new(PeerDirectory::new(
            transport.clone(),
            DirectoryConfig {
                bootstrap_peers: options.bootstrap_peers.clone(),
                policy: options.bootstrap_policy,
                announce_ttl: options.announce_ttl,
                request_timeout: options.request_timeout,
                fanout: options.fetch_fanout.max(8),
                cache_path: Some(options.peer_cache_path()),
                ..Default::default()
            },
        ));
        let (jobs, job_receiver) = JobDispatcher::new();
        let transfer = TransferEngine::new(
            transport.clone(),
            directory.clone(),
            chunks,
            jobs.clone(),
            TransferConfig {
                fanout: options.fetch_fanout,
                retries: options.fetch_retries,
                backoff: options.retry_backoff,
                request_timeout: options.request_timeout,
            },
        );
        let index = PublicationIndex::new(
            records,
            directory.clone(),
            transport.clone(),
            options.request_timeout,
            options.fetch_fanout,
        );

        let inner = Arc::new(StoreInner {
            options,
            ctx: ctx.clone(),
            cancel,
            transport: transport.clone(),
            directory: directory.clone(),
            index,
            transfer,
            jobs,
            gc_lock: tokio::sync::RwLock::new(()),
            worker: Mutex::new(None),
        });

        transport.serve(Arc::new(NodeHandler::new(Arc::downgrade(&inner))))?;

        if let Err(e) = directory.bootstrap(&ctx).await {
            inner.cancel.cancel();
            if let Err(e) = transport.shutdown().await {
                tracing::warn!(error = %e, "failed to shut down transport");
            }
            return Err(e.into());
        }

        let worker = tokio::spawn(jobs::run_worker(job_receiver, directory.clone(), ctx));
        *inner.worker.lock() = Some(worker);

        tracing::info!(
            node_id = %directory.local_addr().id,
            root = %inner.options.root.display(),
            "store open"
        );
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.inner.directory.local_addr()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.inner.directory
    }

    pub fn chunks(&self) -> &ChunkStore {
        self.inner.transfer.chunks()
    }

    pub fn records(&self) -> &R {
        self.inner.index.records()
    }

    /// Announce this node as a holder of `owner`'s records
    pub async fn publish_public_key(
        &self,
        ctx: &Context,
        owner: &PublicKey,
    ) -> Result<usize, StoreError> {
        let ctx = self.inner.ctx.join(ctx);
        Ok(self
            .inner
            .directory
            .publish_public_key(&ctx, *owner)
            .await?)
    }

    /// Store `reader`'s contents as `bucket/filename` for `owner`
    ///
    /// Every chunk is encrypted for the owner and stored locally before the
    /// record is signed and published; peers fetch chunks on demand. On
    /// error or cancellation no record is published, and chunks this put
    /// newly wrote are removed unless a published record has come to use
    /// them.
    pub async fn put<Rd>(
        &self,
        ctx: &Context,
        owner: &SecretKey,
        bucket: &str,
        filename: &str,
        reader: &mut Rd,
        timestamp: DateTime<Utc>,
    ) -> Result<PutSummary, StoreError>
    where
        Rd: AsyncRead + Unpin + Send + ?Sized,
    {
        validate_bucket(bucket)?;
        validate_filename(filename)?;
        let ctx = self.inner.ctx.join(ctx);
        ctx.check()?;

        let guard = self.inner.gc_lock.read().await;
        let chunker = Chunker::new(self.inner.options.chunk_size, ChunkKey::derive(owner))?;

        let mut manifest = Manifest::new();
        let mut fresh: HashSet<ChunkId> = HashSet::new();

        let result = async {
            while let Some(chunk) = ctx.run(chunker.next_chunk(reader)).await?? {
                let id = chunk.id;
                let (block, written) = self.store_chunk(owner, chunk).await?;
                if written {
                    fresh.insert(id);
                }
                manifest.push(block);
                ctx.check()?;
            }

            let record = PublicationRecord {
                owner: owner.public(),
                bucket: bucket.to_string(),
                filename: filename.to_string(),
                manifest: manifest.clone(),
                timestamp,
            }
            .sign(owner)?;

            let owner_subject = Subject::Owner(owner.public());
            self.inner.directory.hold([owner_subject]);
            if let Err(e) = self.inner.jobs.dispatch_announce(vec![owner_subject]) {
                tracing::debug!(error = %e, "announce worker gone");
            }

            Ok::<_, StoreError>(self.inner.index.publish(&ctx, record).await?)
        }
        .await;
        drop(guard);

        let rolled_back = match &result {
            Err(_) if !fresh.is_empty() => self.roll_back(&fresh).await,
            _ => 0,
        };

        let key = RecordKey::new(owner.public(), bucket, filename);
        match result {
            Ok(outcome) => {
                tracing::info!(
                    %key,
                    size = manifest.size(),
                    chunks = manifest.len(),
                    new_chunks = fresh.len(),
                    ?outcome,
                    "put complete"
                );
                Ok(PutSummary {
                    key,
                    manifest,
                    outcome,
                })
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, rolled_back, "put failed");
                Err(e)
            }
        }
    }

    /// Remove chunks a failed put wrote, unless a record references them
    ///
    /// Another put may have reused one of `fresh` and published since, so
    /// this runs with every put excluded and keeps whatever a local record
    /// still names. While other puts are in flight it leaves the chunks
    /// for garbage collection. Returns how many were removed.
    async fn roll_back(&self, fresh: &HashSet<ChunkId>) -> usize {
        let Ok(_guard) = self.inner.gc_lock.try_write() else {
            tracing::debug!(chunks = fresh.len(), "puts in flight, leaving rollback to gc");
            return 0;
        };

        let referenced: HashSet<ChunkId> = match self.inner.index.list_local().await {
            Ok(records) => records
                .iter()
                .flat_map(|r| r.record().manifest.ids().collect::<Vec<_>>())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list records, leaving rollback to gc");
                return 0;
            }
        };

        let mut removed = 0;
        for id in fresh.difference(&referenced) {
            match self.inner.transfer.chunks().remove(id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(%id, error = %e, "failed to roll back chunk"),
            }
        }
        removed
    }

    /// Encrypt and store one chunk, reusing an existing envelope when it
    /// already holds this plaintext
    async fn store_chunk(
        &self,
        owner: &SecretKey,
        chunk: Chunk,
    ) -> Result<(BlockRef, bool), StoreError> {
        let size = chunk.len() as u32;
        let chunks = self.inner.transfer.chunks();

        if let Some(existing) = chunks.get(&chunk.id).await? {
            match envelope::decrypt(&existing, owner) {
                Ok(plain) if plain[..] == chunk.data[..] => {
                    return Ok((
                        BlockRef {
                            id: chunk.id,
                            size,
                            digest: envelope_digest(&existing),
                        },
                        false,
                    ));
                }
                _ => {
                    tracing::warn!(id = %chunk.id, "stored chunk does not decrypt to its content, replacing");
                    chunks.remove(&chunk.id).await?;
                }
            }
        }

        let sealed = envelope::encrypt(&chunk.data, &owner.public())?;
        let (digest, written) = self.inner.transfer.push(chunk.id, sealed).await?;
        Ok((
            BlockRef {
                id: chunk.id,
                size,
                digest,
            },
            written,
        ))
    }

    /// Open `bucket/filename` of `owner` for reading
    ///
    /// Resolves the newest record, then streams chunks in order as the
    /// reader is polled. Dropping or closing the reader cancels fetches
    /// still in flight.
    pub async fn get(
        &self,
        ctx: &Context,
        owner: &SecretKey,
        bucket: &str,
        filename: &str,
    ) -> Result<BlobReader, StoreError> {
        validate_bucket(bucket)?;
        validate_filename(filename)?;
        let (ctx, cancel) = self.inner.ctx.join(ctx).with_cancel();

        let key = RecordKey::new(owner.public(), bucket, filename);
        let (record, hints) = self.inner.index.resolve(&ctx, &key).await?;
        tracing::debug!(
            %key,
            size = record.record().manifest.size(),
            chunks = record.record().manifest.len(),
            seeders = hints.len(),
            "resolved blob"
        );

        let fetcher = Arc::new(OwnerFetcher {
            inner: self.inner.clone(),
            owner: owner.clone(),
            chunk_key: ChunkKey::derive(owner),
            hints,
            ctx,
        });
        let stream = reassemble(
            &record.record().manifest,
            fetcher,
            self.inner.options.fetch_window,
        );
        Ok(BlobReader::new(record, stream, cancel))
    }

    /// Keep serving and re-announcing until the handle is stopped
    pub fn seed(&self) -> SeedHandle {
        seed::spawn(self.inner.clone())
    }

    /// Delete local chunks no locally held record references
    pub async fn collect_garbage(&self) -> Result<GcSummary, StoreError> {
        let _guard = self.inner.gc_lock.write().await;

        let records = self.inner.index.list_local().await?;
        let referenced: HashSet<ChunkId> = records
            .iter()
            .flat_map(|r| r.record().manifest.ids().collect::<Vec<_>>())
            .collect();

        let chunks = self.inner.transfer.chunks();
        let mut summary = GcSummary::default();
        for id in chunks.list().await? {
            if referenced.contains(&id) {
                summary.kept += 1;
            } else if chunks.remove(&id).await? {
                summary.removed += 1;
            }
        }
        tracing::info!(removed = summary.removed, kept = summary.kept, "garbage collected");
        Ok(summary)
    }

    /// Stop background work and release the endpoint
    ///
    /// Idempotent. Open readers and seed handles stop with it.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.inner.cancel.cancel();
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "peer worker panicked");
            }
        }
        self.inner.directory.save_cache().await;
        self.inner.transport.shutdown().await?;
        tracing::info!("store closed");
        Ok(())
    }
}

/// Fetches, decrypts and checks chunks of one owner's blob
struct OwnerFetcher<R: RecordProvider> {
    inner: Arc<StoreInner<R>>,
    owner: SecretKey,
    chunk_key: ChunkKey,
    hints: Vec<PeerAddr>,
    ctx: Context,
}

#[async_trait]
impl<R: RecordProvider> ChunkFetcher for OwnerFetcher<R> {
    type Error = StoreError;

    async fn fetch(&self, block: BlockRef) -> Result<Bytes, StoreError> {
        let sealed = self
            .inner
            .transfer
            .fetch(&self.ctx, &block, &self.hints)
            .await?;
        let plain = envelope::decrypt(&sealed, &self.owner)?;
        if plain.len() != block.size as usize || self.chunk_key.id_for(&plain) != block.id {
            return Err(StoreError::Decryption(format!(
                "chunk {} does not match its manifest entry",
                block.id
            )));
        }
        Ok(Bytes::from(plain))
    }
}
