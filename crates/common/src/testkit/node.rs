use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use super::network::MemoryNetwork;
use crate::context::Context;
use crate::crypto::SecretKey;
use crate::peer::PeerAddr;
use crate::publication::MemoryRecordProvider;
use crate::store::{PutSummary, Store, StoreError, StoreOptions};

/// A store on a [`MemoryNetwork`] with its own temp root
pub struct TestNode {
    pub name: String,
    store: Store<MemoryRecordProvider>,
    // keeps the root alive for the node's lifetime
    _root: TempDir,
}

impl TestNode {
    /// Options tuned for tests: short timeouts, quick retries
    pub fn options(root: &std::path::Path) -> StoreOptions {
        StoreOptions::new(root)
            .chunk_size(1024)
            .fetch_retries(2)
            .retry_backoff(Duration::from_millis(5))
            .request_timeout(Duration::from_secs(2))
            .reannounce_interval(Duration::from_millis(50))
    }

    pub async fn open(
        network: &MemoryNetwork,
        name: impl Into<String>,
        bootstrap: Vec<PeerAddr>,
    ) -> Result<Self, StoreError> {
        Self::open_with(network, name, |options| options.bootstrap_peers(bootstrap)).await
    }

    /// Open with options adjusted by `configure`
    pub async fn open_with(
        network: &MemoryNetwork,
        name: impl Into<String>,
        configure: impl FnOnce(StoreOptions) -> StoreOptions,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        let root = TempDir::new()?;
        let key = SecretKey::generate()?;
        let transport = network.transport(&key);
        let options = configure(Self::options(root.path()));

        let store = Store::open_with(options, transport, MemoryRecordProvider::new()).await?;
        tracing::debug!(name = %name, node_id = %key.public().short(), "test node up");
        Ok(Self {
            name,
            store,
            _root: root,
        })
    }

    pub fn store(&self) -> &Store<MemoryRecordProvider> {
        &self.store
    }

    pub fn addr(&self) -> PeerAddr {
        self.store.local_addr()
    }

    /// Put `data` with a timestamp of `secs` since the epoch
    pub async fn put_bytes(
        &self,
        owner: &SecretKey,
        bucket: &str,
        filename: &str,
        data: &[u8],
        secs: i64,
    ) -> Result<PutSummary, StoreError> {
        let timestamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("timestamp {} out of range", secs))?;
        let mut reader = data;
        self.store
            .put(
                &Context::background(),
                owner,
                bucket,
                filename,
                &mut reader,
                timestamp,
            )
            .await
    }

    pub async fn get_bytes(
        &self,
        owner: &SecretKey,
        bucket: &str,
        filename: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let mut reader = self
            .store
            .get(&Context::background(), owner, bucket, filename)
            .await?;
        reader.read_to_end().await
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.store.close().await
    }
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNode")
            .field("name", &self.name)
            .field("id", &self.addr().id)
            .finish()
    }
}
