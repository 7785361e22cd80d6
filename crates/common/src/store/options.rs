use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::content::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::context::Context;
use crate::peer::{BootstrapPolicy, PeerAddr};

const NODE_KEY_FILE: &str = "node.pem";
const PEER_CACHE_FILE: &str = "peers.json";
const RECORDS_DIR: &str = "records";
const CHUNKS_DIR: &str = "chunks";

/// Everything needed to open a [`super::Store`]
///
/// Only `root` is required; the rest default to values that suit a small
/// swarm on a LAN or the open internet.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Parent of every operation the store runs; cancelling it closes the
    /// store's background work
    pub context: Context,
    pub root: PathBuf,
    /// Tried in order during bootstrap
    pub bootstrap_peers: Vec<PeerAddr>,
    pub bootstrap_policy: BootstrapPolicy,
    /// Address to bind the endpoint to; ephemeral when unset
    pub listen_addr: Option<SocketAddr>,
    pub chunk_size: usize,
    /// Peers asked concurrently for one chunk
    pub fetch_fanout: usize,
    /// Chunks of one blob fetched concurrently
    pub fetch_window: usize,
    pub fetch_retries: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    pub announce_ttl: Duration,
    pub reannounce_interval: Duration,
    pub dht_discovery: bool,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            context: Context::background(),
            root: root.into(),
            bootstrap_peers: Vec::new(),
            bootstrap_policy: BootstrapPolicy::Any,
            listen_addr: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_fanout: 4,
            fetch_window: 8,
            fetch_retries: 3,
            retry_backoff: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
            announce_ttl: Duration::from_secs(10 * 60),
            reannounce_interval: Duration::from_secs(4 * 60),
            dht_discovery: false,
        }
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn bootstrap_peers(mut self, peers: impl IntoIterator<Item = PeerAddr>) -> Self {
        self.bootstrap_peers = peers.into_iter().collect();
        self
    }

    pub fn bootstrap_policy(mut self, policy: BootstrapPolicy) -> Self {
        self.bootstrap_policy = policy;
        self
    }

    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn fetch_fanout(mut self, fanout: usize) -> Self {
        self.fetch_fanout = fanout;
        self
    }

    pub fn fetch_window(mut self, window: usize) -> Self {
        self.fetch_window = window;
        self
    }

    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn announce_ttl(mut self, ttl: Duration) -> Self {
        self.announce_ttl = ttl;
        self
    }

    pub fn reannounce_interval(mut self, interval: Duration) -> Self {
        self.reannounce_interval = interval;
        self
    }

    pub fn dht_discovery(mut self, enabled: bool) -> Self {
        self.dht_discovery = enabled;
        self
    }

    /// Reject settings no store could run with
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(format!(
                "chunk_size {} must be in 1..={}",
                self.chunk_size, MAX_CHUNK_SIZE
            ));
        }
        if self.fetch_fanout == 0 || self.fetch_window == 0 {
            return Err("fetch_fanout and fetch_window must be at least 1".into());
        }
        if self.reannounce_interval.is_zero() {
            return Err("reannounce_interval must be non-zero".into());
        }
        if self.announce_ttl < self.reannounce_interval {
            tracing::warn!(
                ttl = ?self.announce_ttl,
                interval = ?self.reannounce_interval,
                "announce ttl shorter than reannounce interval, providers will flap"
            );
        }
        Ok(())
    }

    pub fn node_key_path(&self) -> PathBuf {
        self.root.join(NODE_KEY_FILE)
    }

    pub fn peer_cache_path(&self) -> PathBuf {
        self.root.join(PEER_CACHE_FILE)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join(CHUNKS_DIR)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let options = StoreOptions::new("/tmp/crabfs");
        assert!(options.validate().is_ok());
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(options.chunks_dir(), PathBuf::from("/tmp/crabfs/chunks"));
        assert_eq!(options.peer_cache_path(), PathBuf::from("/tmp/crabfs/peers.json"));
    }

    #[test]
    fn test_invalid_options() {
        assert!(StoreOptions::new("/tmp").chunk_size(0).validate().is_err());
        assert!(StoreOptions::new("/tmp")
            .chunk_size(MAX_CHUNK_SIZE + 1)
            .validate()
            .is_err());
        assert!(StoreOptions::new("/tmp").fetch_window(0).validate().is_err());
        assert!(StoreOptions::new("/tmp")
            .reannounce_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
