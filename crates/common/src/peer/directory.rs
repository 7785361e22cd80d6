//! Who holds what: known peers and the subjects they provide
//!
//! The directory keeps three tables behind short-lived locks:
//!  - known peers, with a failure count used to evict dead ones
//!  - providers per [`Subject`], learned from announcements and expiring
//!    after their ttl
//!  - the subjects this node holds itself
//!
//! None of these locks is held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::protocol::{Message, Reply, Subject};
use super::transport::{request_with_timeout, Transport, TransportError};
use super::PeerAddr;
use crate::context::{Cancelled, Context};
use crate::crypto::PublicKey;
use crate::disk;

/// Upper bound on the ttl we honour from a remote announcement
pub const MAX_ANNOUNCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Subjects sent per announce message
pub const ANNOUNCE_BATCH: usize = 512;
/// Peers returned in answer to a hello
const HELLO_PEER_LIMIT: usize = 32;
/// Known peers asked during one provider query
const QUERY_PEER_LIMIT: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("no peers reachable: reached {reached} of {attempted} bootstrap peers")]
    NoPeersReachable { attempted: usize, reached: usize },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// How many bootstrap peers must answer before the node counts as connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPolicy {
    /// At least one
    #[default]
    Any,
    /// At least `n`
    Quorum(usize),
    /// Every configured peer
    All,
}

impl BootstrapPolicy {
    pub fn satisfied(&self, reached: usize, attempted: usize) -> bool {
        match self {
            BootstrapPolicy::Any => reached >= 1,
            BootstrapPolicy::Quorum(n) => reached >= (*n).max(1),
            BootstrapPolicy::All => reached == attempted,
        }
    }

    /// Judge a bootstrap round
    ///
    /// `Quorum` and `All` count configured peers only. Under `Any`, or
    /// when nothing is configured, a cached peer answering is enough; the
    /// round fails only if every configured and cached peer is down.
    pub fn met(
        &self,
        configured_reached: usize,
        configured: usize,
        cached_reached: usize,
    ) -> bool {
        match self {
            _ if configured == 0 => cached_reached >= 1,
            BootstrapPolicy::Any => configured_reached + cached_reached >= 1,
            policy => policy.satisfied(configured_reached, configured),
        }
    }
}

impl fmt::Display for BootstrapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapPolicy::Any => write!(f, "any"),
            BootstrapPolicy::Quorum(n) => write!(f, "quorum:{}", n),
            BootstrapPolicy::All => write!(f, "all"),
        }
    }
}

impl FromStr for BootstrapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(BootstrapPolicy::Any),
            "all" => Ok(BootstrapPolicy::All),
            other => {
                let n = other
                    .strip_prefix("quorum:")
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid bootstrap policy {:?}", s))?;
                Ok(BootstrapPolicy::Quorum(n))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    Disconnected,
    Bootstrapping,
    Connected,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub bootstrap_peers: Vec<PeerAddr>,
    pub policy: BootstrapPolicy,
    pub announce_ttl: Duration,
    pub request_timeout: Duration,
    pub fanout: usize,
    /// Where known peers are remembered between runs
    pub cache_path: Option<PathBuf>,
    /// Consecutive failures after which a non-bootstrap peer is forgotten
    pub max_failures: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers: Vec::new(),
            policy: BootstrapPolicy::Any,
            announce_ttl: Duration::from_secs(10 * 60),
            request_timeout: Duration::from_secs(5),
            fanout: 8,
            cache_path: None,
            max_failures: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct KnownPeer {
    addr: PeerAddr,
    failures: u32,
}

#[derive(Debug, Clone)]
struct Provider {
    addr: PeerAddr,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct PeerDirectory {
    transport: Arc<dyn Transport>,
    config: DirectoryConfig,
    state: RwLock<DirectoryState>,
    peers: RwLock<HashMap<PublicKey, KnownPeer>>,
    providers: RwLock<HashMap<Subject, HashMap<PublicKey, Provider>>>,
    local: RwLock<HashSet<Subject>>,
}

impl PeerDirectory {
    pub fn new(transport: Arc<dyn Transport>, config: DirectoryConfig) -> Self {
        Self {
            transport,
            config,
            state: RwLock::new(DirectoryState::Disconnected),
            peers: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            local: RwLock::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.transport.local_addr()
    }

    pub fn state(&self) -> DirectoryState {
        *self.state.read()
    }

    fn set_state(&self, state: DirectoryState) {
        *self.state.write() = state;
    }

    fn is_bootstrap_peer(&self, id: &PublicKey) -> bool {
        self.config.bootstrap_peers.iter().any(|p| p.id == *id)
    }

    /// Join the network
    ///
    /// Dials the configured bootstrap peers and any cached peers and judges
    /// the round with [`BootstrapPolicy::met`]. With nothing configured or
    /// cached the node runs standalone. Returns how many peers answered.
    pub async fn bootstrap(&self, ctx: &Context) -> Result<usize, DirectoryError> {
        self.set_state(DirectoryState::Bootstrapping);
        let me = self.local_addr().id;

        let mut configured: Vec<PeerAddr> = Vec::new();
        for peer in &self.config.bootstrap_peers {
            if peer.id == me {
                continue;
            }
            match configured.iter_mut().find(|p| p.id == peer.id) {
                Some(existing) => existing.merge(peer),
                None => configured.push(peer.clone()),
            }
        }
        let cached: Vec<PeerAddr> = self
            .load_cache()
            .await
            .into_iter()
            .filter(|p| p.id != me && !configured.iter().any(|c| c.id == p.id))
            .collect();

        for peer in configured.iter().chain(cached.iter()) {
            self.add_peer(peer.clone());
        }

        if configured.is_empty() && cached.is_empty() {
            tracing::info!("no bootstrap peers configured, running standalone");
            self.set_state(DirectoryState::Connected);
            return Ok(0);
        }

        let dial = stream::iter(configured.iter().cloned().chain(cached.iter().cloned()))
            .map(|peer| async move {
                let result = self.hello(&peer).await;
                (peer, result)
            })
            .buffer_unordered(self.config.fanout.max(1))
            .collect::<Vec<_>>();

        let results = match ctx.run(dial).await {
            Ok(results) => results,
            Err(cancelled) => {
                self.set_state(DirectoryState::Disconnected);
                return Err(cancelled.into());
            }
        };

        let mut reached = 0;
        let mut rescued = 0;
        for (peer, result) in &results {
            match result {
                Ok(learned) => {
                    tracing::debug!(peer = %peer.id.short(), learned, "bootstrap peer answered");
                    if configured.iter().any(|c| c.id == peer.id) {
                        reached += 1;
                    } else {
                        rescued += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %peer.id.short(), error = %e, "bootstrap peer unreachable");
                }
            }
        }

        let met = self.config.policy.met(reached, configured.len(), rescued);
        let attempted = configured.len() + cached.len();
        let reached = reached + rescued;
        if !met {
            tracing::warn!(
                reached,
                attempted,
                policy = %self.config.policy,
                "bootstrap policy not met"
            );
            self.set_state(DirectoryState::Disconnected);
            return Err(DirectoryError::NoPeersReachable { attempted, reached });
        }

        tracing::info!(
            reached,
            attempted,
            known = self.peers.read().len(),
            "bootstrap complete"
        );
        self.set_state(DirectoryState::Connected);
        self.save_cache().await;
        Ok(reached)
    }

    async fn request(&self, peer: &PeerAddr, message: Message) -> Result<Reply, TransportError> {
        let result = request_with_timeout(
            self.transport.as_ref(),
            peer,
            message,
            self.config.request_timeout,
        )
        .await;
        match &result {
            Ok(_) => self.mark_success(&peer.id),
            Err(_) => self.mark_failure(&peer.id),
        }
        result
    }

    /// Introduce ourselves to `peer` and add the peers it tells us about;
    /// returns how many were new
    pub async fn hello(&self, peer: &PeerAddr) -> Result<usize, TransportError> {
        let from = self.local_addr();
        match self.request(peer, Message::Hello { from }).await? {
            Reply::Peers(peers) => {
                self.add_peer(peer.clone());
                Ok(peers
                    .into_iter()
                    .filter(|p| self.add_peer(p.clone()))
                    .count())
            }
            other => Err(TransportError::unexpected(peer.id, other)),
        }
    }

    pub fn handle_hello(&self, sender: PublicKey, from: PeerAddr) -> Reply {
        if from.id != sender {
            return Reply::Rejected("hello does not match sender".to_string());
        }
        let peers = self
            .known_peers()
            .into_iter()
            .filter(|p| p.id != sender)
            .take(HELLO_PEER_LIMIT)
            .collect();
        self.add_peer(from);
        Reply::Peers(peers)
    }

    /// Make this node findable as a holder of `key`'s records; idempotent
    pub async fn publish_public_key(
        &self,
        ctx: &Context,
        key: PublicKey,
    ) -> Result<usize, DirectoryError> {
        self.announce(ctx, vec![Subject::Owner(key)]).await
    }

    /// Remember `subjects` as held locally without telling anyone yet
    pub fn hold(&self, subjects: impl IntoIterator<Item = Subject>) {
        self.local.write().extend(subjects);
    }

    pub fn holds(&self, subject: &Subject) -> bool {
        self.local.read().contains(subject)
    }

    /// Hold `subjects` and announce them to every known peer
    ///
    /// Best effort: unreachable peers are skipped. Returns how many peers
    /// acknowledged every batch.
    pub async fn announce(
        &self,
        ctx: &Context,
        subjects: Vec<Subject>,
    ) -> Result<usize, DirectoryError> {
        ctx.check()?;
        self.hold(subjects.iter().copied());
        let peers = self.known_peers();
        if subjects.is_empty() || peers.is_empty() {
            return Ok(0);
        }

        let from = self.local_addr();
        let ttl_secs = self.config.announce_ttl.as_secs();
        let subjects = &subjects;
        let from = &from;

        let sends = stream::iter(peers)
            .map(|peer| async move {
                for batch in subjects.chunks(ANNOUNCE_BATCH) {
                    let message = Message::Announce {
                        from: from.clone(),
                        subjects: batch.to_vec(),
                        ttl_secs,
                    };
                    match self.request(&peer, message).await {
                        Ok(Reply::Ack) => {}
                        Ok(other) => {
                            let e = TransportError::unexpected(peer.id, other);
                            tracing::debug!(peer = %peer.id.short(), error = %e, "announce refused");
                            return false;
                        }
                        Err(e) => {
                            tracing::debug!(peer = %peer.id.short(), error = %e, "announce failed");
                            return false;
                        }
                    }
                }
                true
            })
            .buffer_unordered(self.config.fanout.max(1))
            .filter(|acked| futures::future::ready(*acked))
            .count();

        Ok(ctx.run(sends).await?)
    }

    /// Announce everything this node holds, refreshing remote ttls
    pub async fn reannounce(&self, ctx: &Context) -> Result<usize, DirectoryError> {
        let subjects: Vec<Subject> = self.local.read().iter().copied().collect();
        self.announce(ctx, subjects).await
    }

    pub fn handle_announce(
        &self,
        sender: PublicKey,
        from: PeerAddr,
        subjects: Vec<Subject>,
        ttl_secs: u64,
    ) -> Reply {
        if from.id != sender {
            return Reply::Rejected("announce does not match sender".to_string());
        }
        let ttl = Duration::from_secs(ttl_secs).min(MAX_ANNOUNCE_TTL);
        let expires_at = Instant::now() + ttl;
        self.add_peer(from.clone());

        let mut providers = self.providers.write();
        for subject in subjects {
            providers.entry(subject).or_default().insert(
                from.id,
                Provider {
                    addr: from.clone(),
                    expires_at,
                },
            );
        }
        Reply::Ack
    }

    /// Unexpired providers of `subject` we have heard about
    pub fn local_providers(&self, subject: &Subject) -> Vec<PeerAddr> {
        let now = Instant::now();
        self.providers
            .read()
            .get(subject)
            .map(|providers| {
                providers
                    .values()
                    .filter(|p| p.expires_at > now)
                    .map(|p| p.addr.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Providers of `subject`: our own table plus what a sample of known
    /// peers report. Never includes this node; empty is not an error.
    pub async fn find_providers(
        &self,
        ctx: &Context,
        subject: Subject,
    ) -> Result<Vec<PeerAddr>, DirectoryError> {
        let me = self.local_addr().id;
        let mut found: Vec<PeerAddr> = Vec::new();
        let push = |found: &mut Vec<PeerAddr>, addr: PeerAddr| {
            if addr.id == me {
                return;
            }
            match found.iter_mut().find(|p| p.id == addr.id) {
                Some(existing) => existing.merge(&addr),
                None => found.push(addr),
            }
        };

        for addr in self.local_providers(&subject) {
            push(&mut found, addr);
        }

        let mut peers = self.known_peers();
        peers.shuffle(&mut rand::rng());
        peers.truncate(QUERY_PEER_LIMIT);

        let queries = stream::iter(peers)
            .map(|peer| async move {
                match self.request(&peer, Message::FindProviders(subject)).await {
                    Ok(Reply::Providers(list)) => list,
                    Ok(other) => {
                        let e = TransportError::unexpected(peer.id, other);
                        tracing::debug!(%subject, error = %e, "provider query refused");
                        Vec::new()
                    }
                    Err(e) => {
                        tracing::debug!(%subject, peer = %peer.id.short(), error = %e, "provider query failed");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.config.fanout.max(1))
            .collect::<Vec<_>>();

        for list in ctx.run(queries).await? {
            for addr in list {
                self.add_peer(addr.clone());
                push(&mut found, addr);
            }
        }

        tracing::debug!(%subject, providers = found.len(), "resolved providers");
        Ok(found)
    }

    /// Peers that announced they hold records of `owner`
    pub async fn find_peers_for(
        &self,
        ctx: &Context,
        owner: PublicKey,
    ) -> Result<Vec<PeerAddr>, DirectoryError> {
        self.find_providers(ctx, Subject::Owner(owner)).await
    }

    /// Answer a provider query; `held_here` adds this node to the answer
    pub fn handle_find_providers(&self, subject: Subject, held_here: bool) -> Reply {
        let mut providers = self.local_providers(&subject);
        if held_here || self.holds(&subject) {
            providers.push(self.local_addr());
        }
        Reply::Providers(providers)
    }

    /// Re-greet every known peer, forget ones that keep failing, and save
    /// the peer cache; returns how many answered
    pub async fn refresh(&self, ctx: &Context) -> Result<usize, DirectoryError> {
        let peers = self.known_peers();
        let greets = stream::iter(peers)
            .map(|peer| async move { self.hello(&peer).await.is_ok() })
            .buffer_unordered(self.config.fanout.max(1))
            .filter(|ok| futures::future::ready(*ok))
            .count();
        let reached = ctx.run(greets).await?;

        let max_failures = self.config.max_failures;
        let mut dropped = Vec::new();
        self.peers.write().retain(|id, peer| {
            let keep = peer.failures <= max_failures || self.is_bootstrap_peer(id);
            if !keep {
                dropped.push(*id);
            }
            keep
        });
        for id in &dropped {
            tracing::info!(peer = %id.short(), "forgetting unresponsive peer");
        }

        if reached > 0 && self.state() == DirectoryState::Disconnected {
            self.set_state(DirectoryState::Connected);
        }
        self.save_cache().await;
        Ok(reached)
    }

    /// Drop provider entries whose ttl has lapsed; returns how many
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.providers.write().retain(|_, providers| {
            let before = providers.len();
            providers.retain(|_, p| p.expires_at > now);
            removed += before - providers.len();
            !providers.is_empty()
        });
        removed
    }

    /// Add or update a peer; returns true if it was new
    pub fn add_peer(&self, addr: PeerAddr) -> bool {
        if addr.id == self.local_addr().id {
            return false;
        }
        let mut peers = self.peers.write();
        match peers.get_mut(&addr.id) {
            Some(known) => {
                known.addr.merge(&addr);
                false
            }
            None => {
                peers.insert(addr.id, KnownPeer { addr, failures: 0 });
                true
            }
        }
    }

    pub fn known_peers(&self) -> Vec<PeerAddr> {
        self.peers.read().values().map(|p| p.addr.clone()).collect()
    }

    pub fn mark_success(&self, id: &PublicKey) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.failures = 0;
        }
    }

    pub fn mark_failure(&self, id: &PublicKey) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.failures = peer.failures.saturating_add(1);
        }
    }

    /// Write known peers to the cache file, if one is configured
    pub async fn save_cache(&self) {
        let Some(path) = &self.config.cache_path else {
            return;
        };
        let mut peers = self.known_peers();
        peers.sort_by_key(|p| p.id);
        let bytes = match serde_json::to_vec_pretty(&peers) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode peer cache");
                return;
            }
        };
        if let Err(e) = disk::write_atomic(path, bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write peer cache");
        }
    }

    async fn load_cache(&self) -> Vec<PeerAddr> {
        let Some(path) = &self.config.cache_path else {
            return Vec::new();
        };
        match disk::read_optional(path).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(peers) => peers,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt peer cache");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read peer cache");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;

    use super::*;
    use crate::content::ChunkId;
    use crate::crypto::SecretKey;
    use crate::peer::transport::MessageHandler;
    use crate::testkit::MemoryNetwork;

    struct DirectoryHandler(Arc<PeerDirectory>);

    #[async_trait]
    impl MessageHandler for DirectoryHandler {
        async fn handle(&self, from: PublicKey, message: Message) -> Reply {
            match message {
                Message::Hello { from: addr } => self.0.handle_hello(from, addr),
                Message::Announce {
                    from: addr,
                    subjects,
                    ttl_secs,
                } => self.0.handle_announce(from, addr, subjects, ttl_secs),
                Message::FindProviders(subject) => self.0.handle_find_providers(subject, false),
                other => Reply::Rejected(format!("unsupported {}", other.kind())),
            }
        }
    }

    fn node(network: &MemoryNetwork, config: DirectoryConfig) -> Arc<PeerDirectory> {
        let key = SecretKey::generate().unwrap();
        let transport = network.transport(&key);
        let directory = Arc::new(PeerDirectory::new(transport.clone(), config));
        transport
            .serve(Arc::new(DirectoryHandler(directory.clone())))
            .unwrap();
        directory
    }

    fn with_bootstrap(peers: &[&Arc<PeerDirectory>], policy: BootstrapPolicy) -> DirectoryConfig {
        DirectoryConfig {
            bootstrap_peers: peers.iter().map(|d| d.local_addr()).collect(),
            policy,
            ..Default::default()
        }
    }

    #[test]
    fn test_policy() {
        assert!(BootstrapPolicy::Any.satisfied(1, 3));
        assert!(!BootstrapPolicy::Any.satisfied(0, 3));
        assert!(BootstrapPolicy::Quorum(2).satisfied(2, 3));
        assert!(!BootstrapPolicy::Quorum(2).satisfied(1, 3));
        assert!(BootstrapPolicy::All.satisfied(3, 3));
        assert!(!BootstrapPolicy::All.satisfied(2, 3));

        assert_eq!("any".parse::<BootstrapPolicy>(), Ok(BootstrapPolicy::Any));
        assert_eq!(
            "quorum:2".parse::<BootstrapPolicy>(),
            Ok(BootstrapPolicy::Quorum(2))
        );
        assert!("quorum:0".parse::<BootstrapPolicy>().is_err());
        assert!("most".parse::<BootstrapPolicy>().is_err());
        assert_eq!(BootstrapPolicy::Quorum(3).to_string(), "quorum:3");
    }

    #[test]
    fn test_cached_peers_under_policy() {
        // a cached peer rescues Any when every configured peer is down
        assert!(BootstrapPolicy::Any.met(0, 2, 1));
        assert!(!BootstrapPolicy::Any.met(0, 2, 0));
        // Quorum and All stay strict over configured peers
        assert!(!BootstrapPolicy::Quorum(2).met(1, 3, 5));
        assert!(!BootstrapPolicy::All.met(1, 2, 3));
        // nothing configured: only the cache decides
        assert!(BootstrapPolicy::All.met(0, 0, 1));
        assert!(!BootstrapPolicy::Any.met(0, 0, 0));
    }

    #[tokio::test]
    async fn test_standalone_bootstrap() {
        let network = MemoryNetwork::new();
        let a = node(&network, DirectoryConfig::default());
        assert_eq!(a.state(), DirectoryState::Disconnected);
        assert_eq!(a.bootstrap(&Context::background()).await.unwrap(), 0);
        assert_eq!(a.state(), DirectoryState::Connected);
    }

    #[tokio::test]
    async fn test_bootstrap_learns_peers() {
        let network = MemoryNetwork::new();
        let seed = node(&network, DirectoryConfig::default());
        let a = node(&network, with_bootstrap(&[&seed], BootstrapPolicy::Any));
        let b = node(&network, with_bootstrap(&[&seed], BootstrapPolicy::Any));
        let ctx = Context::background();

        a.bootstrap(&ctx).await.unwrap();
        b.bootstrap(&ctx).await.unwrap();

        // b heard about a through the seed
        let known: Vec<_> = b.known_peers().into_iter().map(|p| p.id).collect();
        assert!(known.contains(&a.local_addr().id));
        assert!(known.contains(&seed.local_addr().id));
        // the seed learned both from their hellos
        assert_eq!(seed.known_peers().len(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_policy_unmet() {
        let network = MemoryNetwork::new();
        let up = node(&network, DirectoryConfig::default());
        let down = node(&network, DirectoryConfig::default());
        network.set_online(&down.local_addr().id, false);
        let ctx = Context::background();

        let any = node(&network, with_bootstrap(&[&up, &down], BootstrapPolicy::Any));
        assert_eq!(any.bootstrap(&ctx).await.unwrap(), 1);

        let all = node(&network, with_bootstrap(&[&up, &down], BootstrapPolicy::All));
        let err = all.bootstrap(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::NoPeersReachable {
                attempted: 2,
                reached: 1
            }
        ));
        assert_eq!(all.state(), DirectoryState::Disconnected);

        let quorum = node(
            &network,
            with_bootstrap(&[&up, &down], BootstrapPolicy::Quorum(2)),
        );
        assert!(quorum.bootstrap(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_announce_and_find_providers() {
        let network = MemoryNetwork::new();
        let seed = node(&network, DirectoryConfig::default());
        let a = node(&network, with_bootstrap(&[&seed], BootstrapPolicy::Any));
        let b = node(&network, with_bootstrap(&[&seed], BootstrapPolicy::Any));
        let ctx = Context::background();
        a.bootstrap(&ctx).await.unwrap();
        b.bootstrap(&ctx).await.unwrap();

        let owner = SecretKey::generate().unwrap().public();
        let acks = a.publish_public_key(&ctx, owner).await.unwrap();
        assert!(acks >= 1);
        // idempotent
        a.publish_public_key(&ctx, owner).await.unwrap();

        let found = b.find_peers_for(&ctx, owner).await.unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a.local_addr().id]);

        // nobody holds this chunk
        let missing = Subject::Chunk(ChunkId::from_bytes([7; 32]));
        assert!(b.find_providers(&ctx, missing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_providers_skips_unreachable_peers() {
        let network = MemoryNetwork::new();
        let seed = node(&network, DirectoryConfig::default());
        let a = node(&network, with_bootstrap(&[&seed], BootstrapPolicy::Any));
        let ctx = Context::background();
        a.bootstrap(&ctx).await.unwrap();

        network.set_online(&seed.local_addr().id, false);
        let owner = SecretKey::generate().unwrap().public();
        assert!(a.find_peers_for(&ctx, owner).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_expiry() {
        let network = MemoryNetwork::new();
        let a = node(&network, DirectoryConfig::default());
        let other = SecretKey::generate().unwrap().public();
        let subject = Subject::Chunk(ChunkId::from_bytes([1; 32]));

        let reply = a.handle_announce(other, PeerAddr::new(other), vec![subject], 30);
        assert!(matches!(reply, Reply::Ack));
        assert_eq!(a.local_providers(&subject).len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(a.local_providers(&subject).is_empty());
        assert_eq!(a.prune_expired(), 1);
        assert_eq!(a.prune_expired(), 0);
    }

    #[tokio::test]
    async fn test_spoofed_announce_rejected() {
        let network = MemoryNetwork::new();
        let a = node(&network, DirectoryConfig::default());
        let sender = SecretKey::generate().unwrap().public();
        let claimed = SecretKey::generate().unwrap().public();
        let subject = Subject::Owner(claimed);

        let reply = a.handle_announce(sender, PeerAddr::new(claimed), vec![subject], 60);
        assert!(matches!(reply, Reply::Rejected(_)));
        assert!(a.local_providers(&subject).is_empty());
    }

    #[tokio::test]
    async fn test_peer_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("peers.json");
        let network = MemoryNetwork::new();
        let seed = node(&network, DirectoryConfig::default());
        let ctx = Context::background();

        let a = node(
            &network,
            DirectoryConfig {
                cache_path: Some(cache_path.clone()),
                ..with_bootstrap(&[&seed], BootstrapPolicy::Any)
            },
        );
        a.bootstrap(&ctx).await.unwrap();
        assert!(cache_path.exists());

        // a fresh node with no bootstrap config reconnects from the cache
        let b = node(
            &network,
            DirectoryConfig {
                cache_path: Some(cache_path),
                ..Default::default()
            },
        );
        b.bootstrap(&ctx).await.unwrap();
        let known: Vec<_> = b.known_peers().into_iter().map(|p| p.id).collect();
        assert!(known.contains(&seed.local_addr().id));
    }

    #[tokio::test]
    async fn test_refresh_forgets_dead_peers() {
        let network = MemoryNetwork::new();
        let seed = node(&network, DirectoryConfig::default());
        let gone = node(&network, DirectoryConfig::default());
        let a = node(
            &network,
            DirectoryConfig {
                max_failures: 1,
                ..with_bootstrap(&[&seed], BootstrapPolicy::Any)
            },
        );
        let ctx = Context::background();
        a.bootstrap(&ctx).await.unwrap();
        a.add_peer(gone.local_addr());
        network.set_online(&gone.local_addr().id, false);

        a.refresh(&ctx).await.unwrap();
        a.refresh(&ctx).await.unwrap();

        let known: Vec<_> = a.known_peers().into_iter().map(|p| p.id).collect();
        assert!(!known.contains(&gone.local_addr().id));
        assert!(known.contains(&seed.local_addr().id));
    }
}
