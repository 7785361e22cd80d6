//! Joining the network under each bootstrap policy

mod common;

use ::common::crypto::SecretKey;
use ::common::peer::{BootstrapPolicy, DirectoryState, PeerAddr};
use ::common::publication::MemoryRecordProvider;
use ::common::store::{Store, StoreError};
use ::common::testkit::TestNode;

fn ghost() -> PeerAddr {
    PeerAddr::new(SecretKey::generate().unwrap().public())
}

#[tokio::test]
async fn test_standalone_is_connected() {
    let (_network, node) = common::setup_network().await;
    assert_eq!(node.store().directory().state(), DirectoryState::Connected);
    assert!(node.store().directory().known_peers().is_empty());
}

#[tokio::test]
async fn test_unreachable_bootstrap_fails_open() {
    let (network, _seed) = common::setup_network().await;
    let err = TestNode::open(&network, "lonely", vec![ghost()])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NoPeersReachable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_any_policy_tolerates_dead_peers() {
    let (network, seed) = common::setup_network().await;
    let node = TestNode::open(&network, "node", vec![ghost(), seed.addr()])
        .await
        .unwrap();
    assert_eq!(node.store().directory().state(), DirectoryState::Connected);
}

#[tokio::test]
async fn test_all_policy_needs_every_peer() {
    let (network, seed) = common::setup_network().await;
    let dead = ghost();
    let err = TestNode::open_with(&network, "strict", |options| {
        options
            .bootstrap_peers(vec![seed.addr(), dead])
            .bootstrap_policy(BootstrapPolicy::All)
    })
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::NoPeersReachable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_quorum_policy() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;

    let node = TestNode::open_with(&network, "quorum", |options| {
        options
            .bootstrap_peers(vec![seed.addr(), alice.addr(), ghost()])
            .bootstrap_policy(BootstrapPolicy::Quorum(2))
    })
    .await
    .unwrap();
    assert_eq!(node.store().directory().state(), DirectoryState::Connected);

    let err = TestNode::open_with(&network, "greedy", |options| {
        options
            .bootstrap_peers(vec![seed.addr(), ghost(), ghost()])
            .bootstrap_policy(BootstrapPolicy::Quorum(2))
    })
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::NoPeersReachable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_join_learns_peers() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;
    let bob = common::join(&network, "bob", &seed).await;

    let known: Vec<_> = bob
        .store()
        .directory()
        .known_peers()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert!(known.contains(&seed.addr().id));
    assert!(known.contains(&alice.addr().id));
}

#[tokio::test]
async fn test_reopen_uses_peer_cache() {
    let (network, seed) = common::setup_network().await;
    let root = tempfile::TempDir::new().unwrap();
    let key = SecretKey::generate().unwrap();

    let options = TestNode::options(root.path()).bootstrap_peers(vec![seed.addr()]);
    let store = Store::open_with(options, network.transport(&key), MemoryRecordProvider::new())
        .await
        .unwrap();
    store.close().await.unwrap();

    // nothing configured this time; the cache still knows the seed
    let store = Store::open_with(
        TestNode::options(root.path()),
        network.transport(&key),
        MemoryRecordProvider::new(),
    )
    .await
    .unwrap();
    let known: Vec<_> = store
        .directory()
        .known_peers()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert!(known.contains(&seed.addr().id));
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_cached_peer_rescues_dead_bootstrap_peer() {
    let (network, seed) = common::setup_network().await;
    let root = tempfile::TempDir::new().unwrap();
    let key = SecretKey::generate().unwrap();

    let options = TestNode::options(root.path()).bootstrap_peers(vec![seed.addr()]);
    let store = Store::open_with(options, network.transport(&key), MemoryRecordProvider::new())
        .await
        .unwrap();
    store.close().await.unwrap();

    // the configured peer is dead but the cached seed still answers
    let options = TestNode::options(root.path()).bootstrap_peers(vec![ghost()]);
    let store = Store::open_with(options, network.transport(&key), MemoryRecordProvider::new())
        .await
        .unwrap();
    assert_eq!(store.directory().state(), DirectoryState::Connected);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_all_cached_peers_dead_fails_open() {
    let (network, seed) = common::setup_network().await;
    let root = tempfile::TempDir::new().unwrap();
    let key = SecretKey::generate().unwrap();

    let options = TestNode::options(root.path()).bootstrap_peers(vec![seed.addr()]);
    let store = Store::open_with(options, network.transport(&key), MemoryRecordProvider::new())
        .await
        .unwrap();
    store.close().await.unwrap();
    network.set_online(&seed.addr().id, false);

    let err = Store::open_with(
        TestNode::options(root.path()),
        network.transport(&key),
        MemoryRecordProvider::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::NoPeersReachable(_)), "{:?}", err);
}
