//! Chunks nobody can serve fail the read, within bounded time

mod common;

use std::time::Duration;

use ::common::context::Context;
use ::common::store::StoreError;

const BOUND: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_only_holder_goes_offline() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;
    let bob = common::join(&network, "bob", &seed).await;
    let owner = common::owner();
    let data = common::sample_data(3 * 1024, 12);
    alice
        .put_bytes(&owner, "docs", "only-copy.bin", &data, 100)
        .await
        .unwrap();

    let mut reader = bob
        .store()
        .get(&Context::background(), &owner, "docs", "only-copy.bin")
        .await
        .unwrap();
    network.set_online(&alice.addr().id, false);

    let result = tokio::time::timeout(BOUND, reader.read_to_end())
        .await
        .expect("read did not give up in time");
    assert!(
        matches!(result, Err(StoreError::MissingChunk(_))),
        "{:?}",
        result
    );
}

#[tokio::test]
async fn test_chunk_lost_by_owner() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;
    let bob = common::join(&network, "bob", &seed).await;
    let owner = common::owner();
    let data = common::sample_data(3 * 1024, 13);
    let summary = alice
        .put_bytes(&owner, "docs", "holey.bin", &data, 100)
        .await
        .unwrap();

    let lost = summary.manifest.blocks()[1].id;
    assert!(alice.store().chunks().remove(&lost).await.unwrap());

    let result = tokio::time::timeout(BOUND, bob.get_bytes(&owner, "docs", "holey.bin"))
        .await
        .expect("read did not give up in time");
    match result {
        Err(StoreError::MissingChunk(id)) => assert_eq!(id, lost),
        other => panic!("expected missing chunk, got {:?}", other),
    }
}

#[tokio::test]
async fn test_standalone_missing_chunk() {
    let (_network, node) = common::setup_network().await;
    let owner = common::owner();
    let summary = node
        .put_bytes(&owner, "docs", "a.bin", &common::sample_data(2048, 1), 100)
        .await
        .unwrap();
    let lost = summary.manifest.blocks()[0].id;
    node.store().chunks().remove(&lost).await.unwrap();

    let result = tokio::time::timeout(BOUND, node.get_bytes(&owner, "docs", "a.bin"))
        .await
        .expect("read did not give up in time");
    assert!(matches!(result, Err(StoreError::MissingChunk(id)) if id == lost));
}
