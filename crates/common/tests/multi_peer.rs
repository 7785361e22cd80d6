//! Blobs put on one node are readable from another

mod common;

use ::common::context::Context;

#[tokio::test]
async fn test_get_from_other_peer() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;
    let bob = common::join(&network, "bob", &seed).await;
    let owner = common::owner();
    let data = common::sample_data(5 * 1024 + 100, 2);

    alice
        .put_bytes(&owner, "photos", "cat.jpg", &data, 100)
        .await
        .unwrap();

    assert_eq!(
        bob.get_bytes(&owner, "photos", "cat.jpg").await.unwrap(),
        data
    );
    // bob now holds every chunk of the blob
    assert_eq!(bob.store().chunks().list().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_reader_survives_owner_going_offline() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;
    let bob = common::join(&network, "bob", &seed).await;
    let owner = common::owner();
    let data = common::sample_data(3 * 1024, 4);

    alice
        .put_bytes(&owner, "photos", "dog.jpg", &data, 100)
        .await
        .unwrap();
    assert_eq!(
        bob.get_bytes(&owner, "photos", "dog.jpg").await.unwrap(),
        data
    );

    network.set_online(&alice.addr().id, false);

    // record and chunks were cached on the first read
    assert_eq!(
        bob.get_bytes(&owner, "photos", "dog.jpg").await.unwrap(),
        data
    );
}

#[tokio::test]
async fn test_chunks_fetched_from_any_holder() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;
    let bob = common::join(&network, "bob", &seed).await;
    let owner = common::owner();
    let data = common::sample_data(2 * 1024, 8);

    alice
        .put_bytes(&owner, "docs", "report.pdf", &data, 100)
        .await
        .unwrap();
    let mut reader = bob
        .store()
        .get(&Context::background(), &owner, "docs", "report.pdf")
        .await
        .unwrap();
    assert_eq!(reader.read_to_end().await.unwrap(), data);

    // carol resolves the record from alice, then loses her
    let carol = common::join(&network, "carol", &seed).await;
    let mut reader = carol
        .store()
        .get(&Context::background(), &owner, "docs", "report.pdf")
        .await
        .unwrap();
    network.set_online(&alice.addr().id, false);

    // bob already holds every chunk and answers for them
    assert_eq!(reader.read_to_end().await.unwrap(), data);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (network, seed) = common::setup_network().await;
    let alice = common::join(&network, "alice", &seed).await;

    alice.store().close().await.unwrap();
    alice.store().close().await.unwrap();

    // the rest of the network keeps working
    let owner = common::owner();
    seed.put_bytes(&owner, "docs", "a.txt", b"still here", 100)
        .await
        .unwrap();
    assert_eq!(
        seed.get_bytes(&owner, "docs", "a.txt").await.unwrap(),
        b"still here"
    );
}
