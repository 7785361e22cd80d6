//! Content addressing: identical content is stored once per owner

mod common;

#[tokio::test]
async fn test_same_content_two_filenames() {
    let (_network, node) = common::setup_network().await;
    let owner = common::owner();
    let data = common::sample_data(3 * 1024, 1);

    let first = node
        .put_bytes(&owner, "docs", "a.bin", &data, 100)
        .await
        .unwrap();
    let stored = node.store().chunks().list().await.unwrap().len();
    assert_eq!(stored, 3);

    let second = node
        .put_bytes(&owner, "backup", "copy-of-a.bin", &data, 100)
        .await
        .unwrap();

    assert_eq!(
        first.manifest.ids().collect::<Vec<_>>(),
        second.manifest.ids().collect::<Vec<_>>()
    );
    // no new chunks were written
    assert_eq!(node.store().chunks().list().await.unwrap().len(), stored);
    assert_eq!(
        node.get_bytes(&owner, "backup", "copy-of-a.bin")
            .await
            .unwrap(),
        data
    );
}

#[tokio::test]
async fn test_repeated_chunk_within_blob() {
    let (_network, node) = common::setup_network().await;
    let owner = common::owner();
    // four identical chunks
    let data = vec![7u8; 4 * 1024];

    let summary = node
        .put_bytes(&owner, "docs", "sevens", &data, 100)
        .await
        .unwrap();
    assert_eq!(summary.manifest.len(), 4);
    assert_eq!(node.store().chunks().list().await.unwrap().len(), 1);
    assert_eq!(node.get_bytes(&owner, "docs", "sevens").await.unwrap(), data);
}

#[tokio::test]
async fn test_owners_do_not_share_ids() {
    let (_network, node) = common::setup_network().await;
    let alice = common::owner();
    let bob = common::owner();
    let data = common::sample_data(1024, 5);

    let a = node
        .put_bytes(&alice, "docs", "same.bin", &data, 100)
        .await
        .unwrap();
    let b = node
        .put_bytes(&bob, "docs", "same.bin", &data, 100)
        .await
        .unwrap();

    assert_ne!(
        a.manifest.ids().collect::<Vec<_>>(),
        b.manifest.ids().collect::<Vec<_>>()
    );
    assert_eq!(node.get_bytes(&alice, "docs", "same.bin").await.unwrap(), data);
    assert_eq!(node.get_bytes(&bob, "docs", "same.bin").await.unwrap(), data);
}
