//! Shared helpers for store integration tests
#![allow(dead_code)]

use common::crypto::SecretKey;
use common::testkit::{MemoryNetwork, TestNode};

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A network with one standalone seed node
pub async fn setup_network() -> (MemoryNetwork, TestNode) {
    init_tracing();
    let network = MemoryNetwork::new();
    let seed = TestNode::open(&network, "seed", vec![]).await.unwrap();
    (network, seed)
}

/// Join a new node to `network` through `via`
pub async fn join(network: &MemoryNetwork, name: &str, via: &TestNode) -> TestNode {
    TestNode::open(network, name, vec![via.addr()]).await.unwrap()
}

pub fn owner() -> SecretKey {
    SecretKey::generate().unwrap()
}

/// Deterministic bytes that span several chunks at the test chunk size
pub fn sample_data(len: usize, seed: u8) -> Vec<u8> {
    (0..len as u64)
        .map(|i| {
            let x = (i + seed as u64 * 7919).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            (x >> 56) as u8
        })
        .collect()
}
