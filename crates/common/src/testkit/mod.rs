//! Harness for running several nodes in one process
//!
//! Nodes talk over a [`MemoryNetwork`] instead of QUIC, which keeps tests
//! fast and lets them take peers offline or plant misbehaving ones.
//!
//! ```rust,ignore
//! use common::testkit::{MemoryNetwork, TestNode};
//!
//! let network = MemoryNetwork::new();
//! let alice = TestNode::open(&network, "alice", vec![]).await?;
//! let bob = TestNode::open(&network, "bob", vec![alice.addr()]).await?;
//!
//! alice.put_bytes(&owner, "docs", "a.txt", b"hi", 100).await?;
//! assert_eq!(bob.get_bytes(&owner, "docs", "a.txt").await?, b"hi");
//! ```

mod network;
mod node;

pub use network::{MemoryNetwork, MemoryTransport};
pub use node::TestNode;
