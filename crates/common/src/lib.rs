/**
 * `crabfs://bucket/filename` addresses and
 *  the validation rules for their parts.
 */
pub mod address;
/**
 * Content addressing.
 *  - Fixed-size chunking with keyed chunk ids
 *  - Manifests of encrypted blocks
 *  - Ordered, windowed reassembly
 */
pub mod content;
/**
 * Cancellation and deadlines threaded
 *  through every network operation.
 */
pub mod context;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Key-to-key key sharing
 *  - Chunk envelopes sealed for an owner
 */
pub mod crypto;
pub mod disk;
/**
 * Networking layer.
 *  Peer directory, chunk transfer and the
 *  request/reply protocol spoken over iroh.
 */
pub mod peer;
/**
 * Signed publication records mapping
 *  (owner, bucket, filename) to a manifest,
 *  and the index replicating them.
 */
pub mod publication;
/**
 * The store facade tying it all together:
 *  open, put, get, seed, collect garbage.
 */
pub mod store;
/**
 * In-process network and nodes for
 *  multi-peer tests.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::address::{Address, Location};
    pub use crate::context::{CancelHandle, Cancelled, Context};
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::peer::{BootstrapPolicy, PeerAddr};
    pub use crate::publication::{PutOutcome, RecordKey, SignedRecord};
    pub use crate::store::{BlobReader, SeedHandle, Store, StoreError, StoreOptions};
}
