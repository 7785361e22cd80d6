//! Signed publication records and the index replicating them
//!
//! A record names the current manifest for one (owner, bucket, filename).
//! Only the owner can sign one; anyone can verify and replicate it.

mod fs;
mod index;
mod memory;
mod provider;
mod record;

pub use fs::{FsRecordProvider, FsRecordProviderError};
pub use index::{IndexError, PublicationIndex};
pub use memory::{MemoryRecordProvider, MemoryRecordProviderError};
pub use provider::{PutOutcome, RecordProvider};
pub use record::{PublicationRecord, RecordError, RecordKey, SignedRecord};
