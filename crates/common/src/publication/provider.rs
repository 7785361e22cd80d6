use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::record::{RecordKey, SignedRecord};

/// Result of storing a record under last-write-wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record is now the current one for its key
    Stored,
    /// The exact same record was already current
    Unchanged,
    /// A record with an equal or later timestamp is current; nothing changed
    Superseded { current: DateTime<Utc> },
}

impl PutOutcome {
    /// Decide what storing `incoming` over `current` does
    ///
    /// Only a strictly later timestamp replaces the current record. Ties keep
    /// whatever was stored first.
    pub fn decide(incoming: &SignedRecord, current: Option<&SignedRecord>) -> Self {
        match current {
            None => PutOutcome::Stored,
            Some(current) if current == incoming => PutOutcome::Unchanged,
            Some(current) if incoming.supersedes(current) => PutOutcome::Stored,
            Some(current) => PutOutcome::Superseded {
                current: current.timestamp(),
            },
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Stored)
    }
}

/// Storage backend for publication records
///
/// Providers store what they are given; signature checks happen in
/// [`super::PublicationIndex`] before a record reaches them. `put` must apply
/// [`PutOutcome::decide`] atomically with respect to other puts of the same
/// key.
#[async_trait]
pub trait RecordProvider: Send + Sync + Debug + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &RecordKey) -> Result<Option<SignedRecord>, Self::Error>;

    async fn put(&self, record: SignedRecord) -> Result<PutOutcome, Self::Error>;

    /// Every current record, in no particular order
    async fn list(&self) -> Result<Vec<SignedRecord>, Self::Error>;
}
