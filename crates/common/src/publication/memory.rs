use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::provider::{PutOutcome, RecordProvider};
use super::record::{RecordKey, SignedRecord};

/// In-memory record provider
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordProvider {
    inner: Arc<RwLock<HashMap<RecordKey, SignedRecord>>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryRecordProviderError {
    #[error("memory provider error: {0}")]
    Internal(String),
}

impl MemoryRecordProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> MemoryRecordProviderError {
    MemoryRecordProviderError::Internal(format!("failed to acquire lock: {}", e))
}

#[async_trait]
impl RecordProvider for MemoryRecordProvider {
    type Error = MemoryRecordProviderError;

    async fn get(&self, key: &RecordKey) -> Result<Option<SignedRecord>, Self::Error> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.get(key).cloned())
    }

    async fn put(&self, record: SignedRecord) -> Result<PutOutcome, Self::Error> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let key = record.key();
        let outcome = PutOutcome::decide(&record, inner.get(&key));
        if outcome.is_stored() {
            inner.insert(key, record);
        }
        Ok(outcome)
    }

    async fn list(&self) -> Result<Vec<SignedRecord>, Self::Error> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::content::Manifest;
    use crate::crypto::SecretKey;
    use crate::publication::PublicationRecord;

    fn signed(owner: &SecretKey, name: &str, secs: i64) -> SignedRecord {
        PublicationRecord {
            owner: owner.public(),
            bucket: "b".into(),
            filename: name.into(),
            manifest: Manifest::new(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
        .sign(owner)
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_missing() {
        let provider = MemoryRecordProvider::new();
        let key = RecordKey::new(SecretKey::generate().unwrap().public(), "b", "f");
        assert_eq!(provider.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let owner = SecretKey::generate().unwrap();
        let provider = MemoryRecordProvider::new();

        let r1 = signed(&owner, "f", 100);
        let r2 = signed(&owner, "f", 200);
        let r0 = signed(&owner, "f", 50);

        assert_eq!(provider.put(r1.clone()).await.unwrap(), PutOutcome::Stored);
        assert_eq!(provider.put(r2.clone()).await.unwrap(), PutOutcome::Stored);
        assert_eq!(
            provider.put(r0).await.unwrap(),
            PutOutcome::Superseded {
                current: r2.timestamp()
            }
        );
        assert_eq!(provider.put(r2.clone()).await.unwrap(), PutOutcome::Unchanged);
        assert_eq!(provider.get(&r1.key()).await.unwrap(), Some(r2));
    }

    #[tokio::test]
    async fn test_equal_timestamp_keeps_first() {
        let owner = SecretKey::generate().unwrap();
        let provider = MemoryRecordProvider::new();

        let first = signed(&owner, "f", 100);
        let mut rival = first.clone().into_record();
        rival.manifest.push(crate::content::BlockRef {
            id: crate::content::ChunkId::from_bytes([1; 32]),
            size: 1,
            digest: [0; 32],
        });
        let rival = rival.sign(&owner).unwrap();

        provider.put(first.clone()).await.unwrap();
        assert!(!provider.put(rival).await.unwrap().is_stored());
        assert_eq!(provider.get(&first.key()).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_list() {
        let owner = SecretKey::generate().unwrap();
        let provider = MemoryRecordProvider::new();
        provider.put(signed(&owner, "a", 1)).await.unwrap();
        provider.put(signed(&owner, "b", 1)).await.unwrap();
        provider.put(signed(&owner, "a", 2)).await.unwrap();
        assert_eq!(provider.list().await.unwrap().len(), 2);
    }
}
