use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::provider::{PutOutcome, RecordProvider};
use super::record::{RecordKey, SignedRecord};
use crate::disk;

const RECORD_EXTENSION: &str = "rec";

/// Record provider persisting one bincode file per record
///
/// Layout: `{root}/{owner hex}/{blake3(bucket/filename) hex}.rec`.
#[derive(Debug, Clone)]
pub struct FsRecordProvider {
    root: PathBuf,
    // serializes read-compare-write cycles of `put`
    write_lock: Arc<Mutex<()>>,
}

#[derive(Debug, thiserror::Error)]
pub enum FsRecordProviderError {
    #[error("record store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl FsRecordProvider {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsRecordProviderError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &RecordKey) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.bucket.as_bytes());
        hasher.update(b"/");
        hasher.update(key.filename.as_bytes());
        let name = format!("{}.{}", hasher.finalize().to_hex(), RECORD_EXTENSION);
        self.root.join(key.owner.to_hex()).join(name)
    }

    async fn read_record(path: &Path) -> Result<Option<SignedRecord>, FsRecordProviderError> {
        let Some(bytes) = disk::read_optional(path).await? else {
            return Ok(None);
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| FsRecordProviderError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl RecordProvider for FsRecordProvider {
    type Error = FsRecordProviderError;

    async fn get(&self, key: &RecordKey) -> Result<Option<SignedRecord>, Self::Error> {
        let record = Self::read_record(&self.record_path(key)).await?;
        // a hash collision on the file name must not return someone else's record
        Ok(record.filter(|r| r.key() == *key))
    }

    async fn put(&self, record: SignedRecord) -> Result<PutOutcome, Self::Error> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(&record.key());

        let current = match Self::read_record(&path).await {
            Ok(current) => current,
            Err(FsRecordProviderError::Corrupt { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "overwriting corrupt record file");
                None
            }
            Err(e) => return Err(e),
        };

        let outcome = PutOutcome::decide(&record, current.as_ref());
        if outcome.is_stored() {
            let bytes = bincode::serialize(&record).map_err(|e| FsRecordProviderError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            disk::write_atomic(&path, bytes).await?;
        }
        Ok(outcome)
    }

    async fn list(&self) -> Result<Vec<SignedRecord>, Self::Error> {
        let mut records = Vec::new();
        let mut owners = tokio::fs::read_dir(&self.root).await?;
        while let Some(owner_dir) = owners.next_entry().await? {
            if !owner_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(owner_dir.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                match Self::read_record(&path).await {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable record"),
                }
            }
        }
        Ok(records)
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
            bucket: "bucket".into(),
            filename: name.into(),
            manifest: Manifest::new(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
        .sign(owner)
        .unwrap()
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let owner = SecretKey::generate().unwrap();
        let record = signed(&owner, "dir/file.txt", 10);

        let provider = FsRecordProvider::new(dir.path()).unwrap();
        assert_eq!(provider.put(record.clone()).await.unwrap(), PutOutcome::Stored);

        let reopened = FsRecordProvider::new(dir.path()).unwrap();
        assert_eq!(reopened.get(&record.key()).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let owner = SecretKey::generate().unwrap();
        let provider = FsRecordProvider::new(dir.path()).unwrap();

        let newer = signed(&owner, "f", 200);
        provider.put(newer.clone()).await.unwrap();
        let outcome = provider.put(signed(&owner, "f", 100)).await.unwrap();
        assert!(matches!(outcome, PutOutcome::Superseded { .. }));
        assert_eq!(provider.get(&newer.key()).await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_list_and_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let owner = SecretKey::generate().unwrap();
        let provider = FsRecordProvider::new(dir.path()).unwrap();

        let a = signed(&owner, "a", 1);
        provider.put(a.clone()).await.unwrap();
        provider.put(signed(&owner, "b", 1)).await.unwrap();
        assert_eq!(provider.list().await.unwrap().len(), 2);

        std::fs::write(provider.record_path(&a.key()), b"garbage").unwrap();
        assert!(provider.get(&a.key()).await.is_err());
        assert_eq!(provider.list().await.unwrap().len(), 1);

        // a fresh write replaces the corrupt file
        provider.put(a.clone()).await.unwrap();
        assert_eq!(provider.get(&a.key()).await.unwrap(), Some(a));
    }
}
