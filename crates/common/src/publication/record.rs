use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::Manifest;
use crate::crypto::{PublicKey, SecretKey, Signature};

/// Identifies one published file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub owner: PublicKey,
    pub bucket: String,
    pub filename: String,
}

impl RecordKey {
    pub fn new(owner: PublicKey, bucket: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            owner,
            bucket: bucket.into(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.owner.short(), self.bucket, self.filename)
    }
}

/// The current manifest of a file, as stated by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub owner: PublicKey,
    pub bucket: String,
    pub filename: String,
    pub manifest: Manifest,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record for {key} is not signed by its owner: {reason}")]
    TrustViolation { key: RecordKey, reason: String },
    #[error("signing key does not belong to record owner {0}")]
    WrongSigner(PublicKey),
    #[error("failed to encode record: {0}")]
    Encoding(String),
}

impl PublicationRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.owner, self.bucket.clone(), self.filename.clone())
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, RecordError> {
        bincode::serialize(self).map_err(|e| RecordError::Encoding(e.to_string()))
    }

    /// Sign with the owner's key
    pub fn sign(self, owner: &SecretKey) -> Result<SignedRecord, RecordError> {
        if owner.public() != self.owner {
            return Err(RecordError::WrongSigner(self.owner));
        }
        let signature = owner.sign(&self.signing_bytes()?);
        Ok(SignedRecord {
            record: self,
            signature,
        })
    }
}

/// A [`PublicationRecord`] plus the owner's signature over its encoding
///
/// Replays of an authentic record verify fine; staleness is settled by
/// timestamp comparison, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    record: PublicationRecord,
    signature: Signature,
}

impl SignedRecord {
    /// Reassemble from parts without checking anything; see [`SignedRecord::verify`]
    pub fn from_parts(record: PublicationRecord, signature: Signature) -> Self {
        Self { record, signature }
    }

    pub fn record(&self) -> &PublicationRecord {
        &self.record
    }

    pub fn into_record(self) -> PublicationRecord {
        self.record
    }

    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.record.timestamp
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Check that the record is the one asked for and its owner signed it
    pub fn verify_for(&self, expected: &RecordKey) -> Result<&PublicationRecord, RecordError> {
        if self.key() != *expected {
            return Err(RecordError::TrustViolation {
                key: expected.clone(),
                reason: format!("peer answered with record for {}", self.key()),
            });
        }
        self.verify()
    }

    /// Check the signature against the owner named inside the record
    pub fn verify(&self) -> Result<&PublicationRecord, RecordError> {
        let bytes = self.record.signing_bytes()?;
        self.record
            .owner
            .verify(&bytes, &self.signature)
            .map_err(|e| RecordError::TrustViolation {
                key: self.key(),
                reason: e.to_string(),
            })?;
        Ok(&self.record)
    }

    /// Whether this record should replace `current` under last-write-wins
    pub fn supersedes(&self, current: &SignedRecord) -> bool {
        self.timestamp() > current.timestamp()
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::content::{BlockRef, ChunkId};

    fn record(owner: &SecretKey, secs: i64) -> PublicationRecord {
        let manifest = [BlockRef {
            id: ChunkId::from_bytes([secs as u8; 32]),
            size: 11,
            digest: [0u8; 32],
        }]
        .into_iter()
        .collect();
        PublicationRecord {
            owner: owner.public(),
            bucket: "docs".into(),
            filename: "hello.txt".into(),
            manifest,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_sign_verify() {
        let owner = SecretKey::generate().unwrap();
        let signed = record(&owner, 100).sign(&owner).unwrap();
        assert!(signed.verify().is_ok());
        assert!(signed.verify_for(&signed.key()).is_ok());
    }

    #[test]
    fn test_replay_is_still_valid() {
        let owner = SecretKey::generate().unwrap();
        let signed = record(&owner, 100).sign(&owner).unwrap();
        let bytes = bincode::serialize(&signed).unwrap();
        let replayed: SignedRecord = bincode::deserialize(&bytes).unwrap();
        assert!(replayed.verify().is_ok());
    }

    #[test]
    fn test_forged_signature_rejected() {
        let owner = SecretKey::generate().unwrap();
        let mallory = SecretKey::generate().unwrap();

        // mallory signs a record claiming to be owner's
        let claimed = record(&owner, 200);
        let forged_sig = mallory.sign(&bincode::serialize(&claimed).unwrap());
        let forged = SignedRecord::from_parts(claimed, forged_sig);
        assert!(matches!(
            forged.verify(),
            Err(RecordError::TrustViolation { .. })
        ));
    }

    #[test]
    fn test_tampered_manifest_rejected() {
        let owner = SecretKey::generate().unwrap();
        let signed = record(&owner, 100).sign(&owner).unwrap();
        let mut tampered = signed.clone().into_record();
        tampered.manifest = Manifest::new();
        let tampered = SignedRecord::from_parts(tampered, *signed.signature());
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn test_wrong_key_requested() {
        let owner = SecretKey::generate().unwrap();
        let signed = record(&owner, 100).sign(&owner).unwrap();
        let other = RecordKey::new(owner.public(), "docs", "other.txt");
        assert!(matches!(
            signed.verify_for(&other),
            Err(RecordError::TrustViolation { .. })
        ));
    }

    #[test]
    fn test_only_owner_can_sign() {
        let owner = SecretKey::generate().unwrap();
        let other = SecretKey::generate().unwrap();
        assert!(matches!(
            record(&owner, 1).sign(&other),
            Err(RecordError::WrongSigner(_))
        ));
    }

    #[test]
    fn test_supersedes() {
        let owner = SecretKey::generate().unwrap();
        let older = record(&owner, 100).sign(&owner).unwrap();
        let newer = record(&owner, 200).sign(&owner).unwrap();
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
        assert!(!older.supersedes(&older));
    }
}
