use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SCHEME: &str = "crabfs://";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed address {input:?}: {reason}")]
pub struct AddressError {
    pub input: String,
    pub reason: &'static str,
}

impl AddressError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

fn bucket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex"))
}

/// Check a bucket name: one or more of `[A-Za-z0-9_]`
pub fn validate_bucket(bucket: &str) -> Result<(), AddressError> {
    if bucket_pattern().is_match(bucket) {
        Ok(())
    } else {
        Err(AddressError::new(bucket, "bucket must match [A-Za-z0-9_]+"))
    }
}

/// Check a filename: non-empty, no NUL bytes
pub fn validate_filename(filename: &str) -> Result<(), AddressError> {
    if filename.is_empty() {
        return Err(AddressError::new(filename, "filename is empty"));
    }
    if filename.contains('\0') {
        return Err(AddressError::new(filename, "filename contains NUL"));
    }
    Ok(())
}

/// A remote location, `crabfs://bucket/filename`
///
/// The filename is everything after the first `/` and may itself contain
/// slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    bucket: String,
    filename: String,
}

impl Address {
    pub fn new(bucket: impl Into<String>, filename: impl Into<String>) -> Result<Self, AddressError> {
        let bucket = bucket.into();
        let filename = filename.into();
        validate_bucket(&bucket)?;
        validate_filename(&filename)?;
        Ok(Self { bucket, filename })
    }

    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let rest = input
            .strip_prefix(SCHEME)
            .ok_or_else(|| AddressError::new(input, "missing crabfs:// scheme"))?;
        let (bucket, filename) = rest
            .split_once('/')
            .ok_or_else(|| AddressError::new(input, "missing /filename"))?;
        if bucket.is_empty() {
            return Err(AddressError::new(input, "missing bucket"));
        }
        validate_bucket(bucket).map_err(|e| AddressError::new(input, e.reason))?;
        validate_filename(filename).map_err(|e| AddressError::new(input, e.reason))?;
        Ok(Self {
            bucket: bucket.to_string(),
            filename: filename.to_string(),
        })
    }

    /// Whether `input` is meant as a remote address
    pub fn is_remote(input: &str) -> bool {
        input.starts_with(SCHEME)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.filename)
    }
}

impl FromStr for Address {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Either end of a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(Address),
}

impl Location {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if Address::is_remote(input) {
            Address::parse(input).map(Location::Remote)
        } else if input.is_empty() {
            Err(AddressError::new(input, "empty path"))
        } else {
            Ok(Location::Local(PathBuf::from(input)))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }
}

impl FromStr for Location {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
