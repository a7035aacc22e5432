//! Content-addressed blob storage contract

use super::errors::{LogError, LogResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default file mode reported for stored blobs
pub const DEFAULT_BLOB_MODE: u32 = 0o644;

/// Hex-encoded blake3 hash of a blob's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobHash(String);

impl BlobHash {
    /// Hash `bytes`
    pub fn of(bytes: &[u8]) -> Self {
        BlobHash(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn parse(s: &str) -> LogResult<Self> {
        let decoded = hex::decode(s).map_err(|e| LogError::Decode(format!("blob hash: {}", e)))?;
        if decoded.len() != 32 {
            return Err(LogError::Decode("blob hash must be 32 bytes".to_string()));
        }
        Ok(BlobHash(s.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `bytes` hash to this value
    pub fn matches(&self, bytes: &[u8]) -> bool {
        *self == BlobHash::of(bytes)
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a `put` returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub hash: BlobHash,
    pub size: u64,
    pub mode: u32,
}

/// Content-addressed blob get/put
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes`, returning their content hash
    async fn put(&self, bytes: Vec<u8>) -> LogResult<BlobInfo>;

    /// Fetch a blob. `Ok(None)` means no reachable peer holds it.
    /// Implementations backed by a real network may never resolve while
    /// disconnected; callers bound this with a timeout.
    async fn get(&self, hash: &BlobHash) -> LogResult<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_hash_of() {
        let hash = BlobHash::of(b"snapshot");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.matches(b"snapshot"));
        assert!(!hash.matches(b"snapshot!"));
    }

    #[test]
    fn test_blob_hash_parse() {
        let hash = BlobHash::of(b"x");
        assert_eq!(BlobHash::parse(&hash.to_string().to_uppercase()).unwrap(), hash);
        assert!(BlobHash::parse("not-hex").is_err());
        assert!(BlobHash::parse("abcd").is_err());
    }
}
