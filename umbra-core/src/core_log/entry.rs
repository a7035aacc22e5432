/*
    entry.rs - Log entries, content hashes and the export format

    Each entry is content-addressed with blake3 over its author, Lamport
    clock, causal parents and payload. The `next` pointers of all entries
    form the causal DAG whose frontier is the log's set of heads.
*/

use super::errors::{LogError, LogResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// blake3 hash identifying a log entry
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EntryHash([u8; 32]);

impl EntryHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        EntryHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> LogResult<Self> {
        let bytes = hex::decode(s).map_err(|e| LogError::Decode(format!("entry hash: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LogError::Decode("entry hash must be 32 bytes".to_string()))?;
        Ok(EntryHash(bytes))
    }
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryHash({}..)", &self.to_hex()[..12])
    }
}

impl From<EntryHash> for String {
    fn from(hash: EntryHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for EntryHash {
    type Error = LogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EntryHash::from_hex(&value)
    }
}

/// Shape of a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    /// Plain append-only event log
    EventLog,
    /// Log of key-value operations, read through a `KeyValueView`
    KeyValue,
}

/// A single immutable entry in a replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub hash: EntryHash,

    /// Name of the log this entry belongs to
    pub log_id: String,

    /// Peer that appended the entry
    pub author: String,

    /// Lamport clock: one more than the highest clock among `next`
    pub clock: u64,

    /// Causal parents (the heads at append time)
    pub next: Vec<EntryHash>,

    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(
        log_id: impl Into<String>,
        author: impl Into<String>,
        clock: u64,
        next: Vec<EntryHash>,
        payload: Vec<u8>,
    ) -> Self {
        let log_id = log_id.into();
        let author = author.into();
        let hash = Self::compute_hash(&log_id, &author, clock, &next, &payload);
        LogEntry { hash, log_id, author, clock, next, payload }
    }

    fn compute_hash(
        log_id: &str,
        author: &str,
        clock: u64,
        next: &[EntryHash],
        payload: &[u8],
    ) -> EntryHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(log_id.len() as u64).to_le_bytes());
        hasher.update(log_id.as_bytes());
        hasher.update(&(author.len() as u64).to_le_bytes());
        hasher.update(author.as_bytes());
        hasher.update(&clock.to_le_bytes());
        hasher.update(&(next.len() as u64).to_le_bytes());
        for parent in next {
            hasher.update(parent.as_bytes());
        }
        hasher.update(&(payload.len() as u64).to_le_bytes());
        hasher.update(payload);
        EntryHash(*hasher.finalize().as_bytes())
    }

    /// Check that `hash` matches the entry contents
    pub fn verify_hash(&self) -> bool {
        Self::compute_hash(&self.log_id, &self.author, self.clock, &self.next, &self.payload)
            == self.hash
    }

    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Total order shared by every replica: Lamport clock, then hash
    pub fn sort_key(&self) -> (u64, EntryHash) {
        (self.clock, self.hash)
    }
}

/// Frontier of the causal DAG: entries no other entry points at
pub fn compute_heads<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Vec<EntryHash> {
    let mut all = BTreeSet::new();
    let mut referenced = HashSet::new();
    for entry in entries {
        all.insert(entry.hash);
        referenced.extend(entry.next.iter().copied());
    }
    all.into_iter().filter(|h| !referenced.contains(h)).collect()
}

/// Point-in-time export of a whole log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogExport {
    pub log_id: String,
    pub log_type: LogType,
    pub heads: Vec<EntryHash>,
    /// Entries in the log's total order
    pub entries: Vec<LogEntry>,
}

impl LogExport {
    pub fn to_bytes(&self) -> LogResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LogError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> LogResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Per-log persistent cache slots written by the snapshot path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    /// A bincode `LogExport` to import on the next load
    Snapshot,
    /// A bincode `Vec<EntryHash>` of entries still to fetch
    Unfinished,
}

impl CacheSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSlot::Snapshot => "_localHeads",
            CacheSlot::Unfinished => "unfinished",
        }
    }
}
