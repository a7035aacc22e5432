//! Snapshot pointers published on a store's control log

use crate::core_log::{BlobHash, EntryHash, LogEntry};
use serde::{Deserialize, Serialize};

/// Announcement that a snapshot of `target_store` is available as a blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPointer {
    pub target_store: String,
    pub blob_hash: BlobHash,
    pub size: u64,
    pub mode: u32,
    /// Entries the producer knew of but had not fetched when serializing
    #[serde(default)]
    pub unfinished: Vec<EntryHash>,
    #[serde(default)]
    pub producer: String,
    /// Position in control-log order, 1-based; assigned on read
    #[serde(skip)]
    pub sequence: u64,
}

impl SnapshotPointer {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Pointers for `target` found in control-log entries, in log order
pub fn pointers_for(entries: &[LogEntry], target: &str) -> Vec<SnapshotPointer> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let mut pointer: SnapshotPointer = entry.decode().ok()?;
            pointer.sequence = index as u64 + 1;
            (pointer.target_store == target).then_some(pointer)
        })
        .collect()
}

/// Highest-sequence pointer for `target`
pub fn latest_pointer(entries: &[LogEntry], target: &str) -> Option<SnapshotPointer> {
    pointers_for(entries, target).into_iter().max_by_key(|p| p.sequence)
}
