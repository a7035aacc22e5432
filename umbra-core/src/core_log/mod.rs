/*
    core_log - Contract of the replicated log primitive

    The orchestration layer never resolves conflicts or talks to peers
    itself. It consumes:
    - ReplicatedLog: append-only log with causal merge and typed events
    - LogFactory: opens logs by deterministic name
    - BlobStore: content-addressed blobs for snapshot transfer

    `memory` provides an in-process multi-peer implementation used by the
    test suite and by local-only nodes.
*/

pub mod blob;
pub mod entry;
pub mod errors;
pub mod events;
pub mod kv;
pub mod memory;

pub use blob::{BlobHash, BlobInfo, BlobStore, DEFAULT_BLOB_MODE};
pub use entry::{compute_heads, CacheSlot, EntryHash, LogEntry, LogExport, LogType};
pub use errors::{LogError, LogResult};
pub use events::{LogEvent, LogEvents};
pub use kv::{KeyValueView, KvOp};
pub use memory::{MemoryBlobStore, MemoryLog, MemoryNetwork, MemoryPeer};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Append-only log replicated across peers
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Deterministic store name, e.g. `channels.general`
    fn name(&self) -> &str;

    fn log_type(&self) -> LogType;

    /// Local bulk load followed by catch-up with reachable peers.
    ///
    /// Imports whatever the `Snapshot` and `Unfinished` cache slots hold
    /// before fetching the remaining missing entries one at a time.
    /// Emits `Replicated` if anything new arrived and always ends with `Ready`.
    async fn load(&self) -> LogResult<()>;

    async fn append(&self, payload: Vec<u8>) -> LogResult<LogEntry>;

    /// All entries in the log's total order
    async fn entries(&self) -> LogResult<Vec<LogEntry>>;

    async fn heads(&self) -> LogResult<Vec<EntryHash>>;

    /// Entries known to exist but not yet fetched
    async fn unfinished(&self) -> LogResult<Vec<EntryHash>>;

    async fn export(&self) -> LogResult<LogExport>;

    async fn set_cache(&self, slot: CacheSlot, bytes: Vec<u8>) -> LogResult<()>;

    async fn get_cache(&self, slot: CacheSlot) -> LogResult<Option<Vec<u8>>>;

    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    async fn close(&self) -> LogResult<()>;
}

/// Opens logs by name
#[async_trait]
pub trait LogFactory: Send + Sync {
    async fn open(&self, name: &str, log_type: LogType) -> LogResult<Arc<dyn ReplicatedLog>>;
}
