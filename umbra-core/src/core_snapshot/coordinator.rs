/*
    coordinator.rs - Snapshot production and consumption for one store

    Producer path: Idle -> Producing -> Published
      export the target log, store the blob, append a pointer to the
      store's control log.
    Consumer path: Idle -> AwaitingPointer -> Fetching -> Applied
      on control-log replication, fetch the newest pointer's blob, check
      it, write it into the target log's cache slots and run the log's
      own load so progress and ready events fire as in a normal sync.

    A coordinator applies at most one snapshot per instance. Failed
    attempts leave the flag unset so a later attempt can succeed.
*/

use super::codec;
use super::errors::{SyncError, SyncResult};
use super::pointer::{latest_pointer, SnapshotPointer};
use crate::config::SnapshotConfig;
use crate::core_log::{
    BlobStore, CacheSlot, EntryHash, LogEntry, LogExport, LogFactory, LogType, ReplicatedLog,
};
use crate::core_store::names::control_log_name;
use crate::core_store::wiring::{Attachment, StoreListener};
use crate::metrics::{
    Timer, SNAPSHOT_APPLIED, SNAPSHOT_APPLY_DURATION, SNAPSHOT_FAILED, SNAPSHOT_PUBLISHED,
    SNAPSHOT_SIZE,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, error, info, warn};

/// Where a store is in the snapshot state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Idle,
    Producing,
    Published,
    AwaitingPointer,
    Fetching,
    Applied,
    Failed,
}

/// Result of a consume or apply attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Snapshot imported and the target log loaded
    Applied { sequence: u64, entries: usize },
    /// A snapshot was already applied by this instance
    AlreadyApplied,
    /// The control log holds no pointer for this store yet
    NoPointer,
    /// This peer produces snapshots and never consumes them
    Producer,
}

impl ApplyOutcome {
    /// Whether the target log has been loaded as part of this outcome
    pub fn target_loaded(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. } | ApplyOutcome::AlreadyApplied)
    }
}

/// Per-store snapshot coordinator
pub struct SnapshotCoordinator {
    store: String,
    control_name: String,
    peer_id: String,
    target: Arc<dyn ReplicatedLog>,
    control: Arc<dyn ReplicatedLog>,
    blobs: Arc<dyn BlobStore>,
    config: SnapshotConfig,
    state: Mutex<SnapshotState>,
    applied: AtomicBool,
    live: AtomicBool,
    last_published: Mutex<Option<(Vec<EntryHash>, SnapshotPointer)>>,
    op_lock: tokio::sync::Mutex<()>,
    attachment: Attachment,
}

impl SnapshotCoordinator {
    /// Open the control log of `target`; nothing is loaded yet
    pub async fn open(
        logs: &dyn LogFactory,
        blobs: Arc<dyn BlobStore>,
        target: Arc<dyn ReplicatedLog>,
        peer_id: impl Into<String>,
        config: SnapshotConfig,
    ) -> SyncResult<Arc<Self>> {
        let store = target.name().to_string();
        let control_name = control_log_name(&store, &config.control_log_suffix);
        let control = logs
            .open(&control_name, LogType::EventLog)
            .await
            .map_err(SyncError::log(&control_name))?;
        Ok(Arc::new(Self {
            store,
            control_name,
            peer_id: peer_id.into(),
            target,
            control,
            blobs,
            config,
            state: Mutex::new(SnapshotState::Idle),
            applied: AtomicBool::new(false),
            live: AtomicBool::new(false),
            last_published: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
            attachment: Attachment::new(),
        }))
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn control_name(&self) -> &str {
        &self.control_name
    }

    pub fn is_producer(&self) -> bool {
        self.config.create_snapshot
    }

    pub fn state(&self) -> SnapshotState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_applied(&self) -> bool {
        self.applied.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SnapshotState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Load the control log and, on consumers, try the snapshot path.
    ///
    /// Consumers keep watching the control log afterwards: a pointer that
    /// replicates in later is applied as long as none was applied before.
    pub async fn bootstrap(self: &Arc<Self>) -> SyncResult<ApplyOutcome> {
        if !self.is_producer() {
            let listener = Arc::new(ControlListener {
                name: self.control_name.clone(),
                coordinator: Arc::downgrade(self),
            });
            self.attachment.attach(listener, self.control.subscribe());
        }
        self.control.load().await.map_err(SyncError::log(&self.control_name))?;

        let outcome = self.consume().await;
        self.live.store(true, Ordering::SeqCst);
        outcome
    }

    /// Apply the newest pointer on the control log, if any
    pub async fn consume(&self) -> SyncResult<ApplyOutcome> {
        if self.is_producer() {
            return Ok(ApplyOutcome::Producer);
        }
        let _op = self.op_lock.lock().await;
        if self.is_applied() {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        let entries = self
            .control
            .entries()
            .await
            .map_err(SyncError::log(&self.control_name))?;
        match latest_pointer(&entries, &self.store) {
            Some(pointer) => self.apply_locked(&pointer).await,
            None => {
                debug!(store = %self.store, "No snapshot pointer yet");
                self.set_state(SnapshotState::AwaitingPointer);
                Ok(ApplyOutcome::NoPointer)
            }
        }
    }

    /// Apply `pointer` unless a snapshot was already applied
    pub async fn apply(&self, pointer: &SnapshotPointer) -> SyncResult<ApplyOutcome> {
        let _op = self.op_lock.lock().await;
        if self.is_applied() {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        self.apply_locked(pointer).await
    }

    async fn apply_locked(&self, pointer: &SnapshotPointer) -> SyncResult<ApplyOutcome> {
        self.set_state(SnapshotState::Fetching);
        let timer = Timer::new(SNAPSHOT_APPLY_DURATION);
        info!(
            store = %self.store,
            blob = %pointer.blob_hash,
            sequence = pointer.sequence,
            size = pointer.size,
            "Applying snapshot"
        );

        match self.fetch_and_import(pointer).await {
            Ok(entries) => {
                timer.stop();
                self.applied.store(true, Ordering::SeqCst);
                self.set_state(SnapshotState::Applied);
                ::metrics::counter!(SNAPSHOT_APPLIED).increment(1);
                info!(store = %self.store, entries, "Snapshot applied");
                Ok(ApplyOutcome::Applied { sequence: pointer.sequence, entries })
            }
            Err(e) => {
                self.set_state(SnapshotState::Failed);
                ::metrics::counter!(SNAPSHOT_FAILED).increment(1);
                error!(store = %self.store, "Snapshot sync failed: {}", e);
                Err(e)
            }
        }
    }

    async fn fetch_and_import(&self, pointer: &SnapshotPointer) -> SyncResult<usize> {
        let not_found = || SyncError::SnapshotNotFound {
            store: self.store.clone(),
            hash: pointer.blob_hash.to_string(),
        };

        let fetched = tokio::time::timeout(self.config.fetch_timeout, self.blobs.get(&pointer.blob_hash))
            .await
            .map_err(|_| not_found())?
            .map_err(SyncError::log(&self.store))?;
        let bytes = fetched.ok_or_else(not_found)?;

        if bytes.len() as u64 != pointer.size || !pointer.blob_hash.matches(&bytes) {
            return Err(SyncError::CorruptSnapshot {
                store: self.store.clone(),
                reason: format!("blob is {} bytes, pointer says {}", bytes.len(), pointer.size),
            });
        }
        let export = codec::decode(&bytes, &self.store)?;
        let entries = export.entries.len();

        let unfinished = bincode::serialize(&pointer.unfinished).map_err(|e| {
            SyncError::CorruptSnapshot { store: self.store.clone(), reason: e.to_string() }
        })?;
        let snapshot = export.to_bytes().map_err(SyncError::log(&self.store))?;
        self.target
            .set_cache(CacheSlot::Unfinished, unfinished)
            .await
            .map_err(SyncError::log(&self.store))?;
        self.target
            .set_cache(CacheSlot::Snapshot, snapshot)
            .await
            .map_err(SyncError::log(&self.store))?;

        tokio::time::timeout(self.config.load_timeout, self.target.load())
            .await
            .map_err(|_| SyncError::LoadTimeout { store: self.store.clone() })?
            .map_err(SyncError::log(&self.store))?;
        Ok(entries)
    }

    /// Publish a snapshot of the target log. Does nothing on consumers
    /// and on an empty log; an unchanged log returns the last pointer.
    pub async fn produce(&self) -> SyncResult<Option<SnapshotPointer>> {
        if !self.is_producer() {
            debug!(store = %self.store, "Not a snapshot producer");
            return Ok(None);
        }
        let _op = self.op_lock.lock().await;

        let export = self.target.export().await.map_err(SyncError::log(&self.store))?;
        if export.entries.is_empty() {
            return Ok(None);
        }
        if let Some((heads, pointer)) =
            &*self.last_published.lock().unwrap_or_else(PoisonError::into_inner)
        {
            if *heads == export.heads {
                debug!(store = %self.store, "Snapshot unchanged since last publish");
                return Ok(Some(pointer.clone()));
            }
        }

        self.set_state(SnapshotState::Producing);
        match self.publish(&export).await {
            Ok(pointer) => {
                self.set_state(SnapshotState::Published);
                *self.last_published.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((export.heads.clone(), pointer.clone()));
                ::metrics::counter!(SNAPSHOT_PUBLISHED).increment(1);
                ::metrics::histogram!(SNAPSHOT_SIZE).record(pointer.size as f64);
                info!(
                    store = %self.store,
                    blob = %pointer.blob_hash,
                    entries = export.entries.len(),
                    sequence = pointer.sequence,
                    "Snapshot published"
                );
                Ok(Some(pointer))
            }
            Err(e) => {
                self.set_state(SnapshotState::Failed);
                warn!(store = %self.store, "Snapshot publish failed: {}", e);
                Err(e)
            }
        }
    }

    async fn publish(&self, export: &LogExport) -> SyncResult<SnapshotPointer> {
        let unfinished = self.target.unfinished().await.map_err(SyncError::log(&self.store))?;
        let bytes = codec::encode(export)?;
        let info = self.blobs.put(bytes).await.map_err(SyncError::log(&self.store))?;

        let mut pointer = SnapshotPointer {
            target_store: self.store.clone(),
            blob_hash: info.hash,
            size: info.size,
            mode: info.mode,
            unfinished,
            producer: self.peer_id.clone(),
            sequence: 0,
        };
        let payload = pointer.to_payload().map_err(|e| SyncError::CorruptSnapshot {
            store: self.store.clone(),
            reason: e.to_string(),
        })?;
        let entry = self
            .control
            .append(payload)
            .await
            .map_err(SyncError::log(&self.control_name))?;
        let entries = self
            .control
            .entries()
            .await
            .map_err(SyncError::log(&self.control_name))?;
        pointer.sequence = entries
            .iter()
            .position(|e| e.hash == entry.hash)
            .map(|i| i as u64 + 1)
            .unwrap_or(entries.len() as u64);
        Ok(pointer)
    }

    pub async fn close(&self) -> SyncResult<()> {
        self.attachment.shutdown();
        self.control.close().await.map_err(SyncError::log(&self.control_name))
    }
}

/// Control-log listener driving the consumer path
struct ControlListener {
    name: String,
    coordinator: Weak<SnapshotCoordinator>,
}

#[async_trait]
impl StoreListener for ControlListener {
    fn store(&self) -> &str {
        &self.name
    }

    async fn on_write(&self, _entry: LogEntry) {}

    async fn on_replicated(&self) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        if !coordinator.live.load(Ordering::SeqCst) || coordinator.is_applied() {
            return;
        }
        if let Err(e) = coordinator.consume().await {
            debug!(store = %coordinator.store, "Control-log triggered sync failed: {}", e);
        }
    }

    async fn on_ready(&self) {}
}
