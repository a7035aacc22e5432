/*
    registry.rs - Per-address store lifecycle

    The registry owns the (kind, address) -> Repo map:
    - get_or_create opens the backing log once per address; concurrent
      callers for the same address wait on a per-address slot and get the
      same Repo
    - subscribe attaches the event listener once and flushes what the
      store already holds
    - send subscribes implicitly and appends
    - close_all tears everything down

    A Repo is registered before its first sync. If the snapshot path fails
    the Repo stays registered as Degraded and the next get_or_create or
    subscribe retries the sync.
*/

use super::directory::ChannelDirectory;
use super::errors::{StoreError, StoreResult};
use super::model::{ChannelMessage, ChannelRecord, DirectMessage, DirectMessagePayload};
use super::names::{validate_address, RepoKind};
use super::wiring::{Attachment, StoreListener};
use crate::config::SnapshotConfig;
use crate::core_log::{BlobStore, LogEntry, LogFactory, LogType, ReplicatedLog};
use crate::core_snapshot::{ApplyOutcome, SnapshotCoordinator, SnapshotState};
use crate::metrics::{ENTRIES_APPENDED, REPLICATION_PROGRESS, REPOS_OPENED};
use crate::notify::{Notification, NotificationSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// How far a Repo got in its last sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Registered, sync not finished
    Pending,
    /// Loaded, by snapshot or by replay
    Synced,
    /// Last sync attempt failed; the store may be missing entries
    Degraded,
}

/// One per-address message store
pub struct Repo {
    kind: RepoKind,
    address: String,
    store: String,
    log: Arc<dyn ReplicatedLog>,
    snapshot: Arc<SnapshotCoordinator>,
    attachment: Attachment,
    status: std::sync::Mutex<SyncStatus>,
    sink: Arc<dyn NotificationSink>,
}

impl Repo {
    pub fn kind(&self) -> RepoKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    pub fn log(&self) -> &Arc<dyn ReplicatedLog> {
        &self.log
    }

    pub fn snapshot(&self) -> &Arc<SnapshotCoordinator> {
        &self.snapshot
    }

    pub fn snapshot_state(&self) -> SnapshotState {
        self.snapshot.state()
    }

    /// Whether listeners were ever attached; never resets
    pub fn events_attached(&self) -> bool {
        self.attachment.is_attached()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Channel messages in log order, skipping entries that do not decode
    pub async fn channel_messages(&self) -> StoreResult<Vec<ChannelMessage>> {
        let entries = self.log.entries().await.map_err(StoreError::log(&self.store))?;
        Ok(decode_channel_messages(&self.store, &entries))
    }

    /// Direct messages in log order
    pub async fn direct_messages(&self) -> StoreResult<Vec<DirectMessage>> {
        let entries = self.log.entries().await.map_err(StoreError::log(&self.store))?;
        Ok(decode_direct_messages(&self.store, &entries))
    }

    /// Push everything the store holds
    pub async fn flush(&self) -> StoreResult<()> {
        let notification = match self.kind {
            RepoKind::Channel => Notification::MessageList {
                address: self.address.clone(),
                messages: self.channel_messages().await?,
            },
            RepoKind::Conversation => Notification::DirectMessageList {
                address: self.address.clone(),
                messages: self.direct_messages().await?,
            },
        };
        self.sink.emit(notification);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.attachment.shutdown();
        self.snapshot.close().await?;
        self.log.close().await.map_err(StoreError::log(&self.store))
    }
}

fn decode_channel_messages(store: &str, entries: &[LogEntry]) -> Vec<ChannelMessage> {
    entries
        .iter()
        .filter_map(|entry| match entry.decode::<ChannelMessage>() {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(store = %store, hash = %entry.hash, "Skipping undecodable message: {}", e);
                None
            }
        })
        .collect()
}

fn decode_direct_message(entry: &LogEntry) -> Option<DirectMessage> {
    let payload: DirectMessagePayload = entry.decode().ok()?;
    Some(DirectMessage { id: entry.hash.to_hex(), payload: payload.payload })
}

fn decode_direct_messages(store: &str, entries: &[LogEntry]) -> Vec<DirectMessage> {
    let messages: Vec<_> = entries.iter().filter_map(decode_direct_message).collect();
    if messages.len() < entries.len() {
        debug!(store = %store, skipped = entries.len() - messages.len(), "Skipped undecodable direct messages");
    }
    messages
}

/// Listener forwarding a message log's events to the sink
struct MessageForwarder {
    kind: RepoKind,
    address: String,
    store: String,
    log: Arc<dyn ReplicatedLog>,
    sink: Arc<dyn NotificationSink>,
}

#[async_trait]
impl StoreListener for MessageForwarder {
    fn store(&self) -> &str {
        &self.store
    }

    async fn on_write(&self, entry: LogEntry) {
        let notification = match self.kind {
            RepoKind::Channel => match entry.decode::<ChannelMessage>() {
                Ok(message) => Notification::MessageWritten { address: self.address.clone(), message },
                Err(e) => {
                    warn!(store = %self.store, hash = %entry.hash, "Written entry is not a message: {}", e);
                    return;
                }
            },
            RepoKind::Conversation => match decode_direct_message(&entry) {
                Some(message) => {
                    Notification::DirectMessageWritten { address: self.address.clone(), message }
                }
                None => return,
            },
        };
        self.sink.emit(notification);
    }

    async fn on_replicate_progress(&self, entry: LogEntry, have: usize, max: usize) {
        trace!(store = %self.store, hash = %entry.hash, have, max, "Replication progress");
        ::metrics::gauge!(REPLICATION_PROGRESS).set(have as f64);
    }

    async fn on_replicated(&self) {
        let entries = match self.log.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(store = %self.store, "Failed to read entries: {}", e);
                return;
            }
        };
        let notification = match self.kind {
            RepoKind::Channel => Notification::IdList {
                address: self.address.clone(),
                ids: decode_channel_messages(&self.store, &entries)
                    .into_iter()
                    .map(|m| m.id)
                    .collect(),
            },
            RepoKind::Conversation => Notification::DirectMessageList {
                address: self.address.clone(),
                messages: decode_direct_messages(&self.store, &entries),
            },
        };
        self.sink.emit(notification);
    }
}

/// Tie channel metadata to `address`: an empty record address is filled
/// in, a different one is rejected.
pub fn bind_metadata(address: &str, mut record: ChannelRecord) -> StoreResult<ChannelRecord> {
    if record.address.is_empty() {
        record.address = address.to_string();
    } else if record.address != address {
        return Err(StoreError::Validation(format!(
            "metadata is for {}, not {}",
            record.address, address
        )));
    }
    Ok(record)
}

type Slot = Arc<Mutex<Option<Arc<Repo>>>>;

/// Owner of every per-address message store
pub struct StoreRegistry {
    peer_id: String,
    logs: Arc<dyn LogFactory>,
    blobs: Arc<dyn BlobStore>,
    sink: Arc<dyn NotificationSink>,
    channels: Arc<ChannelDirectory>,
    snapshot: SnapshotConfig,
    slots: Mutex<HashMap<(RepoKind, String), Slot>>,
    closed: AtomicBool,
}

impl StoreRegistry {
    pub fn new(
        peer_id: impl Into<String>,
        logs: Arc<dyn LogFactory>,
        blobs: Arc<dyn BlobStore>,
        sink: Arc<dyn NotificationSink>,
        channels: Arc<ChannelDirectory>,
        snapshot: SnapshotConfig,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            logs,
            blobs,
            sink,
            channels,
            snapshot,
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn slot(&self, kind: RepoKind, address: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry((kind, address.to_string()))
            .or_default()
            .clone()
    }

    async fn holds_slot(&self, kind: RepoKind, address: &str, slot: &Slot) -> bool {
        self.slots
            .lock()
            .await
            .get(&(kind, address.to_string()))
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// The Repo for `address`, opening and syncing it on first use.
    ///
    /// For channels, `metadata` is written to the channel directory
    /// unless the address is already listed there. Metadata for another
    /// address is rejected before anything is opened.
    pub async fn get_or_create(
        &self,
        kind: RepoKind,
        address: &str,
        metadata: Option<ChannelRecord>,
    ) -> StoreResult<Arc<Repo>> {
        validate_address(address)?;
        let metadata = metadata.map(|record| bind_metadata(address, record)).transpose()?;
        self.ensure_open()?;

        let repo = loop {
            let slot = self.slot(kind, address).await;
            let mut guard = slot.lock().await;
            if let Some(repo) = guard.as_ref() {
                break repo.clone();
            }
            // an earlier open failed and dropped this slot
            if !self.holds_slot(kind, address, &slot).await {
                continue;
            }
            match self.open_repo(kind, address).await {
                Ok(repo) => {
                    *guard = Some(repo.clone());
                    break repo;
                }
                Err(e) => {
                    self.slots.lock().await.remove(&(kind, address.to_string()));
                    return Err(e);
                }
            }
        };

        if kind == RepoKind::Channel {
            if let Some(record) = metadata {
                self.channels.put_if_absent(record).await?;
            }
        }

        if repo.status() != SyncStatus::Synced {
            self.sync(&repo).await?;
        }
        Ok(repo)
    }

    async fn open_repo(&self, kind: RepoKind, address: &str) -> StoreResult<Arc<Repo>> {
        let store = kind.store_name(address);
        let log = self
            .logs
            .open(&store, LogType::EventLog)
            .await
            .map_err(StoreError::log(&store))?;
        let snapshot = SnapshotCoordinator::open(
            self.logs.as_ref(),
            self.blobs.clone(),
            log.clone(),
            self.peer_id.clone(),
            self.snapshot.clone(),
        )
        .await?;

        ::metrics::counter!(REPOS_OPENED).increment(1);
        info!(store = %store, kind = %kind, "Store opened");
        Ok(Arc::new(Repo {
            kind,
            address: address.to_string(),
            store,
            log,
            snapshot,
            attachment: Attachment::new(),
            status: std::sync::Mutex::new(SyncStatus::Pending),
            sink: self.sink.clone(),
        }))
    }

    /// Snapshot path first, ordinary load otherwise
    async fn sync(&self, repo: &Repo) -> StoreResult<()> {
        repo.set_status(SyncStatus::Pending);
        let outcome = match repo.snapshot.bootstrap().await {
            Ok(outcome) => outcome,
            Err(e) => {
                repo.set_status(SyncStatus::Degraded);
                return Err(e.into());
            }
        };
        if !outcome.target_loaded() {
            if let Err(e) = repo.log.load().await {
                repo.set_status(SyncStatus::Degraded);
                return Err(StoreError::log(&repo.store)(e));
            }
        }
        repo.set_status(SyncStatus::Synced);
        debug!(store = %repo.store, outcome = ?outcome, "Store synced");

        if outcome == ApplyOutcome::Producer {
            if let Err(e) = repo.snapshot.produce().await {
                warn!(store = %repo.store, "Automatic snapshot failed: {}", e);
            }
        }
        Ok(())
    }

    /// Attach listeners once and flush the store's current entries
    pub async fn subscribe(&self, kind: RepoKind, address: &str) -> StoreResult<Arc<Repo>> {
        let repo = self.get_or_create(kind, address, None).await?;
        let forwarder = Arc::new(MessageForwarder {
            kind,
            address: address.to_string(),
            store: repo.store.clone(),
            log: repo.log.clone(),
            sink: self.sink.clone(),
        });
        if repo.attachment.attach(forwarder, repo.log.subscribe()) {
            debug!(store = %repo.store, "Listeners attached");
        } else {
            repo.attachment.resume();
        }
        repo.flush().await?;
        Ok(repo)
    }

    /// Stop forwarding a store's events. Returns false if it was never
    /// subscribed or is already paused.
    pub async fn unsubscribe(&self, kind: RepoKind, address: &str) -> bool {
        match self.lookup(kind, address).await {
            Some(repo) => {
                let paused = repo.attachment.pause();
                if paused {
                    debug!(store = %repo.store, "Unsubscribed");
                }
                paused
            }
            None => false,
        }
    }

    /// Subscribe, then append `payload`
    pub async fn send(&self, kind: RepoKind, address: &str, payload: Vec<u8>) -> StoreResult<LogEntry> {
        let repo = self.subscribe(kind, address).await?;
        let entry = repo.log.append(payload).await.map_err(StoreError::log(&repo.store))?;
        ::metrics::counter!(ENTRIES_APPENDED).increment(1);
        debug!(store = %repo.store, hash = %entry.hash, "Entry appended");
        Ok(entry)
    }

    /// The Repo for `address` if one was created
    pub async fn lookup(&self, kind: RepoKind, address: &str) -> Option<Arc<Repo>> {
        let slot = self.slots.lock().await.get(&(kind, address.to_string())).cloned()?;
        let guard = slot.lock().await;
        guard.clone()
    }

    pub async fn repos(&self) -> Vec<Arc<Repo>> {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut repos = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(repo) = slot.lock().await.clone() {
                repos.push(repo);
            }
        }
        repos
    }

    /// Close every store. The registry refuses new work afterwards.
    pub async fn close_all(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let slots: Vec<Slot> = self.slots.lock().await.drain().map(|(_, slot)| slot).collect();
        let mut first_error = None;
        for slot in slots {
            if let Some(repo) = slot.lock().await.take() {
                if let Err(e) = repo.close().await {
                    warn!(store = %repo.store, "Failed to close store: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        info!("Store registry closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_log::{LogError, LogResult, MemoryNetwork, MemoryPeer};
    use crate::notify::MemorySink;
    use crate::test_utils::message;
    use std::time::Duration;

    async fn registry(network: &MemoryNetwork, peer: &str, sink: Arc<MemorySink>) -> StoreRegistry {
        let peer = network.peer(peer);
        let channels = Arc::new(ChannelDirectory::open(&peer, sink.clone()).await.unwrap());
        StoreRegistry::new(
            peer.id(),
            Arc::new(peer.clone()),
            peer.blobs(),
            sink,
            channels,
            SnapshotConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_repo() {
        let network = MemoryNetwork::new();
        let registry = registry(&network, "a", Arc::new(MemorySink::new())).await;

        let first = registry.get_or_create(RepoKind::Channel, "general", None).await.unwrap();
        let second = registry.get_or_create(RepoKind::Channel, "general", None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.status(), SyncStatus::Synced);
        assert_eq!(first.store_name(), "channels.general");

        let other = registry.get_or_create(RepoKind::Conversation, "general", None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.repos().await.len(), 2);
    }

    /// Log factory whose opens fail while `failing` is set
    struct FlakyLogs {
        inner: MemoryPeer,
        failing: AtomicBool,
    }

    #[async_trait]
    impl LogFactory for FlakyLogs {
        async fn open(&self, name: &str, log_type: LogType) -> LogResult<Arc<dyn ReplicatedLog>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LogError::Open { name: name.to_string(), reason: "disk full".to_string() });
            }
            self.inner.open(name, log_type).await
        }
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_slot() {
        let network = MemoryNetwork::new();
        let peer = network.peer("a");
        let sink = Arc::new(MemorySink::new());
        let channels = Arc::new(ChannelDirectory::open(&peer, sink.clone()).await.unwrap());
        let logs = Arc::new(FlakyLogs { inner: peer.clone(), failing: AtomicBool::new(true) });
        let registry = StoreRegistry::new(
            peer.id(),
            logs.clone(),
            peer.blobs(),
            sink,
            channels,
            SnapshotConfig::default(),
        );

        for address in ["a", "b", "c"] {
            assert!(registry.get_or_create(RepoKind::Channel, address, None).await.is_err());
        }
        assert!(registry.slots.lock().await.is_empty());

        logs.failing.store(false, Ordering::SeqCst);
        let repo = registry.get_or_create(RepoKind::Channel, "a", None).await.unwrap();
        assert_eq!(repo.status(), SyncStatus::Synced);
        assert_eq!(registry.slots.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let network = MemoryNetwork::new();
        let registry = registry(&network, "a", Arc::new(MemorySink::new())).await;
        let err = registry.get_or_create(RepoKind::Channel, "", None).await.err().unwrap();
        assert!(err.is_validation());
        assert!(registry.repos().await.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_must_match_address() {
        let network = MemoryNetwork::new();
        let registry = registry(&network, "a", Arc::new(MemorySink::new())).await;

        let err = registry
            .get_or_create(RepoKind::Channel, "general", Some(ChannelRecord::new("random", "random")))
            .await
            .err()
            .unwrap();
        assert!(err.is_validation());
        assert!(registry.repos().await.is_empty());
        assert!(!registry.channels.contains("random").await.unwrap());

        registry
            .get_or_create(RepoKind::Channel, "general", Some(ChannelRecord::new("", "General")))
            .await
            .unwrap();
        assert!(registry.channels.contains("general").await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_attaches_once_and_flushes() {
        let network = MemoryNetwork::new();
        let sink = Arc::new(MemorySink::new());
        let registry = registry(&network, "a", sink.clone()).await;

        let repo = registry.subscribe(RepoKind::Channel, "general").await.unwrap();
        assert!(repo.events_attached());
        registry.subscribe(RepoKind::Channel, "general").await.unwrap();
        assert_eq!(sink.count_named("messageList"), 2);

        let payload = serde_json::to_vec(&message("m1", "general")).unwrap();
        registry.send(RepoKind::Channel, "general", payload).await.unwrap();
        sink.wait_for(Duration::from_secs(2), |n| n.name() == "messageWritten")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.count_named("messageWritten"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let network = MemoryNetwork::new();
        let sink = Arc::new(MemorySink::new());
        let registry = registry(&network, "a", sink.clone()).await;

        assert!(!registry.unsubscribe(RepoKind::Conversation, "never").await);
        registry.subscribe(RepoKind::Conversation, "thread").await.unwrap();
        assert!(registry.unsubscribe(RepoKind::Conversation, "thread").await);

        let repo = registry.lookup(RepoKind::Conversation, "thread").await.unwrap();
        repo.log().append(br#"{"payload":"quiet"}"#.to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.count_named("directMessageWritten"), 0);
        assert!(repo.events_attached());
    }

    #[tokio::test]
    async fn test_close_all() {
        let network = MemoryNetwork::new();
        let registry = registry(&network, "a", Arc::new(MemorySink::new())).await;
        let repo = registry.subscribe(RepoKind::Channel, "general").await.unwrap();

        registry.close_all().await.unwrap();
        assert!(repo.log().entries().await.is_err());
        assert!(matches!(
            registry.get_or_create(RepoKind::Channel, "general", None).await,
            Err(StoreError::Closed)
        ));
    }
}
