/*
    directory.rs - Replicated-map directories

    A directory is a key-value log read as a map of records, written
    put-if-absent and pushed to consumers as a full projection:
    - public-channels: ChannelRecord by address
    - msg-threads: ConversationRecord by address
    - dms: DirectMessageUser by public key

    Every push recomputes the projection from the whole map, so a missed
    intermediate event never leaves a consumer with a stale list.
*/

use super::errors::{StoreError, StoreResult};
use super::model::{ChannelRecord, ConversationRecord, DirectMessageUser};
use super::names::{CHANNEL_DIRECTORY, CONVERSATION_DIRECTORY, DM_USER_DIRECTORY};
use super::wiring::{Attachment, StoreListener};
use crate::core_log::{KeyValueView, LogEntry, LogFactory, LogType};
use crate::notify::{Notification, NotificationSink};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A record type stored in a directory
pub trait DirectoryRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Store name of the directory log
    const STORE: &'static str;

    fn key(&self) -> &str;

    /// The push describing the whole directory
    fn projection(records: Vec<Self>) -> Notification;
}

impl DirectoryRecord for ChannelRecord {
    const STORE: &'static str = CHANNEL_DIRECTORY;

    fn key(&self) -> &str {
        &self.address
    }

    fn projection(records: Vec<Self>) -> Notification {
        Notification::ChannelListUpdated { channels: records }
    }
}

impl DirectoryRecord for ConversationRecord {
    const STORE: &'static str = CONVERSATION_DIRECTORY;

    fn key(&self) -> &str {
        &self.address
    }

    fn projection(records: Vec<Self>) -> Notification {
        Notification::ConversationListUpdated {
            conversations: records
                .into_iter()
                .map(|r| (r.address, r.encrypted_phrase))
                .collect(),
        }
    }
}

impl DirectoryRecord for DirectMessageUser {
    const STORE: &'static str = DM_USER_DIRECTORY;

    fn key(&self) -> &str {
        &self.public_key
    }

    fn projection(records: Vec<Self>) -> Notification {
        Notification::DirectMessageUsersUpdated { users: records }
    }
}

pub type ChannelDirectory = Directory<ChannelRecord>;
pub type ConversationDirectory = Directory<ConversationRecord>;
pub type DirectMessageUsers = Directory<DirectMessageUser>;

/// Result of a put-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Duplicate,
}

/// Projection pusher registered on the directory log
struct Projector<R> {
    view: KeyValueView,
    sink: Arc<dyn NotificationSink>,
    _record: PhantomData<fn() -> R>,
}

impl<R: DirectoryRecord> Projector<R> {
    async fn records(&self) -> StoreResult<Vec<R>> {
        let map = self
            .view
            .all::<R>()
            .await
            .map_err(StoreError::log(R::STORE))?;
        Ok(map.into_values().collect())
    }

    async fn push(&self) {
        match self.records().await {
            Ok(records) => {
                debug!(store = R::STORE, count = records.len(), "Pushing directory");
                self.sink.emit(R::projection(records));
            }
            Err(e) => warn!(store = R::STORE, "Failed to read directory: {}", e),
        }
    }
}

#[async_trait]
impl<R: DirectoryRecord> StoreListener for Projector<R> {
    fn store(&self) -> &str {
        R::STORE
    }

    async fn on_write(&self, _entry: LogEntry) {
        self.push().await;
    }

    async fn on_replicated(&self) {
        self.push().await;
    }
}

/// Put-if-absent map of records over a replicated key-value log
pub struct Directory<R> {
    projector: Arc<Projector<R>>,
    write_lock: Mutex<()>,
    attachment: Attachment,
}

impl<R: DirectoryRecord> Directory<R> {
    /// Open, wire and load the directory log
    pub async fn open(
        logs: &dyn LogFactory,
        sink: Arc<dyn NotificationSink>,
    ) -> StoreResult<Self> {
        let log = logs
            .open(R::STORE, LogType::KeyValue)
            .await
            .map_err(StoreError::log(R::STORE))?;
        let directory = Self {
            projector: Arc::new(Projector {
                view: KeyValueView::new(log.clone()),
                sink,
                _record: PhantomData,
            }),
            write_lock: Mutex::new(()),
            attachment: Attachment::new(),
        };
        directory
            .attachment
            .attach(directory.projector.clone(), log.subscribe());
        log.load().await.map_err(StoreError::log(R::STORE))?;
        info!(store = R::STORE, "Directory loaded");
        Ok(directory)
    }

    pub fn name(&self) -> &'static str {
        R::STORE
    }

    /// Write `record` unless its key is already present
    pub async fn put_if_absent(&self, record: R) -> StoreResult<PutOutcome> {
        let _guard = self.write_lock.lock().await;
        let view = &self.projector.view;
        let key = record.key().to_string();
        let existing = view
            .get::<serde_json::Value>(&key)
            .await
            .map_err(StoreError::log(R::STORE))?;
        if existing.is_some() {
            debug!(store = R::STORE, key = %key, "Directory entry exists");
            return Ok(PutOutcome::Duplicate);
        }
        view.put(&key, &record).await.map_err(StoreError::log(R::STORE))?;
        ::metrics::counter!(crate::metrics::ENTRIES_APPENDED).increment(1);
        info!(store = R::STORE, key = %key, "Directory entry created");
        Ok(PutOutcome::Created)
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<R>> {
        self.projector.view.get(key).await.map_err(StoreError::log(R::STORE))
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Every record, ordered by key
    pub async fn records(&self) -> StoreResult<Vec<R>> {
        self.projector.records().await
    }

    /// Keys of every record, ordered
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.records().await?.iter().map(|r| r.key().to_string()).collect())
    }

    /// Push the current projection now
    pub async fn refresh(&self) {
        self.projector.push().await;
    }

    /// Raw number of entries in the directory log
    pub async fn entry_count(&self) -> StoreResult<usize> {
        Ok(self
            .projector
            .view
            .log()
            .entries()
            .await
            .map_err(StoreError::log(R::STORE))?
            .len())
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.attachment.shutdown();
        self.projector.view.log().close().await.map_err(StoreError::log(R::STORE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_log::MemoryNetwork;
    use crate::notify::MemorySink;
    use std::time::Duration;

    async fn open_channels(sink: Arc<MemorySink>) -> ChannelDirectory {
        let network = MemoryNetwork::new();
        let peer = network.peer("a");
        ChannelDirectory::open(&peer, sink).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let sink = Arc::new(MemorySink::new());
        let directory = open_channels(sink.clone()).await;

        let first = ChannelRecord::new("general", "general").with_owner("alice");
        let second = ChannelRecord::new("general", "renamed");
        assert_eq!(directory.put_if_absent(first.clone()).await.unwrap(), PutOutcome::Created);
        assert_eq!(directory.put_if_absent(second).await.unwrap(), PutOutcome::Duplicate);

        assert_eq!(directory.get("general").await.unwrap(), Some(first));
        assert_eq!(directory.entry_count().await.unwrap(), 1);
        assert_eq!(directory.keys().await.unwrap(), vec!["general".to_string()]);
    }

    #[tokio::test]
    async fn test_write_pushes_full_projection() {
        let sink = Arc::new(MemorySink::new());
        let directory = open_channels(sink.clone()).await;
        directory.put_if_absent(ChannelRecord::new("a", "a")).await.unwrap();
        directory.put_if_absent(ChannelRecord::new("b", "b")).await.unwrap();

        let pushed = sink
            .wait_for(Duration::from_secs(2), |n| {
                matches!(n, Notification::ChannelListUpdated { channels } if channels.len() == 2)
            })
            .await;
        assert!(pushed.is_some());
    }

    #[tokio::test]
    async fn test_conversation_projection_is_a_map() {
        let network = MemoryNetwork::new();
        let peer = network.peer("a");
        let sink = Arc::new(MemorySink::new());
        let directory = ConversationDirectory::open(&peer, sink.clone()).await.unwrap();
        directory
            .put_if_absent(ConversationRecord {
                address: "thread".to_string(),
                encrypted_phrase: "secret".to_string(),
            })
            .await
            .unwrap();

        let pushed = sink
            .wait_for(Duration::from_secs(2), |n| {
                matches!(n, Notification::ConversationListUpdated { conversations }
                    if conversations.get("thread").map(String::as_str) == Some("secret"))
            })
            .await;
        assert!(pushed.is_some());
    }

    #[tokio::test]
    async fn test_replicated_directory_converges() {
        let network = MemoryNetwork::new();
        let a = network.peer("a");
        let b = network.peer("b");
        let sink_a = Arc::new(MemorySink::new());
        let sink_b = Arc::new(MemorySink::new());

        let dir_a = DirectMessageUsers::open(&a, sink_a).await.unwrap();
        dir_a
            .put_if_absent(DirectMessageUser {
                public_key: "pk1".to_string(),
                half_key: "hk1".to_string(),
            })
            .await
            .unwrap();

        let dir_b = DirectMessageUsers::open(&b, sink_b.clone()).await.unwrap();
        assert!(dir_b.contains("pk1").await.unwrap());
        let pushed = sink_b
            .wait_for(Duration::from_secs(2), |n| {
                matches!(n, Notification::DirectMessageUsersUpdated { users } if users.len() == 1)
            })
            .await;
        assert!(pushed.is_some());
    }
}
