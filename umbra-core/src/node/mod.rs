//! Node facade
//!
//! The inbound operations of a messaging node, on top of the store
//! registry, the directories and the certificate ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                  Node                    │
//! └───┬──────────┬──────────┬──────────┬─────┘
//!     │          │          │          │
//!     ▼          ▼          ▼          ▼
//! Registry  Directories  Ledger  NotificationSink
//!     │
//!     ▼
//! SnapshotCoordinator (one per message store)
//! ```
//!
//! Malformed input is rejected here: the operation logs a warning and
//! returns a "rejected" result instead of an error.

use crate::config::NodeConfig;
use crate::core_log::{BlobStore, LogFactory, MemoryPeer};
use crate::core_snapshot::{SnapshotPointer, SnapshotState};
use crate::core_store::{
    names::validate_address, registry::bind_metadata, CertificateEntry, CertificateLedger, CertificateVerifier,
    ChannelDirectory, ChannelMessage, ChannelRecord, ConversationDirectory, ConversationRecord,
    DirectMessage, DirectMessagePayload, DirectMessageUser, DirectMessageUsers, PutOutcome,
    RepoKind, StoreError, StoreRegistry, StoreResult, SyncStatus,
};
use crate::notify::{Notification, NotificationSink};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// External collaborators a node runs on
#[derive(Clone)]
pub struct Backends {
    pub logs: Arc<dyn LogFactory>,
    pub blobs: Arc<dyn BlobStore>,
    pub verifier: Arc<dyn CertificateVerifier>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Backends {
    /// Backends over an in-memory peer
    pub fn memory(
        peer: &MemoryPeer,
        verifier: Arc<dyn CertificateVerifier>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            logs: Arc::new(peer.clone()),
            blobs: peer.blobs(),
            verifier,
            sink,
        }
    }
}

/// Result of a create-if-absent operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Duplicate,
    /// Input failed validation; nothing was written
    Rejected,
}

impl From<PutOutcome> for CreateOutcome {
    fn from(outcome: PutOutcome) -> Self {
        match outcome {
            PutOutcome::Created => CreateOutcome::Created,
            PutOutcome::Duplicate => CreateOutcome::Duplicate,
        }
    }
}

/// Log and swallow validation errors; everything else propagates
fn reject_invalid<T>(op: &str, address: &str, result: StoreResult<T>, rejected: T) -> StoreResult<T> {
    match result {
        Err(StoreError::Validation(reason)) => {
            warn!(op, address = %address, "Rejected: {}", reason);
            Ok(rejected)
        }
        other => other,
    }
}

fn validate_message(address: &str, message: &ChannelMessage) -> StoreResult<()> {
    validate_address(address)?;
    if message.id.trim().is_empty() {
        return Err(StoreError::Validation("message id is empty".to_string()));
    }
    if !message.channel_address.is_empty() && message.channel_address != address {
        return Err(StoreError::Validation(format!(
            "message belongs to {}, not {}",
            message.channel_address, address
        )));
    }
    Ok(())
}

/// A running messaging node
pub struct Node {
    config: NodeConfig,
    sink: Arc<dyn NotificationSink>,
    registry: StoreRegistry,
    channels: Arc<ChannelDirectory>,
    conversations: ConversationDirectory,
    dm_users: DirectMessageUsers,
    certificates: CertificateLedger,
}

impl Node {
    /// Validate `config`, open the shared stores and build the registry
    pub async fn start(config: NodeConfig, backends: Backends) -> StoreResult<Self> {
        config.validate()?;
        crate::metrics::init_metrics();

        let Backends { logs, blobs, verifier, sink } = backends;
        let channels = Arc::new(ChannelDirectory::open(logs.as_ref(), sink.clone()).await?);
        let conversations = ConversationDirectory::open(logs.as_ref(), sink.clone()).await?;
        let dm_users = DirectMessageUsers::open(logs.as_ref(), sink.clone()).await?;
        let certificates = CertificateLedger::open(
            logs.as_ref(),
            verifier,
            config.certificates.root_pems.clone(),
            sink.clone(),
        )
        .await?;
        let registry = StoreRegistry::new(
            config.peer_id.clone(),
            logs,
            blobs,
            sink.clone(),
            channels.clone(),
            config.snapshot.clone(),
        );

        info!(
            peer = %config.peer_id,
            producer = config.snapshot.create_snapshot,
            "Node started"
        );
        Ok(Self {
            config,
            sink,
            registry,
            channels,
            conversations,
            dm_users,
            certificates,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// Register a channel in the directory and subscribe to it
    pub async fn create_channel(
        &self,
        address: &str,
        metadata: ChannelRecord,
    ) -> StoreResult<CreateOutcome> {
        let result = self.create_channel_inner(address, metadata).await;
        reject_invalid("create_channel", address, result, CreateOutcome::Rejected)
    }

    async fn create_channel_inner(
        &self,
        address: &str,
        metadata: ChannelRecord,
    ) -> StoreResult<CreateOutcome> {
        validate_address(address)?;
        let metadata = bind_metadata(address, metadata)?;
        let outcome = self.channels.put_if_absent(metadata).await?;
        self.registry.subscribe(RepoKind::Channel, address).await?;
        Ok(outcome.into())
    }

    /// Subscribe to a channel, registering `metadata` if the directory
    /// does not list it yet, and push the directory and message backfill
    pub async fn subscribe_channel(
        &self,
        address: &str,
        metadata: Option<ChannelRecord>,
    ) -> StoreResult<()> {
        let result = async {
            self.registry.get_or_create(RepoKind::Channel, address, metadata).await?;
            self.registry.subscribe(RepoKind::Channel, address).await?;
            self.channels.refresh().await;
            Ok::<_, StoreError>(())
        }
        .await;
        reject_invalid("subscribe_channel", address, result, ())
    }

    pub async fn send_channel_message(
        &self,
        address: &str,
        mut message: ChannelMessage,
    ) -> StoreResult<()> {
        let result = async {
            validate_message(address, &message)?;
            message.channel_address = address.to_string();
            let payload = serde_json::to_vec(&message)?;
            self.registry.send(RepoKind::Channel, address, payload).await?;
            Ok::<_, StoreError>(())
        }
        .await;
        reject_invalid("send_channel_message", address, result, ())
    }

    /// Messages of `address` whose id is in `ids`, in log order. The
    /// list is also pushed as a `MessageList`.
    pub async fn ask_for_messages(
        &self,
        address: &str,
        ids: &[String],
    ) -> StoreResult<Vec<ChannelMessage>> {
        let result = async {
            let repo = self.registry.get_or_create(RepoKind::Channel, address, None).await?;
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            let messages: Vec<ChannelMessage> = repo
                .channel_messages()
                .await?
                .into_iter()
                .filter(|m| wanted.contains(m.id.as_str()))
                .collect();
            self.sink.emit(Notification::MessageList {
                address: address.to_string(),
                messages: messages.clone(),
            });
            Ok::<_, StoreError>(messages)
        }
        .await;
        reject_invalid("ask_for_messages", address, result, Vec::new())
    }

    pub async fn subscribe_conversation(&self, address: &str) -> StoreResult<()> {
        let result = self
            .registry
            .subscribe(RepoKind::Conversation, address)
            .await
            .map(|_| ());
        reject_invalid("subscribe_conversation", address, result, ())
    }

    /// Append to a conversation; the returned message is `None` if rejected
    pub async fn send_direct_message(
        &self,
        address: &str,
        payload: &str,
    ) -> StoreResult<Option<DirectMessage>> {
        let result = async {
            let body = serde_json::to_vec(&DirectMessagePayload { payload: payload.to_string() })?;
            let entry = self.registry.send(RepoKind::Conversation, address, body).await?;
            Ok::<_, StoreError>(Some(DirectMessage {
                id: entry.hash.to_hex(),
                payload: payload.to_string(),
            }))
        }
        .await;
        reject_invalid("send_direct_message", address, result, None)
    }

    /// Record a conversation thread and subscribe to it
    pub async fn initialize_conversation(
        &self,
        address: &str,
        encrypted_phrase: &str,
    ) -> StoreResult<CreateOutcome> {
        let result = async {
            validate_address(address)?;
            let outcome = self
                .conversations
                .put_if_absent(ConversationRecord {
                    address: address.to_string(),
                    encrypted_phrase: encrypted_phrase.to_string(),
                })
                .await?;
            self.registry.subscribe(RepoKind::Conversation, address).await?;
            Ok::<_, StoreError>(CreateOutcome::from(outcome))
        }
        .await;
        reject_invalid("initialize_conversation", address, result, CreateOutcome::Rejected)
    }

    /// List a user as reachable by direct message
    pub async fn register_dm_user(
        &self,
        public_key: &str,
        half_key: &str,
    ) -> StoreResult<CreateOutcome> {
        let result = async {
            if public_key.trim().is_empty() || half_key.trim().is_empty() {
                return Err(StoreError::Validation("public key and half key are required".to_string()));
            }
            let outcome = self
                .dm_users
                .put_if_absent(DirectMessageUser {
                    public_key: public_key.to_string(),
                    half_key: half_key.to_string(),
                })
                .await?;
            Ok::<_, StoreError>(CreateOutcome::from(outcome))
        }
        .await;
        reject_invalid("register_dm_user", public_key, result, CreateOutcome::Rejected)
    }

    pub async fn save_certificate(&self, pem: &str) -> bool {
        self.certificates.save(pem).await
    }

    pub async fn username_exists(&self, name: &str) -> StoreResult<bool> {
        self.certificates.username_exists(name).await
    }

    /// Publish a snapshot of a channel's log now. `None` on consumers
    /// and for empty logs.
    pub async fn publish_snapshot(&self, address: &str) -> StoreResult<Option<SnapshotPointer>> {
        let result = async {
            let repo = self.registry.get_or_create(RepoKind::Channel, address, None).await?;
            Ok::<_, StoreError>(repo.snapshot().produce().await?)
        }
        .await;
        reject_invalid("publish_snapshot", address, result, None)
    }

    /// Subscribe to every channel in the directory. Returns how many
    /// subscriptions succeeded; failures are logged and skipped.
    pub async fn subscribe_to_all_channels(&self) -> StoreResult<usize> {
        let mut subscribed = 0;
        for address in self.channels.keys().await? {
            match self.registry.subscribe(RepoKind::Channel, &address).await {
                Ok(_) => subscribed += 1,
                Err(e) => warn!(address = %address, "Failed to subscribe channel: {}", e),
            }
        }
        self.channels.refresh().await;
        Ok(subscribed)
    }

    /// Subscribe to every conversation in the thread directory
    pub async fn subscribe_to_all_conversations(&self) -> StoreResult<usize> {
        let mut subscribed = 0;
        for address in self.conversations.keys().await? {
            match self.registry.subscribe(RepoKind::Conversation, &address).await {
                Ok(_) => subscribed += 1,
                Err(e) => warn!(address = %address, "Failed to subscribe conversation: {}", e),
            }
        }
        self.conversations.refresh().await;
        Ok(subscribed)
    }

    pub async fn unsubscribe(&self, kind: RepoKind, address: &str) -> bool {
        self.registry.unsubscribe(kind, address).await
    }

    pub async fn channels(&self) -> StoreResult<Vec<ChannelRecord>> {
        self.channels.records().await
    }

    pub async fn conversations(&self) -> StoreResult<Vec<ConversationRecord>> {
        self.conversations.records().await
    }

    pub async fn dm_users(&self) -> StoreResult<Vec<DirectMessageUser>> {
        self.dm_users.records().await
    }

    pub async fn certificates(&self) -> StoreResult<Vec<CertificateEntry>> {
        self.certificates.certificates().await
    }

    pub async fn sync_status(&self, kind: RepoKind, address: &str) -> Option<SyncStatus> {
        Some(self.registry.lookup(kind, address).await?.status())
    }

    pub async fn snapshot_state(&self, kind: RepoKind, address: &str) -> Option<SnapshotState> {
        Some(self.registry.lookup(kind, address).await?.snapshot_state())
    }

    /// Close every store this node opened
    pub async fn close_all(&self) -> StoreResult<()> {
        let registry = self.registry.close_all().await;
        self.channels.close().await?;
        self.conversations.close().await?;
        self.dm_users.close().await?;
        self.certificates.close().await?;
        info!(peer = %self.config.peer_id, "Node stopped");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{channel, message, TestPeer};

    #[tokio::test]
    async fn test_invalid_input_is_swallowed() {
        let peer = TestPeer::new("a").start().await;
        let node = &peer.node;

        assert_eq!(
            node.create_channel("", ChannelRecord::new("", "nameless")).await.unwrap(),
            CreateOutcome::Rejected
        );
        node.subscribe_channel("  ", None).await.unwrap();
        node.send_channel_message("general", message("", "general")).await.unwrap();
        node.send_channel_message("general", message("m1", "elsewhere")).await.unwrap();
        assert_eq!(node.send_direct_message("a/b", "hi").await.unwrap(), None);

        assert!(node.registry().repos().await.is_empty());
        assert!(node.channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_address_mismatch_rejected() {
        let peer = TestPeer::new("a").start().await;
        let outcome = peer
            .node
            .create_channel("general", ChannelRecord::new("random", "random"))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_subscribe_with_foreign_metadata_writes_nothing() {
        let peer = TestPeer::new("a").start().await;
        let node = &peer.node;

        node.subscribe_channel("general", Some(channel("random"))).await.unwrap();
        assert!(node.channels().await.unwrap().is_empty());
        assert!(node.registry().repos().await.is_empty());

        node.subscribe_channel("general", Some(ChannelRecord::new("", "General"))).await.unwrap();
        let channels = node.channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].address, "general");
    }

    #[tokio::test]
    async fn test_register_dm_user() {
        let peer = TestPeer::new("a").start().await;
        let node = &peer.node;
        assert_eq!(node.register_dm_user("pk", "hk").await.unwrap(), CreateOutcome::Created);
        assert_eq!(node.register_dm_user("pk", "other").await.unwrap(), CreateOutcome::Duplicate);
        assert_eq!(node.register_dm_user("", "hk").await.unwrap(), CreateOutcome::Rejected);
        assert_eq!(node.dm_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_config() {
        let config = NodeConfig::new("");
        let result = TestPeer::new("a").with_config(config).try_start().await;
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
