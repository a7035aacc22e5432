//! Deterministic store names
//!
//! Every peer derives the same log name for the same logical store, which
//! is what lets replicas of a store find each other.

use super::errors::{StoreError, StoreResult};
use std::fmt;

pub const CHANNEL_DIRECTORY: &str = "public-channels";
pub const CONVERSATION_DIRECTORY: &str = "msg-threads";
pub const DM_USER_DIRECTORY: &str = "dms";
pub const CERTIFICATES: &str = "certificates";

/// Kind of per-address message store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RepoKind {
    /// Public channel message log
    Channel,
    /// Direct-message conversation log
    Conversation,
}

impl RepoKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            RepoKind::Channel => "channels",
            RepoKind::Conversation => "dms",
        }
    }

    /// Log name for `address`, e.g. `channels.general`
    pub fn store_name(&self, address: &str) -> String {
        format!("{}.{}", self.prefix(), address)
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RepoKind::Channel => "channel",
            RepoKind::Conversation => "conversation",
        })
    }
}

/// Name of the snapshot control log attached to `store`, e.g.
/// `channels.general/snapshot`. Store names never contain `/`, so no
/// message log can share a control log's name.
pub fn control_log_name(store: &str, suffix: &str) -> String {
    format!("{}/{}", store, suffix)
}

/// Reject addresses that cannot form a store name
pub fn validate_address(address: &str) -> StoreResult<()> {
    if address.trim().is_empty() {
        return Err(StoreError::Validation("address is empty".to_string()));
    }
    if address.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(StoreError::Validation(format!(
            "address {:?} contains whitespace or '/'",
            address
        )));
    }
    Ok(())
}
