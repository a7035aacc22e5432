/*
    kv.rs - Key-value view over a replicated log

    A replicated map is a log of `put` operations folded last-writer-wins
    in the log's total order. Reads always recompute from the full entry
    set, so two replicas holding the same entries see the same map.
*/

use super::entry::LogEntry;
use super::errors::{LogError, LogResult};
use super::ReplicatedLog;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Operation stored in a key-value log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum KvOp {
    Put { key: String, value: serde_json::Value },
}

/// Last-writer-wins map projection of a log
#[derive(Clone)]
pub struct KeyValueView {
    log: Arc<dyn ReplicatedLog>,
}

impl KeyValueView {
    pub fn new(log: Arc<dyn ReplicatedLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<dyn ReplicatedLog> {
        &self.log
    }

    pub async fn put<V: Serialize>(&self, key: &str, value: &V) -> LogResult<LogEntry> {
        let value = serde_json::to_value(value).map_err(|e| LogError::Encode(e.to_string()))?;
        let op = KvOp::Put { key: key.to_string(), value };
        let payload = serde_json::to_vec(&op).map_err(|e| LogError::Encode(e.to_string()))?;
        self.log.append(payload).await
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> LogResult<Option<V>> {
        let entries = self.log.entries().await?;
        match Self::fold(&entries).remove(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| LogError::Decode(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Current map; values that no longer decode as `V` are skipped
    pub async fn all<V: DeserializeOwned>(&self) -> LogResult<BTreeMap<String, V>> {
        let entries = self.log.entries().await?;
        Ok(Self::fold(&entries)
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(v) => Some((key, v)),
                Err(e) => {
                    debug!(log = %self.log.name(), key = %key, "Skipping undecodable value: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Fold entries, assumed in total order, into the map they describe
    pub fn fold(entries: &[LogEntry]) -> BTreeMap<String, serde_json::Value> {
        let mut map = BTreeMap::new();
        for entry in entries {
            match entry.decode::<KvOp>() {
                Ok(KvOp::Put { key, value }) => {
                    map.insert(key, value);
                }
                Err(e) => debug!(hash = %entry.hash, "Skipping malformed kv entry: {}", e),
            }
        }
        map
    }
}
