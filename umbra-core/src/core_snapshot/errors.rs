/*
    errors.rs - Error types for snapshot sync

    A failed sync attempt is fatal for that attempt on that store only:
    - The blob the pointer names is not reachable in time
    - The blob is reachable but does not decode into the target log
    - The target log did not finish its load in time
    - The log primitive failed underneath
*/

use crate::core_log::LogError;
use thiserror::Error;

/// Errors raised while producing or consuming a snapshot
#[derive(Debug, Error)]
pub enum SyncError {
    /// No reachable peer served the blob before the fetch deadline
    #[error("Snapshot not found for {store}: blob {hash}")]
    SnapshotNotFound { store: String, hash: String },

    /// Blob bytes do not describe the target log
    #[error("Corrupt snapshot for {store}: {reason}")]
    CorruptSnapshot { store: String, reason: String },

    /// The target log did not finish loading after the import
    #[error("Timed out loading {store} after snapshot import")]
    LoadTimeout { store: String },

    /// Primitive failure, with the store it happened on
    #[error("Log error on {store}: {source}")]
    Log {
        store: String,
        #[source]
        source: LogError,
    },
}

impl SyncError {
    pub(crate) fn log(store: &str) -> impl FnOnce(LogError) -> SyncError + '_ {
        move |source| SyncError::Log { store: store.to_string(), source }
    }

    /// Name of the store the failed attempt was for
    pub fn store(&self) -> &str {
        match self {
            SyncError::SnapshotNotFound { store, .. }
            | SyncError::CorruptSnapshot { store, .. }
            | SyncError::LoadTimeout { store }
            | SyncError::Log { store, .. } => store,
        }
    }
}

/// Result type for snapshot operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::SnapshotNotFound {
            store: "channels.general".to_string(),
            hash: "ab12".to_string(),
        };
        assert_eq!(err.to_string(), "Snapshot not found for channels.general: blob ab12");
        assert_eq!(err.store(), "channels.general");
    }

    #[test]
    fn test_log_error_keeps_context() {
        let err = SyncError::log("channels.x")(LogError::Closed("channels.x".to_string()));
        assert_eq!(err.store(), "channels.x");
        assert!(err.to_string().contains("Log is closed"));
    }
}
