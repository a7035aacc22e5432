/*
    errors.rs - Error types for the store subsystem

    Defines all error types that can occur in:
    - Input validation at the call boundary
    - Certificate verification
    - Snapshot synchronization
    - The replicated log underneath, with the store it failed on
    - Startup configuration
*/

use crate::config::ConfigError;
use crate::core_log::LogError;
use crate::core_snapshot::SyncError;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed or missing address or message
    #[error("Validation error: {0}")]
    Validation(String),

    /// Certificate refused by the ledger
    #[error("Certificate verification failed: {0}")]
    Verification(String),

    /// Snapshot sync attempt failed
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Replicated log failure
    #[error("Log error on {store}: {source}")]
    Log {
        store: String,
        #[source]
        source: LogError,
    },

    /// Record could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Node configuration rejected at startup
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Registry already shut down
    #[error("Store registry is closed")]
    Closed,
}

impl StoreError {
    /// Wrap a primitive error with the store it happened on
    pub(crate) fn log(store: &str) -> impl FnOnce(LogError) -> StoreError + '_ {
        move |source| StoreError::Log { store: store.to_string(), source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
