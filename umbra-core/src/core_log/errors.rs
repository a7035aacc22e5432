/*
    errors.rs - Error types for the replicated log primitive

    Everything the orchestration layer can observe going wrong below it:
    - Opening or loading a log
    - Using a handle after close
    - Decoding cached snapshot data
    - Blob store failures
*/

use thiserror::Error;

/// Errors surfaced by a `ReplicatedLog`, `LogFactory` or `BlobStore`
#[derive(Debug, Error)]
pub enum LogError {
    /// The log could not be opened
    #[error("Failed to open log {name}: {reason}")]
    Open { name: String, reason: String },

    /// Operation on a closed handle
    #[error("Log is closed: {0}")]
    Closed(String),

    /// The log has not finished loading
    #[error("Log not loaded: {0}")]
    NotLoaded(String),

    /// Persisted or cached bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Blob store failure
    #[error("Blob store error: {0}")]
    Blob(String),
}

/// Result type for log primitive operations
pub type LogResult<T> = Result<T, LogError>;

impl From<bincode::Error> for LogError {
    fn from(err: bincode::Error) -> Self {
        LogError::Decode(err.to_string())
    }
}
