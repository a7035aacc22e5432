//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    #[error("Failed to write configuration file: {0}")]
    FileWrite(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    /// An environment override could not be parsed
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue { key: key.to_string(), reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::invalid("UMBRA_CREATE_SNAPSHOT", "expected true or false");
        assert_eq!(
            err.to_string(),
            "Invalid value for UMBRA_CREATE_SNAPSHOT: expected true or false"
        );
    }
}
