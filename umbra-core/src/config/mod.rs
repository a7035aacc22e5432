//! Configuration management for umbra nodes
//!
//! Defaults, TOML files and `UMBRA_*` environment overrides, with
//! validation applied after every load.

use crate::logging::{LogConfig, LogFormat, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable identifier of this node on the network
    pub peer_id: String,

    /// Snapshot production and consumption
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Certificate ledger
    #[serde(default)]
    pub certificates: CertificateConfig,

    /// Front-layer push channel
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Snapshot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// This peer publishes snapshots of the logs it seeds
    pub create_snapshot: bool,

    /// Upper bound on fetching a snapshot blob
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Upper bound on the load that follows a snapshot import
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,

    /// Suffix of the control log name: `<store>/<suffix>`
    pub control_log_suffix: String,
}

/// Certificate ledger configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// PEM-encoded root certificate(s) every accepted chain must end in
    pub root_pems: Vec<String>,
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Capacity of the push channel; 0 means unbounded. Pushes that find
    /// a bounded channel full wait for room and may arrive out of order.
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of plain text
    pub json: bool,

    pub timestamps: bool,

    pub targets: bool,

    /// Per-module overrides in `EnvFilter` syntax
    #[serde(default)]
    pub directives: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            create_snapshot: false,
            fetch_timeout: Duration::from_secs(60),
            load_timeout: Duration::from_secs(120),
            control_log_suffix: "snapshot".to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { channel_capacity: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            timestamps: true,
            targets: true,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::parse(&self.level)
            .ok_or_else(|| ConfigError::invalid("logging.level", &self.level))?;
        let format = if self.json { LogFormat::Json } else { LogFormat::Plain };
        Ok(self.directives.iter().fold(
            LogConfig::new(level)
                .format(format)
                .timestamps(self.timestamps)
                .targets(self.targets),
            |config, directive| config.with_directive(directive.clone()),
        ))
    }
}

impl NodeConfig {
    /// Defaults for a node with the given peer id
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            snapshot: SnapshotConfig::default(),
            certificates: CertificateConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn with_snapshot_producer(mut self, enabled: bool) -> Self {
        self.snapshot.create_snapshot = enabled;
        self
    }

    pub fn with_root_pem(mut self, pem: impl Into<String>) -> Self {
        self.certificates.root_pems.push(pem.into());
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot.fetch_timeout = timeout;
        self
    }

    /// Load configuration from environment variables
    ///
    /// Recognised: `UMBRA_PEER_ID`, `UMBRA_CREATE_SNAPSHOT`,
    /// `UMBRA_SNAPSHOT_FETCH_TIMEOUT_MS`, `UMBRA_LOG_LEVEL`, `UMBRA_LOG_JSON`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`NodeConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(lookup("UMBRA_PEER_ID").unwrap_or_default());

        if let Some(flag) = lookup("UMBRA_CREATE_SNAPSHOT") {
            config.snapshot.create_snapshot =
                flag.parse().map_err(|e| ConfigError::invalid("UMBRA_CREATE_SNAPSHOT", e))?;
        }
        if let Some(ms) = lookup("UMBRA_SNAPSHOT_FETCH_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| ConfigError::invalid("UMBRA_SNAPSHOT_FETCH_TIMEOUT_MS", e))?;
            config.snapshot.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(level) = lookup("UMBRA_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = lookup("UMBRA_LOG_JSON") {
            config.logging.json =
                json.parse().map_err(|e| ConfigError::invalid("UMBRA_LOG_JSON", e))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("peer_id must not be empty".to_string()));
        }

        if self.snapshot.fetch_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "snapshot.fetch_timeout must be greater than 0".to_string(),
            ));
        }

        if self.snapshot.load_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "snapshot.load_timeout must be greater than 0".to_string(),
            ));
        }

        let suffix = &self.snapshot.control_log_suffix;
        if suffix.is_empty() || suffix.contains(['.', '/']) || suffix.contains(char::is_whitespace)
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid control log suffix: {:?}",
                suffix
            )));
        }

        if LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::new("peer-a");
        assert!(config.validate().is_ok());
        assert!(!config.snapshot.create_snapshot);
        assert_eq!(config.snapshot.control_log_suffix, "snapshot");
    }

    #[test]
    fn test_config_validation() {
        assert!(NodeConfig::new("  ").validate().is_err());

        let mut config = NodeConfig::new("peer-a");
        config.snapshot.fetch_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::new("peer-a");
        config.snapshot.control_log_suffix = "a.b".to_string();
        assert!(config.validate().is_err());
        config.snapshot.control_log_suffix = "a/b".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::new("peer-a");
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("UMBRA_PEER_ID", "peer-b"),
            ("UMBRA_CREATE_SNAPSHOT", "true"),
            ("UMBRA_SNAPSHOT_FETCH_TIMEOUT_MS", "250"),
            ("UMBRA_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config = NodeConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.peer_id, "peer-b");
        assert!(config.snapshot.create_snapshot);
        assert_eq!(config.snapshot.fetch_timeout, Duration::from_millis(250));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_from_lookup_rejects_bad_flag() {
        let result = NodeConfig::from_lookup(|k| match k {
            "UMBRA_PEER_ID" => Some("peer".to_string()),
            "UMBRA_CREATE_SNAPSHOT" => Some("maybe".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");

        let config = NodeConfig::new("peer-a")
            .with_snapshot_producer(true)
            .with_root_pem("-----BEGIN CERTIFICATE-----\nsubject=root\n-----END CERTIFICATE-----");
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_file_with_humantime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
peer_id = "peer-c"

[snapshot]
create_snapshot = false
fetch_timeout = "5s"
load_timeout = "2m"
control_log_suffix = "snap"
"#,
        )
        .unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.snapshot.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.snapshot.load_timeout, Duration::from_secs(120));
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_logging_section_to_log_config() {
        let mut logging = LoggingConfig::default();
        logging.level = "warn".to_string();
        logging.json = true;
        logging.directives = vec!["umbra_core::core_store=trace".to_string()];
        let log_config = logging.to_log_config().unwrap();
        assert_eq!(log_config.level, LogLevel::Warn);
        assert_eq!(log_config.format, LogFormat::Json);
        assert_eq!(log_config.filter_spec(), "warn,umbra_core::core_store=trace");
    }
}
