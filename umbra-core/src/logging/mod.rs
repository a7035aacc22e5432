//! Logging subsystem for umbra nodes
//!
//! Installs a global `tracing` subscriber: an `EnvFilter` (the configured
//! level plus per-module directives, unless `RUST_LOG` is set) and a
//! `fmt` layer, plain or JSON.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Output encoding of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub timestamps: bool,
    pub targets: bool,
    /// Extra `EnvFilter` directives, e.g. `umbra_core::core_snapshot=debug`
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            format: LogFormat::Plain,
            timestamps: true,
            targets: true,
            directives: Vec::new(),
        }
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn targets(mut self, enabled: bool) -> Self {
        self.targets = enabled;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// The filter string this config stands for
    pub fn filter_spec(&self) -> String {
        std::iter::once(self.level.as_str().to_string())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.filter_spec())
            .map_err(|e| LoggingError::InvalidConfiguration(e.to_string()))
    }
}

/// Initialize logging at `info`, plain text
///
/// # Example
/// ```
/// use umbra_core::logging::init_logging;
///
/// init_logging().expect("Failed to initialize logging");
/// ```
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with a custom configuration
///
/// Fails with [`LoggingError::InitializationFailed`] if a global
/// subscriber is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(config.filter()?);
    let targets = config.targets;

    let installed = match (config.format, config.timestamps) {
        (LogFormat::Json, true) => registry.with(fmt::layer().json().with_target(targets)).try_init(),
        (LogFormat::Json, false) => registry
            .with(fmt::layer().json().without_time().with_target(targets))
            .try_init(),
        (LogFormat::Plain, true) => registry.with(fmt::layer().with_target(targets)).try_init(),
        (LogFormat::Plain, false) => registry
            .with(fmt::layer().without_time().with_target(targets))
            .try_init(),
    };

    installed.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Plain);
        assert!(config.timestamps && config.targets);
        assert_eq!(config.filter_spec(), "info");
    }

    #[test]
    fn test_directives_extend_filter() {
        let config = LogConfig::new(LogLevel::Warn)
            .format(LogFormat::Json)
            .timestamps(false)
            .with_directive("umbra_core::core_snapshot=debug");
        assert_eq!(config.filter_spec(), "warn,umbra_core::core_snapshot=debug");
        assert!(config.filter().is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging_with_config(LogConfig::new(LogLevel::Warn).timestamps(false));
        assert!(matches!(
            init_logging(),
            Err(LoggingError::InitializationFailed(_))
        ));
    }
}
