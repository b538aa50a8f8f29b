//! Global `tracing` subscriber installation.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "metabuilder=debug,warn".
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include the event target.
    #[serde(default = "default_with_targets")]
    pub with_targets: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_with_targets() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            with_targets: default_with_targets(),
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingError {
    /// The filter directive did not parse.
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
    /// Unknown format name.
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),
    /// A global subscriber is already set.
    #[error("Logger already initialized")]
    AlreadyInitialized,
    /// Any other installation failure.
    #[error("Logger initialization failed: {0}")]
    InitializationFailed(String),
}

/// Installs the global subscriber described by `config`.
///
/// Fails with [`LoggingError::AlreadyInitialized`] on a second call.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = mk_filter(&config.level)?;
    match config.format {
        LogFormat::Text => {
            let layer = fmt::layer().with_target(config.with_targets);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(config.with_targets);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn mk_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|_| LoggingError::InvalidLogLevel(level.to_string()))
}

fn as_error(e: impl std::fmt::Display) -> LoggingError {
    let s = e.to_string();
    if s.contains("SetGlobalDefaultError") || s.contains("global default") {
        LoggingError::AlreadyInitialized
    } else {
        LoggingError::InitializationFailed(s)
    }
}

fn init_with<S>(subscriber: S) -> Result<(), LoggingError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(as_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" text ".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!(matches!("xml".parse::<LogFormat>(), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_config_defaults() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_targets);
    }

    #[test]
    fn test_invalid_level_rejected_before_install() {
        let config = LoggingConfig {
            level: "metabuilder=verbose".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(LoggingError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        // Another test in this binary may have installed a subscriber first.
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
