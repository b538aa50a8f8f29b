//! Top-level configuration.
//!
//! One JSON document configures every component. Missing sections and
//! fields take their defaults, and `METABUILDER_*` environment variables
//! override a handful of operational knobs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::canary::CanaryConfig;
use crate::classifier::ClassifierConfig;
use crate::errors::ConfigError;
use crate::executor::PoolConfig;
use crate::observability::{LogFormat, LoggingConfig};
use crate::orchestrator::{OrchestratorConfig, RetryConfig};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "METABUILDER_";

/// Configuration for the whole orchestration core.
///
/// ```rust,ignore
/// let config = MetaBuilderConfig::from_file("metabuilder.json")?
///     .with_env_overrides()?;
/// config.validate()?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaBuilderConfig {
    /// Canary rollout.
    #[serde(default)]
    pub canary: CanaryConfig,
    /// Worker pool.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Run driver.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Failure classification.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// In-place step retries.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MetaBuilderConfig {
    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("CANARY_PERCENT") {
            self.canary.canary_percent = parse(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_ITERATIONS") {
            self.orchestrator.max_iterations = parse(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_WORKERS") {
            self.pool.max_workers = parse(&key, &value)?;
        }
        if let Some((key, value)) = var("CPU_CAPACITY") {
            self.pool.cpu_capacity = parse(&key, &value)?;
        }
        if let Some((key, value)) = var("IO_CAPACITY") {
            self.pool.io_capacity = parse(&key, &value)?;
        }
        if let Some((key, value)) = var("LEASE_TTL_MS") {
            self.pool.lease_ttl_ms = parse(&key, &value)?;
        }
        if let Some((_, value)) = var("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some((key, value)) = var("LOG_FORMAT") {
            self.logging.format = LogFormat::from_str(&value).map_err(|_| ConfigError::Env { var: key, value })?;
        }
        Ok(self)
    }

    /// Rejects values the components cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let canary = &self.canary;
        if !(0.0..=1.0).contains(&canary.canary_percent) {
            return Err(ConfigError::invalid("canary.canary_percent", "must be within [0, 1]"));
        }
        if canary.min_sample_size == 0 {
            return Err(ConfigError::invalid("canary.min_sample_size", "must be at least 1"));
        }
        if canary.significance_z <= 0.0 {
            return Err(ConfigError::invalid("canary.significance_z", "must be positive"));
        }

        let pool = &self.pool;
        for (field, value) in [
            ("pool.max_workers", pool.max_workers as u64),
            ("pool.cpu_capacity", pool.cpu_capacity as u64),
            ("pool.io_capacity", pool.io_capacity as u64),
            ("pool.lease_ttl_ms", pool.lease_ttl_ms),
            ("pool.reap_interval_ms", pool.reap_interval_ms),
            ("pool.heartbeat_interval_ms", pool.heartbeat_interval_ms),
            ("pool.idle_poll_ms", pool.idle_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be non-zero"));
            }
        }
        if pool.heartbeat_interval_ms >= pool.lease_ttl_ms {
            return Err(ConfigError::invalid(
                "pool.heartbeat_interval_ms",
                "must be shorter than pool.lease_ttl_ms",
            ));
        }
        if pool.idle_poll_ms >= pool.lease_ttl_ms {
            return Err(ConfigError::invalid(
                "pool.idle_poll_ms",
                "must be shorter than pool.lease_ttl_ms",
            ));
        }

        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::invalid("orchestrator.max_iterations", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.confidence_floor) {
            return Err(ConfigError::invalid("classifier.confidence_floor", "must be within [0, 1]"));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MetaBuilderConfig::from_json_str("{}").unwrap();
        assert!((config.canary.canary_percent - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.pool.max_workers, 16);
        assert_eq!(config.orchestrator.max_iterations, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let config = MetaBuilderConfig::from_json_str(
            r#"{"canary": {"canary_percent": 0.25}, "pool": {"io_capacity": 2}}"#,
        )
        .unwrap();
        assert!((config.canary.canary_percent - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.canary.min_sample_size, 30);
        assert_eq!(config.pool.io_capacity, 2);
        assert_eq!(config.pool.cpu_capacity, 8);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"orchestrator": {{"max_iterations": 7}}}}"#).unwrap();

        let config = MetaBuilderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_iterations, 7);
    }

    #[test]
    fn test_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetaBuilderConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));

        let err = MetaBuilderConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = MetaBuilderConfig::default()
            .with_overrides_from(env(&[
                ("METABUILDER_CANARY_PERCENT", "0.5"),
                ("METABUILDER_MAX_ITERATIONS", "9"),
                ("METABUILDER_LEASE_TTL_MS", "1500"),
                ("METABUILDER_LOG_FORMAT", "json"),
                ("METABUILDER_LOG_LEVEL", "metabuilder=debug"),
            ]))
            .unwrap();

        assert!((config.canary.canary_percent - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.orchestrator.max_iterations, 9);
        assert_eq!(config.pool.lease_ttl_ms, 1500);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "metabuilder=debug");
    }

    #[test]
    fn test_bad_env_override() {
        let err = MetaBuilderConfig::default()
            .with_overrides_from(env(&[("METABUILDER_IO_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "METABUILDER_IO_CAPACITY"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MetaBuilderConfig::default();
        config.canary.canary_percent = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "canary.canary_percent"
        ));

        let mut config = MetaBuilderConfig::default();
        config.pool.cpu_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = MetaBuilderConfig::default();
        config.pool.heartbeat_interval_ms = config.pool.lease_ttl_ms;
        assert!(config.validate().is_err());

        let mut config = MetaBuilderConfig::default();
        config.pool.lease_ttl_ms = 200;
        config.pool.heartbeat_interval_ms = 20;
        config.pool.idle_poll_ms = 250;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "pool.idle_poll_ms"
        ));

        let mut config = MetaBuilderConfig::default();
        config.orchestrator.max_iterations = 0;
        assert!(config.validate().is_err());
    }
}
