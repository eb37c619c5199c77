//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use vigil_executor::{ExecutorConfig, SchedulerConfig};
use vigil_watcher::WatcherConfig;

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a vigil node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field has a default, so an
/// empty file is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// LMDB map size in bytes.
    #[serde(default = "default_lmdb_map_size")]
    pub lmdb_map_size: usize,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to register Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./vigil_data")
}

fn default_lmdb_map_size() -> usize {
    vigil_store_lmdb::environment::DEFAULT_MAP_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lmdb_map_size: default_lmdb_map_size(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            enable_metrics: false,
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.scheduler.processing_time_ms, 3_000);
        assert_eq!(config.scheduler.height_tolerance_before_removing, 10);
        assert_eq!(config.executor.retry_count, 10);
        assert_eq!(config.watcher.polling_time_ms, 7_000);
        assert_eq!(config.watcher.worker_max_retries, 6);
    }

    #[test]
    fn nested_sections_override_individual_fields() {
        let toml = r#"
            log_format = "json"
            enable_metrics = true

            [scheduler]
            processing_time_ms = 500

            [watcher]
            receipt_cache_max_blocks = 20
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.enable_metrics);
        assert_eq!(config.scheduler.processing_time_ms, 500);
        assert_eq!(config.scheduler.network_timeout_ms, 10_000);
        assert_eq!(config.watcher.receipt_cache_max_blocks, 20);
        assert_eq!(config.watcher.status_time_ms, 60_000);
        assert_eq!(config.executor.polling_time_ms, 1_000);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let result = NodeConfig::from_toml_str(r#"log_format = "xml""#);
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/vigil.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
