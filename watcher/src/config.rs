//! Watcher timing and sizing parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Interval between receipt collection rounds.
    #[serde(default = "default_polling_time_ms")]
    pub polling_time_ms: u64,

    /// Interval between status reports.
    #[serde(default = "default_status_time_ms")]
    pub status_time_ms: u64,

    /// Deadline for each call the backend makes to the layer-1 client.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Overall deadline for one worker in a collection round.
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,

    /// Attempts per receipt lookup before a recoverable error is reported.
    #[serde(default = "default_worker_max_retries")]
    pub worker_max_retries: u32,

    /// Blocks a collected receipt stays cached after retrieval.
    #[serde(default = "default_receipt_cache_max_blocks")]
    pub receipt_cache_max_blocks: u64,

    /// Stale threshold multiplier applied once a transaction has been replaced.
    #[serde(default = "default_stale_backoff_multiplier")]
    pub stale_backoff_multiplier: u64,

    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,

    /// Log per-selector gas profiles on every status tick.
    #[serde(default)]
    pub metrics_display: bool,
}

impl WatcherConfig {
    pub fn polling_time(&self) -> Duration {
        Duration::from_millis(self.polling_time_ms)
    }

    pub fn status_time(&self) -> Duration {
        Duration::from_millis(self.status_time_ms)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            polling_time_ms: default_polling_time_ms(),
            status_time_ms: default_status_time_ms(),
            network_timeout_ms: default_network_timeout_ms(),
            worker_timeout_ms: default_worker_timeout_ms(),
            worker_max_retries: default_worker_max_retries(),
            receipt_cache_max_blocks: default_receipt_cache_max_blocks(),
            stale_backoff_multiplier: default_stale_backoff_multiplier(),
            request_channel_capacity: default_request_channel_capacity(),
            metrics_display: false,
        }
    }
}

// ── Serde default helpers ───────────────────────────────────────────────

fn default_polling_time_ms() -> u64 {
    7_000
}

fn default_status_time_ms() -> u64 {
    60_000
}

fn default_network_timeout_ms() -> u64 {
    10_000
}

fn default_worker_timeout_ms() -> u64 {
    4_000
}

fn default_worker_max_retries() -> u32 {
    6
}

fn default_receipt_cache_max_blocks() -> u64 {
    100
}

fn default_stale_backoff_multiplier() -> u64 {
    2
}

fn default_request_channel_capacity() -> usize {
    1_000
}
