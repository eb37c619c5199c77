//! Scheduler and executor timing parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between processing ticks.
    #[serde(default = "default_processing_time_ms")]
    pub processing_time_ms: u64,

    /// Deadline for the finalized-height query on each tick.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Heights a killed task may keep running before it is force-removed.
    #[serde(default = "default_height_tolerance_before_removing")]
    pub height_tolerance_before_removing: u64,

    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,
}

impl SchedulerConfig {
    pub fn processing_time(&self) -> Duration {
        Duration::from_millis(self.processing_time_ms)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            processing_time_ms: default_processing_time_ms(),
            network_timeout_ms: default_network_timeout_ms(),
            height_tolerance_before_removing: default_height_tolerance_before_removing(),
            request_channel_capacity: default_request_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Fixed delay between attempts after a recoverable task error.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Attempts for `should_execute` before defaulting to "execute".
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Interval between receipt checks while confirming a transaction.
    #[serde(default = "default_polling_time_ms")]
    pub polling_time_ms: u64,
}

impl ExecutorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn polling_time(&self) -> Duration {
        Duration::from_millis(self.polling_time_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            retry_count: default_retry_count(),
            polling_time_ms: default_polling_time_ms(),
        }
    }
}

// ── Serde default helpers ───────────────────────────────────────────────

fn default_processing_time_ms() -> u64 {
    3_000
}

fn default_network_timeout_ms() -> u64 {
    10_000
}

fn default_height_tolerance_before_removing() -> u64 {
    10
}

fn default_request_channel_capacity() -> usize {
    100
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_retry_count() -> u32 {
    10
}

fn default_polling_time_ms() -> u64 {
    1_000
}
