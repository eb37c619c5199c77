//! Transaction watcher.
//!
//! Callers subscribe signed transactions through the [`Watcher`] front and receive a
//! [`ReceiptResponse`] shared by every attempt at the same logical transaction. A single
//! backend loop owns all monitoring state; each new block it fans receipt lookups out to a
//! worker pool, replaces stale transactions and resolves responses.

pub mod backend;
pub mod config;
pub mod error;
pub mod front;
pub mod metrics;
pub mod monitor;
pub mod worker_pool;

pub use config::WatcherConfig;
pub use error::WatcherError;
pub use front::{FrontWatcher, Watcher};
pub use metrics::WatcherMetrics;
pub use monitor::{
    CachedReceipt, GasProfile, MonitoredTransaction, ReceiptResponse, RetryGroup,
    SubscribeOptions, WatcherState,
};
