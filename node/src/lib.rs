//! Vigil node: confirms the node's periodic on-chain obligations.
//!
//! The node wires together:
//! - The LMDB state store that survives restarts
//! - The transaction watcher that confirms, and when stale replaces, submitted transactions
//! - The task scheduler that runs window-bound tasks against the finalized height
//! - Logging, metrics and signal-driven shutdown

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::Layer1Node;
pub use shutdown::ShutdownController;
