//! Prometheus metrics for the vigil node.
//!
//! The [`NodeMetrics`] struct owns a dedicated [`Registry`] holding the
//! watcher and scheduler metric families, and renders it in the Prometheus
//! text exposition format for whatever endpoint the embedding process exposes.

use prometheus::{Encoder, Registry, TextEncoder};

use vigil_executor::SchedulerMetrics;
use vigil_watcher::WatcherMetrics;

use crate::NodeError;

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,
    pub watcher: WatcherMetrics,
    pub scheduler: SchedulerMetrics,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();
        let watcher = WatcherMetrics::register(&registry)?;
        let scheduler = SchedulerMetrics::register(&registry)?;
        Ok(Self {
            registry,
            watcher,
            scheduler,
        })
    }

    /// Render every registered family in the text exposition format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| NodeError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
