//! Prometheus metrics for the transaction watcher.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

#[derive(Clone)]
pub struct WatcherMetrics {
    // ── Gauges ──────────────────────────────────────────────────────────
    /// Transactions currently monitored (all attempts).
    pub monitored_transactions: IntGauge,
    /// Open retry groups.
    pub retry_groups: IntGauge,
    pub receipt_cache_size: IntGauge,

    // ── Counters ────────────────────────────────────────────────────────
    pub receipts: IntCounter,
    /// Stale transactions replaced with a higher fee.
    pub replacements: IntCounter,
    /// Transactions finished as stale.
    pub stale: IntCounter,
    /// Transactions finished as not found.
    pub not_found: IntCounter,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Blocks between the start of monitoring and receipt collection.
    pub confirmation_blocks: Histogram,
}

impl WatcherMetrics {
    /// Create the watcher metrics and register them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let monitored_transactions = register_int_gauge_with_registry!(
            Opts::new(
                "vigil_watcher_monitored_transactions",
                "Transactions currently monitored"
            ),
            registry
        )?;

        let retry_groups = register_int_gauge_with_registry!(
            Opts::new("vigil_watcher_retry_groups", "Open retry groups"),
            registry
        )?;

        let receipt_cache_size = register_int_gauge_with_registry!(
            Opts::new(
                "vigil_watcher_receipt_cache_size",
                "Receipts held in the receipt cache"
            ),
            registry
        )?;

        let receipts = register_int_counter_with_registry!(
            Opts::new("vigil_watcher_receipts_total", "Receipts collected"),
            registry
        )?;

        let replacements = register_int_counter_with_registry!(
            Opts::new(
                "vigil_watcher_replacements_total",
                "Stale transactions replaced with a higher fee"
            ),
            registry
        )?;

        let stale = register_int_counter_with_registry!(
            Opts::new("vigil_watcher_stale_total", "Transactions finished as stale"),
            registry
        )?;

        let not_found = register_int_counter_with_registry!(
            Opts::new(
                "vigil_watcher_not_found_total",
                "Transactions finished as not found"
            ),
            registry
        )?;

        let confirmation_blocks = register_histogram_with_registry!(
            HistogramOpts::new(
                "vigil_watcher_confirmation_blocks",
                "Blocks between monitoring start and receipt collection"
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 10)?),
            registry
        )?;

        Ok(Self {
            monitored_transactions,
            retry_groups,
            receipt_cache_size,
            receipts,
            replacements,
            stale,
            not_found,
            confirmation_blocks,
        })
    }
}
