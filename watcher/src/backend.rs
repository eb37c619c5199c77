//! The watcher backend: sole owner of monitoring state.
//!
//! One loop interleaves subscribe requests, collection ticks and status ticks. Worker
//! results are applied only after a round's fan-in completes, so a request handled
//! between two rounds never observes a half-applied round.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use vigil_layer1::{ClientError, Layer1Client};
use vigil_store::{load_state, persist_state, KvStore, StateKey};
use vigil_types::{FuncSelector, Receipt, Transaction, TxHash};

use crate::worker_pool::{MonitorWorkRequest, MonitorWorkResponse, WorkOutcome, WorkerPool};
use crate::{
    CachedReceipt, MonitoredTransaction, ReceiptResponse, RetryGroup, SubscribeOptions,
    WatcherConfig, WatcherError, WatcherMetrics, WatcherState,
};

/// A subscribe request sent by the front.
pub struct SubscribeRequest {
    pub txn: Transaction,
    pub options: Option<SubscribeOptions>,
    pub reply: oneshot::Sender<Result<ReceiptResponse, WatcherError>>,
}

type Outcome = Result<Receipt, WatcherError>;

pub struct WatcherBackend {
    state: WatcherState,
    client: Arc<dyn Layer1Client>,
    store: Arc<dyn KvStore>,
    pool: WorkerPool,
    config: WatcherConfig,
    function_signatures: HashMap<FuncSelector, String>,
    metrics: Option<WatcherMetrics>,
    cancel: CancellationToken,
}

impl WatcherBackend {
    /// Build a backend, restoring any persisted state. Restored groups get fresh responses.
    pub fn new(
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        config: WatcherConfig,
        cancel: CancellationToken,
    ) -> Result<Self, WatcherError> {
        let state: WatcherState = load_state(store.as_ref(), StateKey::TxWatcher)?.unwrap_or_default();
        if !state.monitored_txns.is_empty() {
            info!(
                monitored = state.monitored_txns.len(),
                groups = state.retry_groups.len(),
                "restored transaction watcher state"
            );
        }
        let pool = WorkerPool::new(
            Arc::clone(&client),
            config.worker_timeout(),
            config.worker_max_retries,
            config.stale_backoff_multiplier,
            cancel.child_token(),
        );
        Ok(Self {
            state,
            client,
            store,
            pool,
            config,
            function_signatures: HashMap::new(),
            metrics: None,
            cancel,
        })
    }

    pub fn with_metrics(mut self, metrics: WatcherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_function_signatures(mut self, signatures: HashMap<FuncSelector, String>) -> Self {
        self.function_signatures = signatures;
        self
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    /// Run until cancelled or until every front handle is dropped.
    pub async fn run(mut self, mut requests: mpsc::Receiver<SubscribeRequest>) {
        let mut polling = tokio::time::interval(self.config.polling_time());
        polling.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = tokio::time::interval(self.config.status_time());
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("transaction watcher backend started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let result = self.queue(request.txn, request.options);
                    if result.is_ok() {
                        self.persist();
                    }
                    if request.reply.send(result).is_err() {
                        debug!("subscriber went away before the reply");
                    }
                }
                _ = polling.tick() => {
                    if let Err(e) = self.collect_receipts().await {
                        debug!(error = %e, "receipt collection skipped");
                    }
                    self.persist();
                }
                _ = status.tick() => self.log_status(),
            }
        }
        self.persist();
        info!("transaction watcher backend stopped");
    }

    /// Register interest in `txn`, reusing an existing group or cached receipt when possible.
    pub fn queue(
        &mut self,
        txn: Transaction,
        options: Option<SubscribeOptions>,
    ) -> Result<ReceiptResponse, WatcherError> {
        let hash = txn.hash();
        let from = self
            .client
            .extract_transaction_sender(&txn)
            .map_err(|e| WatcherError::InvalidMonitorRequest(format!("{hash}: {e}")))?;

        if let Some(cached) = self.state.receipt_cache.get(&hash) {
            trace!(tx = %hash, "receipt served from cache");
            return Ok(ReceiptResponse::resolved(Ok(cached.receipt.clone())));
        }

        if let Some(info) = self.state.monitored_txns.get(&hash) {
            if let Some(group) = self.state.retry_groups.get(&info.retry_group) {
                trace!(tx = %hash, group = %info.retry_group, "already monitored");
                return Ok(group.response());
            }
        }

        if let Some(group) = self.state.retry_groups.get(&hash) {
            trace!(tx = %hash, "subscribed to an existing retry group");
            return Ok(group.response());
        }

        let options = options.unwrap_or_else(|| {
            SubscribeOptions::new(true, self.client.tx_max_stale_blocks())
        });
        let signature = self
            .function_signatures
            .get(&txn.selector())
            .cloned()
            .unwrap_or_default();
        let info = MonitoredTransaction::new(txn, from, signature, hash, options);
        let group = RetryGroup::new(hash);
        let response = group.response();
        debug!(
            tx = %hash,
            from = %from,
            auto_retry = options.enable_auto_retry,
            max_stale_blocks = options.max_stale_blocks,
            "monitoring transaction"
        );
        self.state.monitored_txns.insert(hash, info);
        self.state.retry_groups.insert(hash, group);
        self.update_gauges();
        Ok(response)
    }

    /// Run one collection round against the current head.
    pub async fn collect_receipts(&mut self) -> Result<(), WatcherError> {
        if self.state.monitored_txns.is_empty() && self.state.receipt_cache.is_empty() {
            return Ok(());
        }
        let client = Arc::clone(&self.client);
        let header = self.call(client.get_header_by_number(None)).await?;
        if self.state.last_processed_block == Some(header) {
            trace!(height = header.number, "block already processed");
            return Ok(());
        }
        let height = header.number;

        if !self.state.monitored_txns.is_empty() {
            let fees = self
                .call(client.get_block_base_fee_and_suggested_gas_tip())
                .await?;
            let mut requests = Vec::with_capacity(self.state.monitored_txns.len());
            for info in self.state.monitored_txns.values_mut() {
                if info.monitoring_height == 0 || info.monitoring_height > height {
                    info.monitoring_height = height;
                }
                requests.push(MonitorWorkRequest {
                    txn: info.clone(),
                    height,
                    fees,
                });
            }
            debug!(height, transactions = requests.len(), "collecting receipts");

            let responses = self.pool.execute_work(requests).await;
            let mut finished = Vec::new();
            for response in responses {
                self.handle_worker_response(response, height, &mut finished);
            }
            self.dispatch_finished(finished);
        }

        self.clean_receipt_cache(height);
        self.state.last_processed_block = Some(header);
        self.update_gauges();
        Ok(())
    }

    fn handle_worker_response(
        &mut self,
        response: MonitorWorkResponse,
        height: u64,
        finished: &mut Vec<(TxHash, Outcome)>,
    ) {
        let hash = response.hash;
        let not_found_limit = self.client.tx_not_found_max_blocks();
        let Some(info) = self.state.monitored_txns.get_mut(&hash) else {
            return;
        };
        match response.outcome {
            WorkOutcome::Pending => trace!(tx = %hash, height, "no receipt yet"),
            WorkOutcome::Failed(WatcherError::Recoverable(e)) => {
                trace!(tx = %hash, error = %e, "recoverable error, retrying next block")
            }
            WorkOutcome::Failed(WatcherError::TxNotFound(e)) => {
                // Rounds run once per block, so this approximates blocks without a sighting.
                info.not_found_blocks += 1;
                if info.not_found_blocks >= not_found_limit {
                    debug!(tx = %hash, attempts = info.not_found_blocks, "giving up on transaction");
                    if let Some(m) = &self.metrics {
                        m.not_found.inc();
                    }
                    finished.push((hash, Err(WatcherError::TxNotFound(e))));
                } else {
                    trace!(tx = %hash, attempts = info.not_found_blocks, "transaction not found");
                }
            }
            WorkOutcome::Failed(e) => {
                debug!(tx = %hash, auto_retry = info.enable_auto_retry, error = %e, "transaction finished with error");
                if e.is_stale() {
                    if let Some(m) = &self.metrics {
                        m.stale.inc();
                    }
                }
                finished.push((hash, Err(e)));
            }
            WorkOutcome::Replaced(replacement) => {
                let next = info.replaced_by(replacement);
                info.monitoring_height = 0;
                info.retry_amount += 1;
                let next_hash = next.hash();
                let group_id = next.retry_group;
                if let Some(group) = self.state.retry_groups.get_mut(&group_id) {
                    group.add(next_hash);
                }
                debug!(tx = %hash, replacement = %next_hash, group = %group_id, "monitoring replacement");
                self.state.monitored_txns.insert(next_hash, next);
                if let Some(m) = &self.metrics {
                    m.replacements.inc();
                }
            }
            WorkOutcome::Receipt(receipt) => {
                debug!(tx = %hash, mined = receipt.block_number, height, "receipt collected");
                let cached = CachedReceipt {
                    receipt: receipt.clone(),
                    retrieved_at_height: height,
                };
                self.state.receipt_cache.insert(info.retry_group, cached.clone());
                self.state.receipt_cache.insert(hash, cached);
                if let Some(m) = &self.metrics {
                    m.receipts.inc();
                    m.confirmation_blocks
                        .observe(height.saturating_sub(info.monitoring_height) as f64);
                }
                finished.push((hash, Ok(receipt)));
            }
        }
    }

    /// Deliver outcomes and stop monitoring finished transactions. Once a group has a
    /// receipt, its other attempts can no longer be mined and are dropped with it.
    fn dispatch_finished(&mut self, finished: Vec<(TxHash, Outcome)>) {
        for (hash, outcome) in finished {
            let Some(info) = self.state.monitored_txns.remove(&hash) else {
                continue;
            };
            let group_id = info.retry_group;
            if let Ok(receipt) = &outcome {
                self.state
                    .aggregates
                    .entry(info.selector)
                    .or_default()
                    .record(receipt);
            }
            let Some(group) = self.state.retry_groups.get_mut(&group_id) else {
                debug!(tx = %hash, group = %group_id, "no retry group for finished transaction");
                continue;
            };
            let resolved = outcome.is_ok();
            group.deliver(outcome);
            group.remove(&hash);
            if resolved {
                for sibling in group.members().to_vec() {
                    trace!(tx = %sibling, group = %group_id, "dropping superseded attempt");
                    self.state.monitored_txns.remove(&sibling);
                    group.remove(&sibling);
                }
            }
            if group.is_empty() {
                trace!(group = %group_id, "retry group closed");
                self.state.retry_groups.remove(&group_id);
            }
        }
    }

    /// Evict receipts older than the cache TTL. Receipts restored from disk (height 0) or
    /// retrieved above the current head (re-org) restart their TTL at `height`.
    pub fn clean_receipt_cache(&mut self, height: u64) {
        let ttl = self.config.receipt_cache_max_blocks;
        self.state.receipt_cache.retain(|hash, cached| {
            if cached.retrieved_at_height == 0 || cached.retrieved_at_height > height {
                cached.retrieved_at_height = height;
            }
            let keep = height < cached.retrieved_at_height + ttl;
            if !keep {
                trace!(tx = %hash, "receipt evicted from cache");
            }
            keep
        });
    }

    fn log_status(&self) {
        info!(
            monitored = self.state.monitored_txns.len(),
            groups = self.state.retry_groups.len(),
            cached_receipts = self.state.receipt_cache.len(),
            "transaction watcher status"
        );
        if !self.config.metrics_display {
            return;
        }
        for (selector, profile) in &self.state.aggregates {
            let signature = self
                .function_signatures
                .get(selector)
                .map(String::as_str)
                .unwrap_or("unknown");
            info!(
                selector = %selector,
                function = signature,
                average_gas = profile.average_gas,
                minimum_gas = profile.minimum_gas,
                maximum_gas = profile.maximum_gas,
                total_count = profile.total_count,
                total_success = profile.total_success,
                "gas profile"
            );
        }
    }

    fn persist(&self) {
        if let Err(e) = persist_state(self.store.as_ref(), StateKey::TxWatcher, &self.state) {
            error!(error = %e, "failed to persist transaction watcher state");
        }
    }

    fn update_gauges(&self) {
        if let Some(m) = &self.metrics {
            m.monitored_transactions
                .set(self.state.monitored_txns.len() as i64);
            m.retry_groups.set(self.state.retry_groups.len() as i64);
            m.receipt_cache_size.set(self.state.receipt_cache.len() as i64);
        }
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, WatcherError> {
        match tokio::time::timeout(self.config.network_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(error = %e, "layer-1 call failed");
                Err(WatcherError::Recoverable(e.to_string()))
            }
            Err(_) => Err(WatcherError::Recoverable("layer-1 call timed out".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_nullables::{NullClient, NullStore};
    use vigil_types::{Address, ReceiptStatus};

    const ME: Address = Address::ZERO;

    fn backend(client: Arc<NullClient>, store: Arc<NullStore>) -> WatcherBackend {
        WatcherBackend::new(
            client,
            store,
            WatcherConfig::default(),
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn txn(nonce: u64) -> Transaction {
        Transaction::new(ME, None, nonce, vec![0xa9, 0x05, 0x9c, 0xbb]).with_fees(20, 2)
    }

    #[tokio::test]
    async fn subscribing_twice_shares_the_response() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client, Arc::new(NullStore::new()));
        let t = txn(0);
        let first = b.queue(t.clone(), None).unwrap();
        let second = b.queue(t, None).unwrap();
        assert!(first.same_as(&second));
        assert_eq!(b.state().monitored_txns.len(), 1);
        assert_eq!(b.state().retry_groups.len(), 1);
    }

    #[tokio::test]
    async fn default_options_come_from_client() {
        let client = Arc::new(NullClient::new(ME).with_tx_max_stale_blocks(9));
        let mut b = backend(client, Arc::new(NullStore::new()));
        let t = txn(0);
        b.queue(t.clone(), None).unwrap();
        let info = &b.state().monitored_txns[&t.hash()];
        assert!(info.enable_auto_retry);
        assert_eq!(info.max_stale_blocks, 9);
    }

    #[tokio::test]
    async fn invalid_sender_is_rejected() {
        let client = Arc::new(NullClient::new(ME));
        client.set_sender_recovery_fails(true);
        let mut b = backend(client, Arc::new(NullStore::new()));
        let err = b.queue(txn(0), None).unwrap_err();
        assert!(matches!(err, WatcherError::InvalidMonitorRequest(_)));
        assert!(b.state().monitored_txns.is_empty());
    }

    #[tokio::test]
    async fn receipt_resolves_and_is_cached() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client.clone(), Arc::new(NullStore::new()));
        let t = txn(0);
        client.add_pending(t.clone());
        client.set_height(10);
        let response = b.queue(t.clone(), None).unwrap();

        client.mine(&t.hash(), ReceiptStatus::Successful);
        client.set_height(11);
        b.collect_receipts().await.unwrap();

        let receipt = response.try_get().unwrap().unwrap();
        assert_eq!(receipt.transaction_hash, t.hash());
        assert!(b.state().monitored_txns.is_empty());
        assert!(b.state().retry_groups.is_empty());
        assert_eq!(b.state().aggregates[&t.selector()].total_count, 1);

        let again = b.queue(t, None).unwrap();
        assert_eq!(again.try_get(), Some(Ok(receipt)));
    }

    #[tokio::test]
    async fn same_block_is_processed_once() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client.clone(), Arc::new(NullStore::new()));
        let t = txn(0);
        client.add_pending(t.clone());
        client.set_height(10);
        b.queue(t, None).unwrap();

        b.collect_receipts().await.unwrap();
        let lookups = client.lookups();
        b.collect_receipts().await.unwrap();
        assert_eq!(client.lookups(), lookups);
    }

    #[tokio::test]
    async fn not_found_threshold_finishes_transaction() {
        let client = Arc::new(NullClient::new(ME).with_tx_not_found_max_blocks(3));
        let mut b = backend(client.clone(), Arc::new(NullStore::new()));
        let t = txn(0);
        let response = b.queue(t, None).unwrap();

        for height in 1..=2 {
            client.set_height(height);
            b.collect_receipts().await.unwrap();
            assert!(!response.is_ready());
        }
        client.set_height(3);
        b.collect_receipts().await.unwrap();
        assert!(matches!(
            response.try_get(),
            Some(Err(WatcherError::TxNotFound(_)))
        ));
        assert!(b.state().monitored_txns.is_empty());
    }

    #[tokio::test]
    async fn stale_transaction_is_replaced_within_its_group() {
        let client = Arc::new(NullClient::new(ME).with_tx_max_stale_blocks(2));
        let mut b = backend(client.clone(), Arc::new(NullStore::new()));
        let t = txn(0);
        client.add_pending(t.clone());
        client.set_height(10);
        let response = b.queue(t.clone(), None).unwrap();

        b.collect_receipts().await.unwrap();
        client.set_height(12);
        b.collect_receipts().await.unwrap();

        let replacements = client.replacements();
        assert_eq!(replacements.len(), 1);
        let replacement = replacements[0].1;
        let group = &b.state().retry_groups[&t.hash()];
        assert_eq!(group.members().len(), 2);
        assert_eq!(b.state().monitored_txns[&replacement].retry_amount, 1);
        assert_eq!(b.state().monitored_txns[&t.hash()].retry_amount, 1);
        assert!(!response.is_ready());

        // Subscribing the replacement joins the same group.
        let joined = b.queue(client_txn(&b, &replacement), None).unwrap();
        assert!(joined.same_as(&response));

        client.mine(&replacement, ReceiptStatus::Successful);
        client.set_height(13);
        b.collect_receipts().await.unwrap();
        let receipt = response.try_get().unwrap().unwrap();
        assert_eq!(receipt.transaction_hash, replacement);
        assert!(b.state().monitored_txns.is_empty());
        assert!(b.state().retry_groups.is_empty());
    }

    fn client_txn(b: &WatcherBackend, hash: &TxHash) -> Transaction {
        b.state().monitored_txns[hash].txn.clone()
    }

    #[tokio::test]
    async fn stale_without_auto_retry_surfaces_error() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client.clone(), Arc::new(NullStore::new()));
        let t = txn(0);
        client.add_pending(t.clone());
        client.set_height(10);
        let response = b
            .queue(t, Some(SubscribeOptions::new(false, 2)))
            .unwrap();

        b.collect_receipts().await.unwrap();
        client.set_height(12);
        b.collect_receipts().await.unwrap();
        assert!(matches!(
            response.try_get(),
            Some(Err(WatcherError::TransactionStale(_)))
        ));
        assert!(client.replacements().is_empty());
    }

    #[tokio::test]
    async fn recoverable_errors_keep_monitoring() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client.clone(), Arc::new(NullStore::new()));
        let t = txn(0);
        client.add_pending(t.clone());
        client.set_height(10);
        let response = b.queue(t, None).unwrap();

        client.set_network_down(true);
        assert!(b.collect_receipts().await.is_err());
        assert!(!response.is_ready());
        assert_eq!(b.state().monitored_txns.len(), 1);
    }

    #[tokio::test]
    async fn receipt_cache_respects_ttl() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client, Arc::new(NullStore::new()));
        let hash = TxHash::new([5; 32]);
        b.state.receipt_cache.insert(
            hash,
            CachedReceipt {
                receipt: Receipt {
                    transaction_hash: hash,
                    block_number: 1,
                    block_hash: Default::default(),
                    gas_used: 1,
                    status: ReceiptStatus::Successful,
                },
                retrieved_at_height: 100,
            },
        );
        let ttl = b.config.receipt_cache_max_blocks;

        b.clean_receipt_cache(100 + ttl - 1);
        assert!(b.state().receipt_cache.contains_key(&hash));
        b.clean_receipt_cache(100 + ttl);
        assert!(!b.state().receipt_cache.contains_key(&hash));
    }

    #[tokio::test]
    async fn restored_receipts_restart_their_ttl() {
        let client = Arc::new(NullClient::new(ME));
        let mut b = backend(client, Arc::new(NullStore::new()));
        let hash = TxHash::new([6; 32]);
        b.state.receipt_cache.insert(
            hash,
            CachedReceipt {
                receipt: Receipt {
                    transaction_hash: hash,
                    block_number: 1,
                    block_hash: Default::default(),
                    gas_used: 1,
                    status: ReceiptStatus::Successful,
                },
                retrieved_at_height: 0,
            },
        );
        b.clean_receipt_cache(500);
        assert_eq!(b.state().receipt_cache[&hash].retrieved_at_height, 500);
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let client = Arc::new(NullClient::new(ME));
        let store = Arc::new(NullStore::new());
        let t = txn(0);
        {
            let mut b = backend(client.clone(), store.clone());
            b.queue(t.clone(), None).unwrap();
            b.persist();
        }
        let mut b = backend(client, store);
        assert!(b.state().monitored_txns.contains_key(&t.hash()));
        let response = b.queue(t, None).unwrap();
        assert!(!response.is_ready());
    }
}
