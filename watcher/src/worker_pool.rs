//! Bounded fan-out of receipt lookups.
//!
//! One collection round hands the pool a finite batch of requests. Workers drain a
//! closed request channel; the response channel closes only once every worker has
//! exited, which is the backend's signal that the round is complete.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vigil_layer1::{FeeSuggestion, Layer1Client};
use vigil_types::{Receipt, Transaction, TxHash};

use crate::{MonitoredTransaction, WatcherError};

/// Upper bound on concurrent workers in one round.
pub const MAX_WORKERS: usize = 128;

#[derive(Debug, Clone)]
pub struct MonitorWorkRequest {
    pub txn: MonitoredTransaction,
    pub height: u64,
    pub fees: FeeSuggestion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing to report yet (pending and fresh, or mined but not final).
    Pending,
    Receipt(Receipt),
    /// The stale transaction was resubmitted as this replacement.
    Replaced(Transaction),
    Failed(WatcherError),
}

#[derive(Debug, Clone)]
pub struct MonitorWorkResponse {
    pub hash: TxHash,
    pub outcome: WorkOutcome,
}

/// Number of workers for a round of `queue_len` requests.
pub fn worker_count(queue_len: usize) -> usize {
    (queue_len / 4).clamp(1, MAX_WORKERS)
}

#[derive(Clone)]
pub struct WorkerPool {
    client: Arc<dyn Layer1Client>,
    worker_timeout: Duration,
    max_retries: u32,
    stale_backoff_multiplier: u64,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        client: Arc<dyn Layer1Client>,
        worker_timeout: Duration,
        max_retries: u32,
        stale_backoff_multiplier: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            worker_timeout,
            max_retries,
            stale_backoff_multiplier,
            cancel,
        }
    }

    /// Process every request and return the responses once all workers have exited.
    /// Requests left unprocessed by a timed-out worker produce no response.
    pub async fn execute_work(&self, requests: Vec<MonitorWorkRequest>) -> Vec<MonitorWorkResponse> {
        if requests.is_empty() {
            return Vec::new();
        }
        let workers = worker_count(requests.len());
        let (request_tx, request_rx) = mpsc::channel(requests.len());
        for request in requests {
            // Capacity equals the batch size, so this never waits.
            if request_tx.send(request).await.is_err() {
                break;
            }
        }
        drop(request_tx);

        let request_rx = Arc::new(Mutex::new(request_rx));
        let (response_tx, mut response_rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();
        for id in 0..workers {
            let pool = self.clone();
            let requests = Arc::clone(&request_rx);
            let responses = response_tx.clone();
            set.spawn(async move { pool.run_worker(id, requests, responses).await });
        }
        drop(response_tx);

        let mut responses = Vec::new();
        while let Some(response) = response_rx.recv().await {
            responses.push(response);
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "receipt worker panicked");
            }
        }
        trace!(workers, responses = responses.len(), "receipt round drained");
        responses
    }

    async fn run_worker(
        self,
        id: usize,
        requests: Arc<Mutex<mpsc::Receiver<MonitorWorkRequest>>>,
        responses: mpsc::UnboundedSender<MonitorWorkResponse>,
    ) {
        let work = async {
            loop {
                let next = requests.lock().await.recv().await;
                let Some(request) = next else { break };
                let hash = request.txn.hash();
                let outcome = self.process(&request).await;
                if responses.send(MonitorWorkResponse { hash, outcome }).is_err() {
                    break;
                }
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => trace!(worker = id, "receipt worker cancelled"),
            res = tokio::time::timeout(self.worker_timeout, work) => {
                if res.is_err() {
                    warn!(worker = id, "receipt worker timed out");
                }
            }
        }
    }

    async fn process(&self, request: &MonitorWorkRequest) -> WorkOutcome {
        let mut last = String::new();
        for _ in 0..self.max_retries.max(1) {
            match self.get_receipt(request).await {
                Ok(Some(receipt)) => return WorkOutcome::Receipt(receipt),
                Ok(None) => return WorkOutcome::Pending,
                Err(WatcherError::Recoverable(e)) => last = e,
                Err(WatcherError::TransactionStale(reason)) => {
                    return self.handle_stale(request, reason).await
                }
                Err(e) => return WorkOutcome::Failed(e),
            }
        }
        WorkOutcome::Failed(WatcherError::Recoverable(last))
    }

    /// Replace a stale transaction when allowed; otherwise report it stale.
    async fn handle_stale(&self, request: &MonitorWorkRequest, reason: String) -> WorkOutcome {
        let info = &request.txn;
        if !info.enable_auto_retry || info.from != self.client.default_account() {
            return WorkOutcome::Failed(WatcherError::TransactionStale(reason));
        }
        match self.client.retry_transaction(&info.txn, request.fees).await {
            Ok(replacement) => {
                debug!(
                    tx = %info.hash(),
                    replacement = %replacement.hash(),
                    retry_amount = info.retry_amount,
                    "stale transaction replaced"
                );
                WorkOutcome::Replaced(replacement)
            }
            Err(e) => WorkOutcome::Failed(WatcherError::TransactionStale(format!(
                "{reason}; replacement failed: {e}"
            ))),
        }
    }

    /// `Ok(None)` while there is nothing final to report.
    async fn get_receipt(
        &self,
        request: &MonitorWorkRequest,
    ) -> Result<Option<Receipt>, WatcherError> {
        let info = &request.txn;
        let hash = info.hash();
        let lookup = self
            .client
            .get_transaction_by_hash(&hash)
            .await
            .map_err(WatcherError::from)?;

        if lookup.is_pending {
            let mut max_pending = info.max_stale_blocks.saturating_mul(info.retry_amount + 1);
            if info.retry_amount > 0 {
                max_pending = max_pending.saturating_mul(self.stale_backoff_multiplier);
            }
            let pending_for = request.height.saturating_sub(info.monitoring_height);
            if pending_for >= max_pending {
                return Err(WatcherError::TransactionStale(format!(
                    "{hash} pending for {pending_for} blocks (limit {max_pending})"
                )));
            }
            return Ok(None);
        }

        let receipt = self
            .client
            .get_transaction_receipt(&hash)
            .await
            .map_err(WatcherError::from)?;
        if request.height >= receipt.block_number + self.client.finality_delay() {
            return Ok(Some(receipt));
        }
        Ok(None)
    }
}
