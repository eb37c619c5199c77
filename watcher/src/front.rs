//! Client-facing side of the transaction watcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_layer1::Layer1Client;
use vigil_store::KvStore;
use vigil_types::{FuncSelector, Receipt, Transaction};

use crate::backend::{SubscribeRequest, WatcherBackend};
use crate::{ReceiptResponse, SubscribeOptions, WatcherConfig, WatcherError, WatcherMetrics};

/// Structs that implement this trait confirm transactions on behalf of callers.
#[async_trait]
pub trait Watcher: Send + Sync + 'static {
    /// Start monitoring `txn`. The returned response is shared by every attempt at the
    /// same logical transaction. `None` options use auto-retry with the client's stale limit.
    async fn subscribe(
        &self,
        txn: Transaction,
        options: Option<SubscribeOptions>,
    ) -> Result<ReceiptResponse, WatcherError>;

    /// Subscribe and wait for the outcome.
    async fn subscribe_and_wait(
        &self,
        txn: Transaction,
        options: Option<SubscribeOptions>,
    ) -> Result<Receipt, WatcherError>;
}

type PendingBackend = (WatcherBackend, mpsc::Receiver<SubscribeRequest>);

pub struct FrontWatcher {
    requests: mpsc::Sender<SubscribeRequest>,
    backend: Mutex<Option<PendingBackend>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl FrontWatcher {
    /// Build the watcher, restoring the backend state from `store`.
    pub fn new(
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        config: WatcherConfig,
    ) -> Result<Self, WatcherError> {
        let cancel = CancellationToken::new();
        let (requests, receiver) = mpsc::channel(config.request_channel_capacity.max(1));
        let backend = WatcherBackend::new(client, store, config, cancel.clone())?;
        Ok(Self {
            requests,
            backend: Mutex::new(Some((backend, receiver))),
            handle: Mutex::new(None),
            cancel,
        })
    }

    pub fn with_metrics(self, metrics: WatcherMetrics) -> Self {
        self.map_backend(|backend| backend.with_metrics(metrics))
    }

    /// Human readable signatures used in logs and monitoring entries.
    pub fn with_function_signatures(self, signatures: HashMap<FuncSelector, String>) -> Self {
        self.map_backend(|backend| backend.with_function_signatures(signatures))
    }

    fn map_backend(self, f: impl FnOnce(WatcherBackend) -> WatcherBackend) -> Self {
        let pending = self.backend.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((backend, receiver)) = pending {
            *self.backend.lock().unwrap_or_else(|e| e.into_inner()) = Some((f(backend), receiver));
        }
        self
    }

    /// Spawn the backend loop. Calling it again is a no-op.
    pub fn start(&self) {
        let pending = self.backend.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some((backend, receiver)) = pending else {
            warn!("transaction watcher already started");
            return;
        };
        let handle = tokio::spawn(backend.run(receiver));
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("transaction watcher started");
    }

    /// Stop the backend and wait for its final persist.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "transaction watcher backend panicked");
            }
        }
        info!("transaction watcher closed");
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl Watcher for FrontWatcher {
    async fn subscribe(
        &self,
        txn: Transaction,
        options: Option<SubscribeOptions>,
    ) -> Result<ReceiptResponse, WatcherError> {
        if self.cancel.is_cancelled() {
            return Err(WatcherError::Closed);
        }
        let (reply, response) = oneshot::channel();
        let request = SubscribeRequest {
            txn,
            options,
            reply,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(WatcherError::Closed),
            sent = self.requests.send(request) => sent.map_err(|_| WatcherError::Closed)?,
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(WatcherError::Closed),
            reply = response => reply.map_err(|_| WatcherError::Closed)?,
        }
    }

    async fn subscribe_and_wait(
        &self,
        txn: Transaction,
        options: Option<SubscribeOptions>,
    ) -> Result<Receipt, WatcherError> {
        let response = self.subscribe(txn, options).await?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(WatcherError::Closed),
            outcome = response.get() => outcome,
        }
    }
}
