//! The vigil node: wires storage, the transaction watcher and the task scheduler together.

use std::collections::HashMap;
use std::sync::Arc;

use vigil_executor::{TaskHandler, TaskRegistry};
use vigil_layer1::Layer1Client;
use vigil_store::KvStore;
use vigil_store_lmdb::LmdbEnvironment;
use vigil_types::FuncSelector;
use vigil_watcher::FrontWatcher;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;

/// A running vigil node.
///
/// Tasks are submitted through [`handler`](Self::handler); the watcher is exposed for
/// callers that only need transaction confirmation.
pub struct Layer1Node {
    config: NodeConfig,
    store: Arc<dyn KvStore>,
    watcher: Arc<FrontWatcher>,
    handler: Arc<TaskHandler>,
    metrics: Option<Arc<NodeMetrics>>,
    shutdown: Arc<ShutdownController>,
}

impl Layer1Node {
    /// Open the LMDB environment under `config.data_dir` and build the node on top of it.
    pub fn new(
        config: NodeConfig,
        client: Arc<dyn Layer1Client>,
        registry: TaskRegistry,
    ) -> Result<Self, NodeError> {
        let env = LmdbEnvironment::open(&config.data_dir, config.lmdb_map_size)?;
        tracing::info!(path = %env.path().display(), "opened state store");
        Self::with_store(config, client, Arc::new(env), registry)
    }

    /// Build the node over an existing store. Component state is restored from it.
    pub fn with_store(
        config: NodeConfig,
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        registry: TaskRegistry,
    ) -> Result<Self, NodeError> {
        Self::build(config, client, store, registry, HashMap::new())
    }

    /// Like [`with_store`](Self::with_store), with human readable names for contract
    /// functions used in watcher logs.
    pub fn with_function_signatures(
        config: NodeConfig,
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        registry: TaskRegistry,
        signatures: HashMap<FuncSelector, String>,
    ) -> Result<Self, NodeError> {
        Self::build(config, client, store, registry, signatures)
    }

    fn build(
        config: NodeConfig,
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        registry: TaskRegistry,
        signatures: HashMap<FuncSelector, String>,
    ) -> Result<Self, NodeError> {
        let metrics = if config.enable_metrics {
            Some(Arc::new(NodeMetrics::new()?))
        } else {
            None
        };

        let mut watcher = FrontWatcher::new(Arc::clone(&client), Arc::clone(&store), config.watcher.clone())?
            .with_function_signatures(signatures);
        if let Some(m) = &metrics {
            watcher = watcher.with_metrics(m.watcher.clone());
        }
        let watcher = Arc::new(watcher);

        let mut handler = TaskHandler::new(
            client,
            Arc::clone(&store),
            watcher.clone(),
            registry,
            config.scheduler.clone(),
            config.executor.clone(),
        )?;
        if let Some(m) = &metrics {
            handler = handler.with_metrics(m.scheduler.clone());
        }

        Ok(Self {
            config,
            store,
            watcher,
            handler: Arc::new(handler),
            metrics,
            shutdown: Arc::new(ShutdownController::new()),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn handler(&self) -> Arc<TaskHandler> {
        Arc::clone(&self.handler)
    }

    pub fn watcher(&self) -> Arc<FrontWatcher> {
        Arc::clone(&self.watcher)
    }

    pub fn metrics(&self) -> Option<Arc<NodeMetrics>> {
        self.metrics.clone()
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Launch the watcher backend, then the task manager.
    pub fn start(&self) {
        tracing::info!(
            data_dir = %self.config.data_dir.display(),
            metrics = self.metrics.is_some(),
            "vigil node starting"
        );
        self.watcher.start();
        self.handler.start();
    }

    /// Stop the scheduler first so no task is left waiting on a closed watcher, then the
    /// watcher, then flush the store.
    pub async fn shutdown(&self) {
        tracing::info!("vigil node stopping");
        self.shutdown.shutdown();
        self.handler.close().await;
        self.watcher.close().await;
        if let Err(e) = self.store.sync() {
            tracing::warn!(error = %e, "final store sync failed");
        }
        tracing::info!("vigil node stopped");
    }

    /// Run until SIGINT/SIGTERM or a programmatic shutdown, then stop the node.
    pub async fn run_until_signal(&self) {
        self.start();
        self.shutdown.wait_for_signal().await;
        self.shutdown().await;
    }
}
