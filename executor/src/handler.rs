//! Client-facing side of the task scheduler.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_layer1::Layer1Client;
use vigil_store::KvStore;
use vigil_watcher::Watcher;

use crate::manager::{ManagerRequest, TaskManager};
use crate::{
    ExecutorConfig, SchedulerConfig, SchedulerError, SchedulerMetrics, Task, TaskExecutor,
    TaskRegistry, TaskResponse,
};

type PendingManager = (TaskManager, mpsc::Receiver<ManagerRequest>);

pub struct TaskHandler {
    requests: mpsc::Sender<ManagerRequest>,
    manager: Mutex<Option<PendingManager>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    executor: Arc<TaskExecutor>,
    cancel: CancellationToken,
}

impl TaskHandler {
    /// Build the handler, restoring the schedule and transaction backups from `store`.
    pub fn new(
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        watcher: Arc<dyn Watcher>,
        registry: TaskRegistry,
        scheduler: SchedulerConfig,
        executor: ExecutorConfig,
    ) -> Result<Self, SchedulerError> {
        let cancel = CancellationToken::new();
        let executor = Arc::new(
            TaskExecutor::new(watcher, Arc::clone(&store), executor)
                .map_err(|e| SchedulerError::Store(e.to_string()))?,
        );
        let (requests, receiver) = mpsc::channel(scheduler.request_channel_capacity.max(1));
        let manager = TaskManager::new(
            client,
            store,
            Arc::clone(&executor),
            Arc::new(registry),
            scheduler,
            cancel.clone(),
        )?;
        Ok(Self {
            requests,
            manager: Mutex::new(Some((manager, receiver))),
            handle: Mutex::new(None),
            executor,
            cancel,
        })
    }

    pub fn with_metrics(self, metrics: SchedulerMetrics) -> Self {
        let pending = self.manager.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((manager, receiver)) = pending {
            *self.manager.lock().unwrap_or_else(|e| e.into_inner()) =
                Some((manager.with_metrics(metrics), receiver));
        }
        self
    }

    /// Spawn the manager loop. Calling it again is a no-op.
    pub fn start(&self) {
        let pending = self.manager.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some((manager, receiver)) = pending else {
            warn!("task handler already started");
            return;
        };
        let handle = tokio::spawn(manager.run(receiver));
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("task handler started");
    }

    /// Stop the manager and the executor, then wait for the final persist.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.executor.close();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "task manager panicked");
            }
        }
        info!("task handler closed");
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Schedule `task` under `id` (random when `None`). The response resolves once the
    /// task finishes, is killed, or is dropped for expiry.
    pub async fn schedule_task(
        &self,
        task: Option<Box<dyn Task>>,
        id: Option<String>,
    ) -> Result<TaskResponse, SchedulerError> {
        let task = task.ok_or(SchedulerError::TaskIsNil)?;
        self.call(|reply| ManagerRequest::Schedule { task, id, reply })
            .await?
    }

    /// Kill every scheduled task of `kind`.
    pub async fn kill_task_by_type(&self, kind: &str) -> Result<(), SchedulerError> {
        let kind = kind.to_string();
        self.call(|reply| ManagerRequest::KillByType { kind, reply })
            .await?
    }

    pub async fn kill_task_by_id(&self, id: &str) -> Result<(), SchedulerError> {
        if id.is_empty() {
            return Err(SchedulerError::TaskIdEmpty);
        }
        let id = id.to_string();
        self.call(|reply| ManagerRequest::KillById { id, reply })
            .await?
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> ManagerRequest,
    ) -> Result<T, SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Closed);
        }
        let (reply, response) = oneshot::channel();
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(SchedulerError::Closed),
            sent = self.requests.send(request(reply)) => sent.map_err(|_| SchedulerError::Closed)?,
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SchedulerError::Closed),
            reply = response => reply.map_err(|_| SchedulerError::Closed),
        }
    }
}
