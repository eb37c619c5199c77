//! The task manager loop: sole owner of the schedule.
//!
//! Schedule and kill requests, finish notifications from running tasks and processing
//! ticks are all handled on one loop, so the schedule never needs a lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vigil_layer1::Layer1Client;
use vigil_store::{load_state, persist_state, KvStore, StateKey};

use crate::state::{plan_tick, EntryView, ManagerState, ScheduledEntry, StoredEntry};
use crate::{
    InternalTaskState, SchedulerConfig, SchedulerError, SchedulerMetrics, Task, TaskDependencies,
    TaskError, TaskExecutor, TaskFinished, TaskRegistry, TaskResponse,
};

/// A request sent by the handler.
pub enum ManagerRequest {
    Schedule {
        task: Box<dyn Task>,
        id: Option<String>,
        reply: oneshot::Sender<Result<TaskResponse, SchedulerError>>,
    },
    KillByType {
        kind: String,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    KillById {
        id: String,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
}

pub struct TaskManager {
    schedule: HashMap<String, ScheduledEntry>,
    last_height_seen: u64,
    registry: Arc<TaskRegistry>,
    executor: Arc<TaskExecutor>,
    client: Arc<dyn Layer1Client>,
    store: Arc<dyn KvStore>,
    config: SchedulerConfig,
    finished_tx: mpsc::UnboundedSender<TaskFinished>,
    finished_rx: mpsc::UnboundedReceiver<TaskFinished>,
    executions: JoinSet<()>,
    metrics: Option<SchedulerMetrics>,
    cancel: CancellationToken,
}

impl TaskManager {
    /// Build a manager, restoring the persisted schedule.
    ///
    /// Entries that were running when the node stopped go back to `NotStarted`. Killed
    /// entries are dropped. Entries whose task can no longer be decoded are skipped.
    pub fn new(
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        executor: Arc<TaskExecutor>,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, SchedulerError> {
        let stored: ManagerState =
            load_state(store.as_ref(), StateKey::TaskManager)?.unwrap_or_default();

        let mut schedule = HashMap::with_capacity(stored.schedule.len());
        for (id, entry) in stored.schedule {
            if entry.state == InternalTaskState::Killed {
                debug!(%id, "dropping killed task from restored schedule");
                continue;
            }
            let task = match registry.unwrap_task(&entry.task) {
                Ok(task) => task,
                Err(e) => {
                    error!(%id, error = %e, "failed to restore task");
                    continue;
                }
            };
            let mut restored = ScheduledEntry::new(Arc::from(task));
            restored.id = entry.id;
            restored.name = entry.name;
            schedule.insert(id, restored);
        }
        if !schedule.is_empty() {
            info!(
                tasks = schedule.len(),
                last_height_seen = stored.last_height_seen,
                "restored task schedule"
            );
        }

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Ok(Self {
            schedule,
            last_height_seen: stored.last_height_seen,
            registry,
            executor,
            client,
            store,
            config,
            finished_tx,
            finished_rx,
            executions: JoinSet::new(),
            metrics: None,
            cancel,
        })
    }

    pub fn with_metrics(mut self, metrics: SchedulerMetrics) -> Self {
        self.metrics = Some(metrics);
        self.update_gauges();
        self
    }

    pub fn last_height_seen(&self) -> u64 {
        self.last_height_seen
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn task_state(&self, id: &str) -> Option<InternalTaskState> {
        self.schedule.get(id).map(|entry| entry.state)
    }

    /// Run until cancelled or until the handler goes away.
    pub async fn run(mut self, mut requests: mpsc::Receiver<ManagerRequest>) {
        let mut processing = tokio::time::interval(self.config.processing_time());
        processing.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("task manager started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    self.handle_request(request);
                }
                Some(finished) = self.finished_rx.recv() => self.on_task_finished(finished),
                _ = processing.tick() => self.process_tick().await,
            }
        }
        self.shutdown().await;
    }

    fn handle_request(&mut self, request: ManagerRequest) {
        match request {
            ManagerRequest::Schedule { task, id, reply } => {
                let result = self.schedule(task, id);
                if reply.send(result).is_err() {
                    debug!("scheduler went away before the reply");
                }
            }
            ManagerRequest::KillByType { kind, reply } => {
                let result = self.kill_by_type(&kind);
                if reply.send(result).is_err() {
                    debug!("killer went away before the reply");
                }
            }
            ManagerRequest::KillById { id, reply } => {
                let result = self.kill_by_id(&id);
                if reply.send(result).is_err() {
                    debug!("killer went away before the reply");
                }
            }
        }
    }

    /// Validate and insert `task`. A `None` or empty `id` gets a random one; an id that is
    /// already scheduled returns the existing response.
    pub fn schedule(
        &mut self,
        mut task: Box<dyn Task>,
        id: Option<String>,
    ) -> Result<TaskResponse, SchedulerError> {
        let kind = task.kind();
        if !self.registry.contains(kind) {
            return Err(SchedulerError::TypeNotRegistered(kind.to_string()));
        }
        let (start, end) = (task.base().start(), task.base().end());
        if start != 0 && end != 0 && start >= end {
            return Err(SchedulerError::WrongParams { start, end });
        }
        if end != 0 && end <= self.last_height_seen {
            return Err(SchedulerError::Expired {
                end,
                last_height_seen: self.last_height_seen,
            });
        }

        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        if let Some(existing) = self.schedule.get(&id) {
            debug!(%id, "task already scheduled");
            return Ok(existing.response.clone());
        }

        if !task.base().allow_multi_execution()
            && self
                .schedule
                .values()
                .any(|e| e.name == kind && e.state == InternalTaskState::Running)
        {
            return Err(SchedulerError::NotAllowedMultiExecution(kind.to_string()));
        }

        task.base_mut().assign(id.clone(), kind);
        // Reject what cannot be persisted before the caller is told it is scheduled.
        self.registry.wrap_task(task.as_ref())?;
        let entry = ScheduledEntry::new(Arc::from(task));
        let response = entry.response.clone();
        self.schedule.insert(id.clone(), entry);
        if let Err(e) = self.persist() {
            self.schedule.remove(&id);
            return Err(e);
        }

        info!(%id, name = kind, start, end, "task scheduled");
        self.update_gauges();
        Ok(response)
    }

    pub fn kill_by_type(&mut self, kind: &str) -> Result<(), SchedulerError> {
        if !self.registry.contains(kind) {
            return Err(SchedulerError::TypeNotRegistered(kind.to_string()));
        }
        let ids: Vec<String> = self
            .schedule
            .values()
            .filter(|e| e.name == kind)
            .map(|e| e.id.clone())
            .collect();
        if ids.is_empty() {
            debug!(kind, "no scheduled tasks of this type");
            return Ok(());
        }
        for id in &ids {
            self.kill_entry(id);
        }
        self.persist_or_log();
        self.update_gauges();
        Ok(())
    }

    pub fn kill_by_id(&mut self, id: &str) -> Result<(), SchedulerError> {
        if id.is_empty() {
            return Err(SchedulerError::TaskIdEmpty);
        }
        if !self.schedule.contains_key(id) {
            return Err(SchedulerError::NotScheduled(id.to_string()));
        }
        self.kill_entry(id);
        self.persist_or_log();
        self.update_gauges();
        Ok(())
    }

    /// Remove a task that never started, or signal a running one to stop.
    fn kill_entry(&mut self, id: &str) {
        let Some(entry) = self.schedule.get_mut(id) else {
            return;
        };
        match entry.state {
            InternalTaskState::NotStarted => {
                if let Some(entry) = self.schedule.remove(id) {
                    entry.response.write(Err(TaskError::KilledBeforeExecution));
                    info!(%id, name = %entry.name, "task removed before execution");
                    self.count_kill();
                }
            }
            InternalTaskState::Running => {
                entry.task.close();
                entry.state = InternalTaskState::Killed;
                entry.killed_at = self.last_height_seen;
                info!(%id, name = %entry.name, killed_at = entry.killed_at, "task killed");
                self.count_kill();
            }
            InternalTaskState::Killed => debug!(%id, "task already killed"),
        }
    }

    async fn process_tick(&mut self) {
        while self.executions.try_join_next().is_some() {}

        let height = match tokio::time::timeout(
            self.config.network_timeout(),
            self.client.get_finalized_height(),
        )
        .await
        {
            Ok(Ok(height)) => height,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to get finalized height");
                return;
            }
            Err(_) => {
                warn!("timed out getting finalized height");
                return;
            }
        };
        self.last_height_seen = height;

        let plan = {
            let views: Vec<EntryView<'_>> = self.schedule.values().map(ScheduledEntry::view).collect();
            plan_tick(&views, height, self.config.height_tolerance_before_removing)
        };

        for id in &plan.skipped {
            debug!(%id, height, "task held back, another of its type is running");
        }
        for id in &plan.to_start {
            self.start_task(id);
        }
        for id in &plan.expired {
            debug!(%id, height, "task window ended");
            self.kill_entry(id);
        }
        for id in &plan.unresponsive {
            if let Some(entry) = self.schedule.remove(id) {
                warn!(%id, name = %entry.name, killed_at = entry.killed_at, height, "removing unresponsive task");
                entry.response.write(Err(TaskError::Killed));
            }
        }

        self.persist_or_log();
        self.update_gauges();
    }

    fn start_task(&mut self, id: &str) {
        let Some(entry) = self.schedule.get_mut(id) else {
            return;
        };
        entry.state = InternalTaskState::Running;
        let deps = TaskDependencies::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            self.finished_tx.clone(),
        );
        let execution = Arc::clone(&self.executor).handle_task_execution(Arc::clone(&entry.task), deps);
        self.executions.spawn(execution);
        info!(%id, name = %entry.name, height = self.last_height_seen, "task started");
        if let Some(m) = &self.metrics {
            m.tasks_started.inc();
        }
    }

    fn on_task_finished(&mut self, finished: TaskFinished) {
        let Some(entry) = self.schedule.remove(&finished.id) else {
            debug!(id = %finished.id, "finished task no longer scheduled");
            return;
        };
        if let Some(m) = &self.metrics {
            match &finished.result {
                Ok(()) => m.tasks_succeeded.inc(),
                Err(TaskError::Killed) => {}
                Err(_) => m.tasks_failed.inc(),
            }
        }
        debug!(id = %finished.id, name = %entry.name, "task removed from schedule");
        entry.response.write(finished.result);
        self.persist_or_log();
        self.update_gauges();
    }

    async fn shutdown(&mut self) {
        self.executor.close();
        let deadline = self.config.network_timeout();
        let executions = &mut self.executions;
        let drain = async move { while executions.join_next().await.is_some() {} };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("running tasks did not stop in time");
            self.executions.abort_all();
        }
        self.persist_or_log();
        info!(tasks = self.schedule.len(), "task manager stopped");
    }

    fn persist(&self) -> Result<(), SchedulerError> {
        let mut state = ManagerState {
            schedule: HashMap::with_capacity(self.schedule.len()),
            last_height_seen: self.last_height_seen,
        };
        for (id, entry) in &self.schedule {
            let task = self.registry.wrap_task(entry.task.as_ref())?;
            state.schedule.insert(
                id.clone(),
                StoredEntry {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    start: entry.start,
                    end: entry.end,
                    allow_multi_execution: entry.allow_multi_execution,
                    state: entry.state,
                    killed_at: entry.killed_at,
                    task,
                },
            );
        }
        persist_state(self.store.as_ref(), StateKey::TaskManager, &state)?;
        Ok(())
    }

    fn persist_or_log(&self) {
        if let Err(e) = self.persist() {
            error!(error = %e, "failed to persist task schedule");
        }
    }

    fn count_kill(&self) {
        if let Some(m) = &self.metrics {
            m.tasks_killed.inc();
        }
    }

    fn update_gauges(&self) {
        let Some(m) = &self.metrics else { return };
        let running = self
            .schedule
            .values()
            .filter(|e| e.state == InternalTaskState::Running)
            .count();
        m.scheduled_tasks.set(self.schedule.len() as i64);
        m.running_tasks.set(running as i64);
    }
}
