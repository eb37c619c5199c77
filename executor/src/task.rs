//! The task contract and the state every task embeds.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Span};

use vigil_layer1::Layer1Client;
use vigil_store::KvStore;
use vigil_types::Transaction;
use vigil_utils::SharedResponse;
use vigil_watcher::SubscribeOptions;

use crate::{TaskErr, TaskError};

pub type TaskResult = Result<(), TaskError>;

/// Write-once outcome handed back to whoever scheduled the task.
pub type TaskResponse = SharedResponse<TaskResult>;

/// Sent by a task when it finishes, consumed by the manager loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFinished {
    pub id: String,
    pub result: TaskResult,
}

/// Services handed to a task right before its first phase runs.
#[derive(Clone)]
pub struct TaskDependencies {
    pub client: Arc<dyn Layer1Client>,
    pub store: Arc<dyn KvStore>,
    finished: mpsc::UnboundedSender<TaskFinished>,
}

impl TaskDependencies {
    pub fn new(
        client: Arc<dyn Layer1Client>,
        store: Arc<dyn KvStore>,
        finished: mpsc::UnboundedSender<TaskFinished>,
    ) -> Self {
        Self {
            client,
            store,
            finished,
        }
    }
}

impl fmt::Debug for TaskDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDependencies").finish_non_exhaustive()
    }
}

/// Scheduling metadata and runtime plumbing shared by all tasks.
///
/// Concrete tasks embed a `BaseTask` and expose it through [`Task::base`]. Only the
/// scheduling fields are serialized; the kill signal and dependencies are rebuilt after a
/// restart.
#[derive(Default, Serialize, Deserialize)]
pub struct BaseTask {
    id: String,
    name: String,
    start: u64,
    end: u64,
    allow_multi_execution: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscribe_options: Option<SubscribeOptions>,

    #[serde(skip)]
    kill: CancellationToken,
    #[serde(skip)]
    deps: OnceLock<TaskDependencies>,
    #[serde(skip)]
    finished: AtomicBool,
}

impl BaseTask {
    /// A task eligible while `start <= height < end`. Zero disables either bound.
    pub fn new(start: u64, end: u64, allow_multi_execution: bool) -> Self {
        Self {
            start,
            end,
            allow_multi_execution,
            ..Self::default()
        }
    }

    pub fn with_subscribe_options(mut self, options: SubscribeOptions) -> Self {
        self.subscribe_options = Some(options);
        self
    }

    pub(crate) fn assign(&mut self, id: String, name: &str) {
        self.id = id;
        self.name = name.to_string();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn allow_multi_execution(&self) -> bool {
        self.allow_multi_execution
    }

    pub fn subscribe_options(&self) -> Option<SubscribeOptions> {
        self.subscribe_options
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "task",
            id = %self.id,
            name = %self.name,
            start = self.start,
            end = self.end,
        )
    }

    pub fn kill_signal(&self) -> &CancellationToken {
        &self.kill
    }

    pub fn dependencies(&self) -> Result<&TaskDependencies, TaskErr> {
        self.deps
            .get()
            .ok_or_else(|| TaskErr::unrecoverable("task dependencies not initialized"))
    }

    pub fn client(&self) -> Result<&Arc<dyn Layer1Client>, TaskErr> {
        Ok(&self.dependencies()?.client)
    }

    pub fn initialize(&self, deps: TaskDependencies) -> Result<(), TaskErr> {
        self.deps
            .set(deps)
            .map_err(|_| TaskErr::unrecoverable("task initialized twice"))
    }

    /// Report the outcome to the manager. Only the first call has an effect.
    pub fn finish(&self, result: TaskResult) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(deps) = self.deps.get() else {
            warn!(id = %self.id, "task finished before initialization");
            return;
        };
        let message = TaskFinished {
            id: self.id.clone(),
            result,
        };
        if deps.finished.send(message).is_err() {
            warn!(id = %self.id, "task manager gone, dropping task result");
        }
    }

    pub fn close(&self) {
        self.kill.cancel();
    }

    pub fn was_killed(&self) -> bool {
        self.kill.is_cancelled()
    }
}

impl fmt::Debug for BaseTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("allow_multi_execution", &self.allow_multi_execution)
            .field("killed", &self.was_killed())
            .finish()
    }
}

/// Serialization hook for task payloads; implemented for every `Serialize` type.
pub trait EncodeTask {
    fn encode_task(&self) -> Result<Vec<u8>, serde_json::Error>;
}

impl<T: Serialize> EncodeTask for T {
    fn encode_task(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A unit of chain work confined to a height window.
///
/// The executor calls `prepare` once, then alternates `should_execute` and `execute`
/// until the task has nothing left to do. A transaction returned from `execute` is
/// confirmed through the watcher before the task is considered done. Phases receive a
/// token that fires when the task is killed or the executor shuts down.
#[async_trait]
pub trait Task: EncodeTask + Send + Sync + 'static {
    /// Registry key; also used as the task name.
    fn kind(&self) -> &'static str;

    fn base(&self) -> &BaseTask;

    fn base_mut(&mut self) -> &mut BaseTask;

    async fn prepare(&self, ctx: &CancellationToken) -> Result<(), TaskErr>;

    async fn should_execute(&self, ctx: &CancellationToken) -> Result<bool, TaskErr>;

    async fn execute(&self, ctx: &CancellationToken) -> Result<Option<Transaction>, TaskErr>;

    fn initialize(&self, deps: TaskDependencies) -> Result<(), TaskErr> {
        self.base().initialize(deps)
    }

    fn finish(&self, result: TaskResult) {
        self.base().finish(result)
    }

    fn close(&self) {
        self.base().close()
    }

    fn was_killed(&self) -> bool {
        self.base().was_killed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_nullables::{NullClient, NullStore};
    use vigil_types::Address;

    fn deps() -> (TaskDependencies, mpsc::UnboundedReceiver<TaskFinished>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let deps = TaskDependencies::new(
            Arc::new(NullClient::new(Address::ZERO)),
            Arc::new(NullStore::new()),
            tx,
        );
        (deps, rx)
    }

    #[test]
    fn finish_is_delivered_once() {
        let mut base = BaseTask::new(1, 10, false);
        base.assign("a".into(), "noop");
        let (deps, mut rx) = deps();
        base.initialize(deps).unwrap();

        base.finish(Ok(()));
        base.finish(Err(TaskError::Killed));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.id, "a");
        assert_eq!(msg.result, Ok(()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_initialize_fails() {
        let base = BaseTask::new(0, 0, true);
        let (first, _rx1) = deps();
        let (second, _rx2) = deps();
        base.initialize(first).unwrap();
        assert!(!base.initialize(second).unwrap_err().is_recoverable());
    }

    #[test]
    fn close_sets_kill_signal() {
        let base = BaseTask::new(0, 0, true);
        assert!(!base.was_killed());
        base.close();
        assert!(base.was_killed());
        assert!(base.kill_signal().is_cancelled());
    }

    #[test]
    fn runtime_fields_are_not_serialized() {
        let mut base = BaseTask::new(3, 9, true);
        base.assign("id-1".into(), "noop");
        base.close();
        let raw = serde_json::to_string(&base).unwrap();
        let decoded: BaseTask = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.id(), "id-1");
        assert_eq!(decoded.name(), "noop");
        assert_eq!((decoded.start(), decoded.end()), (3, 9));
        assert!(decoded.allow_multi_execution());
        assert!(!decoded.was_killed());
        assert!(decoded.client().is_err());
    }
}
