use thiserror::Error;

use vigil_watcher::WatcherError;

/// Error returned by a task phase. The variant decides whether the executor retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskErr {
    #[error("recoverable: {0}")]
    Recoverable(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl TaskErr {
    pub fn recoverable(msg: impl Into<String>) -> Self {
        TaskErr::Recoverable(msg.into())
    }

    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        TaskErr::Unrecoverable(msg.into())
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, TaskErr::Recoverable(_))
    }
}

/// Final outcome of a task, delivered through its response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Task(#[from] TaskErr),

    #[error("task was killed")]
    Killed,

    #[error("task was killed before execution")]
    KilledBeforeExecution,

    #[error("task execution mechanism closed")]
    MechanismClosed,

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error("storage error: {0}")]
    Store(String),
}

impl From<vigil_store::StoreError> for TaskError {
    fn from(e: vigil_store::StoreError) -> Self {
        TaskError::Store(e.to_string())
    }
}

/// Synchronous rejection of a schedule or kill request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task is nil")]
    TaskIsNil,

    #[error("task type not in registry: {0}")]
    TypeNotRegistered(String),

    #[error("wrong start/end height params: start={start} end={end}")]
    WrongParams { start: u64, end: u64 },

    #[error("task end height {end} already passed (last height seen {last_height_seen})")]
    Expired { end: u64, last_height_seen: u64 },

    #[error("a task of type {0} is already running and does not allow multiple executions")]
    NotAllowedMultiExecution(String),

    #[error("task is not scheduled: {0}")]
    NotScheduled(String),

    #[error("task id is empty")]
    TaskIdEmpty,

    #[error("task serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("task handler is closed")]
    Closed,
}

impl From<vigil_store::StoreError> for SchedulerError {
    fn from(e: vigil_store::StoreError) -> Self {
        SchedulerError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task type not in registry: {0}")]
    NotRegistered(String),

    #[error("failed to encode or decode task of type {kind}: {reason}")]
    Codec { kind: String, reason: String },
}

impl From<RegistryError> for SchedulerError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotRegistered(kind) => SchedulerError::TypeNotRegistered(kind),
            codec => SchedulerError::Serialization(codec.to_string()),
        }
    }
}
