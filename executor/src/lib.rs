//! Task scheduling and execution.
//!
//! External code builds [`Task`] values and hands them to the [`TaskHandler`]. The
//! manager loop behind the handler owns the schedule: each processing tick it compares
//! task windows with the finalized height, starts eligible tasks on the shared
//! [`TaskExecutor`], closes expired ones and prunes tasks that ignore their kill signal.
//! The executor drives each task through prepare / should-execute / execute and confirms
//! any transaction it produces through the transaction watcher.

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod state;
pub mod task;

pub use config::{ExecutorConfig, SchedulerConfig};
pub use error::{RegistryError, SchedulerError, TaskErr, TaskError};
pub use executor::TaskExecutor;
pub use handler::TaskHandler;
pub use metrics::SchedulerMetrics;
pub use registry::{TaskRegistry, WrappedTask};
pub use state::InternalTaskState;
pub use task::{BaseTask, Task, TaskDependencies, TaskFinished, TaskResponse, TaskResult};
