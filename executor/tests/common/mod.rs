//! Shared fixtures: a scriptable task and a handler wired to nullable infrastructure.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use vigil_executor::{
    BaseTask, ExecutorConfig, SchedulerConfig, Task, TaskErr, TaskHandler, TaskRegistry,
};
use vigil_nullables::{NullClient, NullStore};
use vigil_types::{Address, Transaction};
use vigil_watcher::{FrontWatcher, WatcherConfig};

pub const ME: Address = Address::ZERO;
pub const PRIMARY: &str = "scripted";
pub const SECONDARY: &str = "scripted-secondary";

/// Counters a test can observe while the task runs.
#[derive(Default)]
pub struct TaskCounters {
    pub prepares: AtomicU32,
    pub should_executes: AtomicU32,
    pub executes: AtomicU32,
    /// Once set, `should_execute` reports that nothing is left to do.
    pub done: AtomicBool,
}

impl TaskCounters {
    pub fn prepares(&self) -> u32 {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> u32 {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn finish_elsewhere(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Lane {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Script {
    /// Execute without producing a transaction.
    Noop,
    /// Send a transaction on every execution, nonces counting up from `nonce`.
    SendTx { nonce: u64 },
    /// Wait in prepare until the kill signal fires.
    BlockUntilKilled,
    /// Hang in prepare and ignore the kill signal.
    IgnoreKill,
    /// Fail prepare with recoverable errors before succeeding.
    FailPrepare { recoverable: u32 },
    /// Fail prepare with an unrecoverable error.
    Unrecoverable,
}

#[derive(Serialize, Deserialize)]
pub struct ScriptedTask {
    base: BaseTask,
    lane: Lane,
    script: Script,
    #[serde(skip)]
    counters: Arc<TaskCounters>,
}

impl ScriptedTask {
    pub fn new(start: u64, end: u64, allow_multi_execution: bool, script: Script) -> Self {
        Self {
            base: BaseTask::new(start, end, allow_multi_execution),
            lane: Lane::Primary,
            script,
            counters: Arc::new(TaskCounters::default()),
        }
    }

    pub fn secondary(mut self) -> Self {
        self.lane = Lane::Secondary;
        self
    }

    pub fn counters(&self) -> Arc<TaskCounters> {
        Arc::clone(&self.counters)
    }

    pub fn boxed(self) -> Option<Box<dyn Task>> {
        Some(Box::new(self))
    }
}

#[async_trait]
impl Task for ScriptedTask {
    fn kind(&self) -> &'static str {
        match self.lane {
            Lane::Primary => PRIMARY,
            Lane::Secondary => SECONDARY,
        }
    }

    fn base(&self) -> &BaseTask {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseTask {
        &mut self.base
    }

    async fn prepare(&self, ctx: &CancellationToken) -> Result<(), TaskErr> {
        let attempt = self.counters.prepares.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script {
            Script::BlockUntilKilled => {
                ctx.cancelled().await;
                Ok(())
            }
            Script::IgnoreKill => std::future::pending().await,
            Script::FailPrepare { recoverable } if attempt <= recoverable => {
                Err(TaskErr::recoverable(format!("attempt {attempt}")))
            }
            Script::Unrecoverable => Err(TaskErr::unrecoverable("bad input")),
            _ => Ok(()),
        }
    }

    async fn should_execute(&self, _ctx: &CancellationToken) -> Result<bool, TaskErr> {
        self.counters.should_executes.fetch_add(1, Ordering::SeqCst);
        Ok(!self.counters.done.load(Ordering::SeqCst))
    }

    async fn execute(&self, _ctx: &CancellationToken) -> Result<Option<Transaction>, TaskErr> {
        let run = u64::from(self.counters.executes.fetch_add(1, Ordering::SeqCst));
        let Script::SendTx { nonce } = self.script else {
            return Ok(None);
        };
        let txn = Transaction::new(ME, Some(Address::new([9; 20])), nonce + run, vec![0xaa, 0xbb, 0xcc, 0xdd])
            .with_fees(30, 3);
        self.base
            .client()?
            .send_transaction(&txn)
            .await
            .map_err(|e| TaskErr::recoverable(e.to_string()))?;
        Ok(Some(txn))
    }
}

pub fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register::<ScriptedTask>(PRIMARY)
        .register::<ScriptedTask>(SECONDARY);
    registry
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        processing_time_ms: 10,
        network_timeout_ms: 200,
        height_tolerance_before_removing: 2,
        ..SchedulerConfig::default()
    }
}

pub fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        retry_delay_ms: 5,
        retry_count: 3,
        polling_time_ms: 5,
    }
}

pub fn watcher_config() -> WatcherConfig {
    WatcherConfig {
        polling_time_ms: 10,
        status_time_ms: 100,
        network_timeout_ms: 200,
        worker_timeout_ms: 200,
        ..WatcherConfig::default()
    }
}

pub struct Harness {
    pub client: Arc<NullClient>,
    pub store: Arc<NullStore>,
    pub watcher: Arc<FrontWatcher>,
    pub handler: TaskHandler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(registry())
    }

    pub fn with_registry(registry: TaskRegistry) -> Self {
        Self::restart(
            Arc::new(NullClient::new(ME)),
            Arc::new(NullStore::new()),
            registry,
        )
    }

    /// Build and start a handler over existing infrastructure.
    pub fn restart(client: Arc<NullClient>, store: Arc<NullStore>, registry: TaskRegistry) -> Self {
        let watcher = Arc::new(
            FrontWatcher::new(client.clone(), store.clone(), watcher_config()).unwrap(),
        );
        let handler = TaskHandler::new(
            client.clone(),
            store.clone(),
            watcher.clone(),
            registry,
            scheduler_config(),
            executor_config(),
        )
        .unwrap();
        watcher.start();
        handler.start();
        Self {
            client,
            store,
            watcher,
            handler,
        }
    }

    pub async fn stop(self) -> (Arc<NullClient>, Arc<NullStore>) {
        self.handler.close().await;
        self.watcher.close().await;
        (self.client, self.store)
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give the manager a few processing ticks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}
