//! Drives individual tasks from preparation to a confirmed outcome.
//!
//! Every transaction a task produces is written to a backup before the executor waits
//! for its receipt. After a restart the backup lets the task resume confirmation of the
//! transaction it already sent instead of preparing and executing again.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use vigil_store::{load_state, persist_state, KvStore, StateKey};
use vigil_types::Transaction;
use vigil_watcher::Watcher;

use crate::{ExecutorConfig, Task, TaskDependencies, TaskError, TaskResult};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExecutorState {
    txs_backup: HashMap<String, Transaction>,
}

pub struct TaskExecutor {
    txs_backup: RwLock<HashMap<String, Transaction>>,
    watcher: Arc<dyn Watcher>,
    store: Arc<dyn KvStore>,
    config: ExecutorConfig,
    close: CancellationToken,
}

impl TaskExecutor {
    /// Build an executor, restoring transaction backups from `store`.
    pub fn new(
        watcher: Arc<dyn Watcher>,
        store: Arc<dyn KvStore>,
        config: ExecutorConfig,
    ) -> Result<Self, TaskError> {
        let state: ExecutorState =
            load_state(store.as_ref(), StateKey::TaskExecutor)?.unwrap_or_default();
        if !state.txs_backup.is_empty() {
            info!(backups = state.txs_backup.len(), "restored transaction backups");
        }
        Ok(Self {
            txs_backup: RwLock::new(state.txs_backup),
            watcher,
            store,
            config,
            close: CancellationToken::new(),
        })
    }

    /// Stop all executions at their next checkpoint. Their backups are kept.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    pub fn tx_backup(&self, id: &str) -> Option<Transaction> {
        self.txs_backup
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn backup_count(&self) -> usize {
        self.txs_backup.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run `task` to completion and report the outcome through `Task::finish`.
    ///
    /// When the executor closes mid-run nothing is reported, so the task can resume from
    /// its backup after a restart.
    pub async fn handle_task_execution(self: Arc<Self>, task: Arc<dyn Task>, deps: TaskDependencies) {
        let span = task.base().span();
        async move {
            let ctx = self.close.child_token();
            let forward = tokio::spawn({
                let ctx = ctx.clone();
                let kill = task.base().kill_signal().clone();
                async move {
                    tokio::select! {
                        _ = kill.cancelled() => ctx.cancel(),
                        _ = ctx.cancelled() => {}
                    }
                }
            });

            let result = self.process_task(task.as_ref(), deps, &ctx).await;
            ctx.cancel();
            if let Err(e) = forward.await {
                debug!(error = %e, "kill forwarder aborted");
            }

            if self.is_closed() {
                debug!("executor closed, leaving task for resumption");
                return;
            }
            if let Err(e) = self.remove_tx_backup(task.base().id()) {
                error!(error = %e, "failed to remove transaction backup");
            }
            log_outcome(&result);
            task.finish(result);
        }
        .instrument(span)
        .await
    }

    async fn process_task(
        &self,
        task: &dyn Task,
        deps: TaskDependencies,
        ctx: &CancellationToken,
    ) -> TaskResult {
        task.initialize(deps)?;

        let confirmed = match self.tx_backup(task.base().id()) {
            Some(txn) => {
                info!(tx = %txn.hash(), "resuming confirmation of backed up transaction");
                self.check_completion(task, txn, ctx).await?
            }
            None => {
                self.prepare_task(task, ctx).await?;
                false
            }
        };
        if !confirmed {
            self.execute_task(task, ctx).await?;
        }
        Ok(())
    }

    async fn prepare_task(&self, task: &dyn Task, ctx: &CancellationToken) -> TaskResult {
        loop {
            self.check_exit(task)?;
            match task.prepare(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "prepare failed, retrying");
                    self.sleep_or_exit(task, self.config.retry_delay()).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn execute_task(&self, task: &dyn Task, ctx: &CancellationToken) -> TaskResult {
        loop {
            self.check_exit(task)?;
            if !self.should_execute(task, ctx).await? {
                info!("task no longer needs execution");
                return Ok(());
            }
            match task.execute(ctx).await {
                Ok(None) => return Ok(()),
                Ok(Some(txn)) => {
                    self.add_tx_backup(task.base().id(), &txn)?;
                    if self.check_completion(task, txn, ctx).await? {
                        return Ok(());
                    }
                    self.sleep_or_exit(task, self.config.retry_delay()).await?;
                }
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "execute failed, retrying");
                    self.sleep_or_exit(task, self.config.retry_delay()).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ask the task whether work remains, retrying recoverable errors a bounded number of
    /// times before assuming it does.
    async fn should_execute(&self, task: &dyn Task, ctx: &CancellationToken) -> Result<bool, TaskError> {
        let attempts = self.config.retry_count.max(1);
        for attempt in 1..=attempts {
            self.check_exit(task)?;
            match task.should_execute(ctx).await {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_recoverable() => {
                    debug!(attempt, error = %e, "should_execute failed, retrying");
                    self.sleep_or_exit(task, self.config.retry_delay()).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(
            attempts,
            "could not determine whether to execute, executing anyway"
        );
        Ok(true)
    }

    /// Wait for `txn` to be confirmed. `Ok(true)` means the task's obligation is met, either
    /// by a successful receipt or because the task reports nothing left to do.
    async fn check_completion(
        &self,
        task: &dyn Task,
        txn: Transaction,
        ctx: &CancellationToken,
    ) -> Result<bool, TaskError> {
        let hash = txn.hash();
        let response = match self
            .watcher
            .subscribe(txn, task.base().subscribe_options())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(tx = %hash, error = %e, "failed to subscribe transaction");
                return Ok(false);
            }
        };

        loop {
            self.sleep_or_exit(task, self.config.polling_time()).await?;
            if let Some(outcome) = response.try_get() {
                return match outcome {
                    Ok(receipt) if receipt.is_successful() => {
                        info!(tx = %receipt.transaction_hash, block = receipt.block_number, "transaction confirmed");
                        Ok(true)
                    }
                    Ok(receipt) => {
                        warn!(tx = %receipt.transaction_hash, block = receipt.block_number, "transaction reverted");
                        Ok(false)
                    }
                    Err(e) if e.is_stale() => Err(TaskError::Watcher(e)),
                    Err(e) => {
                        warn!(tx = %hash, error = %e, "transaction monitoring failed");
                        Ok(false)
                    }
                };
            }
            if !self.should_execute(task, ctx).await? {
                info!(tx = %hash, "task no longer needs execution while waiting for receipt");
                return Ok(true);
            }
        }
    }

    fn check_exit(&self, task: &dyn Task) -> TaskResult {
        if self.is_closed() {
            return Err(TaskError::MechanismClosed);
        }
        if task.was_killed() {
            return Err(TaskError::Killed);
        }
        Ok(())
    }

    async fn sleep_or_exit(&self, task: &dyn Task, duration: Duration) -> TaskResult {
        tokio::select! {
            biased;
            _ = self.close.cancelled() => Err(TaskError::MechanismClosed),
            _ = task.base().kill_signal().cancelled() => Err(TaskError::Killed),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn add_tx_backup(&self, id: &str, txn: &Transaction) -> TaskResult {
        let mut backups = self.txs_backup.write().unwrap_or_else(|e| e.into_inner());
        backups.insert(id.to_string(), txn.clone());
        self.persist(&backups)
    }

    fn remove_tx_backup(&self, id: &str) -> TaskResult {
        let mut backups = self.txs_backup.write().unwrap_or_else(|e| e.into_inner());
        if backups.remove(id).is_none() {
            return Ok(());
        }
        self.persist(&backups)
    }

    fn persist(&self, backups: &HashMap<String, Transaction>) -> TaskResult {
        let state = ExecutorState {
            txs_backup: backups.clone(),
        };
        persist_state(self.store.as_ref(), StateKey::TaskExecutor, &state)?;
        Ok(())
    }
}

fn log_outcome(result: &TaskResult) {
    match result {
        Ok(()) => info!("task finished"),
        Err(TaskError::Killed) => info!("task finished after being killed"),
        Err(e) => error!(error = %e, "task failed"),
    }
}
