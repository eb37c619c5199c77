//! JSON snapshots of component state.
//!
//! Each component owns one key. A snapshot is written inside a single `update`
//! followed by `sync`, so a crash leaves either the previous or the new snapshot.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{KvStore, StoreError};

/// Dedicated keys for the persisted components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKey {
    /// Task manager schedule.
    TaskManager,
    /// Task executor transaction backups.
    TaskExecutor,
    /// Transaction watcher backend.
    TxWatcher,
}

impl StateKey {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            StateKey::TaskManager => b"ts",
            StateKey::TaskExecutor => b"te",
            StateKey::TxWatcher => b"tw",
        }
    }
}

/// Serialize `state` as JSON under `key` and flush it to disk.
pub fn persist_state<T: Serialize>(
    store: &dyn KvStore,
    key: StateKey,
    state: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_vec(state)?;
    store.update(&mut |txn| txn.set(key.as_bytes(), &raw))?;
    store.sync()?;
    tracing::trace!(key = ?key, bytes = raw.len(), "state persisted");
    Ok(())
}

/// Load the JSON snapshot stored under `key`, if any.
pub fn load_state<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: StateKey,
) -> Result<Option<T>, StoreError> {
    let mut raw = None;
    store.view(&mut |txn| {
        raw = txn.get(key.as_bytes())?;
        Ok(())
    })?;
    match raw {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
