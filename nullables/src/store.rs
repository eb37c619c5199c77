//! Nullable store: thread-safe in-memory key-value storage for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use vigil_store::{KvStore, ReadTxn, StoreError, WriteTxn};

/// An in-memory `KvStore` with the same commit-or-abort semantics as LMDB.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullStore {
    data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    syncs: AtomicU64,
    fail_writes: AtomicBool,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            syncs: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of `sync` calls so far.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Make every subsequent `update` fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Raw value under `key` (for assertions).
    pub fn raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

struct StagedTxn<'a> {
    data: &'a mut HashMap<Vec<u8>, Vec<u8>>,
}

impl ReadTxn for StagedTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(key).cloned())
    }
}

impl WriteTxn for StagedTxn<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.data.remove(key);
        Ok(())
    }
}

impl KvStore for NullStore {
    fn view(
        &self,
        f: &mut dyn FnMut(&dyn ReadTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        f(&StagedTxn { data: &mut data })
    }

    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("null store writes disabled".into()));
        }
        let mut data = self.data.lock().unwrap();
        let mut staged = data.clone();
        f(&mut StagedTxn { data: &mut staged })?;
        *data = staged;
        Ok(())
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
