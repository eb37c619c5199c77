//! Abstract key-value storage for the vigil workspace.
//!
//! Every stateful component snapshots itself into a `KvStore` under a dedicated key.
//! Backends (LMDB, in-memory for testing) implement the traits below; the rest of the
//! codebase depends only on them.

pub mod error;
pub mod state;

pub use error::StoreError;
pub use state::{load_state, persist_state, StateKey};

/// Read access scoped to one store transaction.
pub trait ReadTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Writable transaction handle (extends ReadTxn).
pub trait WriteTxn: ReadTxn {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;
}

/// A transactional key-value store with explicit durability.
///
/// `update` commits only when the closure returns `Ok`; any error aborts the
/// transaction and is returned unchanged. `sync` flushes committed data to disk.
pub trait KvStore: Send + Sync {
    fn view(
        &self,
        f: &mut dyn FnMut(&dyn ReadTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    fn sync(&self) -> Result<(), StoreError>;
}
