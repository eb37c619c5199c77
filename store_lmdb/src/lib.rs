//! LMDB storage backend for the vigil workspace.
//!
//! Implements `vigil_store::KvStore` using the `heed` LMDB bindings. All component
//! snapshots live in a single named database inside one environment.

pub mod environment;
pub mod error;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
