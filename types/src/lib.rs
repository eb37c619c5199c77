//! Fundamental types for the vigil workspace.
//!
//! This crate defines the layer-1 values shared by every other crate: transaction and block
//! hashes, account addresses, function selectors, transactions, receipts and block headers.

pub mod address;
pub mod block;
pub mod error;
pub mod hash;
pub mod transaction;

pub use address::{Address, FuncSelector};
pub use block::{BlockHash, BlockHeader};
pub use error::TypesError;
pub use hash::{blake2b_256, TxHash};
pub use transaction::{Receipt, ReceiptStatus, Transaction};
