//! Layer-1 client boundary.
//!
//! The node consumes a blockchain client; it never implements one. Everything the
//! watcher and executor need from the chain goes through [`Layer1Client`].

pub mod client;
pub mod error;

pub use client::{FeeSuggestion, Layer1Client, TransactionLookup};
pub use error::ClientError;
