//! Shared utilities for the vigil workspace.

pub mod response;

pub use response::SharedResponse;
