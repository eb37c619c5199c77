use thiserror::Error;

use vigil_layer1::ClientError;

/// Errors surfaced by the watcher. Cloneable because they travel through shared responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatcherError {
    /// Transient failure; the transaction stays monitored.
    #[error("recoverable error: {0}")]
    Recoverable(String),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    /// Pending for too long and could not (or may not) be replaced.
    #[error("transaction stale: {0}")]
    TransactionStale(String),

    #[error("invalid monitor request: {0}")]
    InvalidMonitorRequest(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("transaction watcher is closed")]
    Closed,
}

impl WatcherError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WatcherError::Recoverable(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, WatcherError::TransactionStale(_))
    }
}

impl From<ClientError> for WatcherError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound(what) => WatcherError::TxNotFound(what),
            other => WatcherError::Recoverable(other.to_string()),
        }
    }
}

impl From<vigil_store::StoreError> for WatcherError {
    fn from(e: vigil_store::StoreError) -> Self {
        WatcherError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_not_found_is_terminal() {
        let err = WatcherError::from(ClientError::NotFound("0xab".into()));
        assert_eq!(err, WatcherError::TxNotFound("0xab".into()));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn other_client_errors_are_recoverable() {
        for e in [
            ClientError::Network("timeout".into()),
            ClientError::Rejected("nonce too low".into()),
        ] {
            assert!(WatcherError::from(e).is_recoverable());
        }
    }
}
