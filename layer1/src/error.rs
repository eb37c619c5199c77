use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The chain has no record of the requested object.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure; retrying may succeed.
    #[error("network error: {0}")]
    Network(String),

    /// The node rejected the request (bad nonce, underpriced replacement, ...).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}
