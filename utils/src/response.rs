//! Write-once shared response.
//!
//! A `SharedResponse` is handed to every party interested in one outcome (all subscribers
//! of a retry group, the caller that scheduled a task). The first `write` wins; later writes
//! are ignored and report `false`. Readers either poll `is_ready`/`try_get` or await `get`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

pub struct SharedResponse<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone> SharedResponse<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// A response that is already completed with `value`.
    pub fn resolved(value: T) -> Self {
        let (slot, _) = watch::channel(Some(value));
        Self {
            slot: Arc::new(slot),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Complete the response. Returns `false` if it was already completed.
    pub fn write(&self, value: T) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub fn try_get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Wait until the response is completed.
    pub async fn get(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            if rx.changed().await.is_err() {
                // `self` keeps the sender alive, so this is unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Whether two handles refer to the same underlying response.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone> Default for SharedResponse<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SharedResponse<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for SharedResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResponse")
            .field("ready", &self.slot.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_write_wins() {
        let response = SharedResponse::new();
        assert!(!response.is_ready());
        assert!(response.write(1u32));
        assert!(!response.write(2));
        assert!(response.is_ready());
        assert_eq!(response.try_get(), Some(1));
    }

    #[test]
    fn resolved_is_ready() {
        let response = SharedResponse::resolved("done");
        assert!(response.is_ready());
        assert!(!response.write("again"));
        assert_eq!(response.try_get(), Some("done"));
    }

    #[test]
    fn clones_share_state() {
        let a = SharedResponse::new();
        let b = a.clone();
        assert!(a.same_as(&b));
        b.write(7u8);
        assert_eq!(a.try_get(), Some(7));
        assert!(!a.same_as(&SharedResponse::new()));
    }

    #[tokio::test]
    async fn get_returns_immediately_when_ready() {
        let response = SharedResponse::resolved(5u64);
        assert_eq!(response.get().await, 5);
    }

    #[tokio::test]
    async fn waiters_see_the_same_value() {
        let response = SharedResponse::<String>::new();
        let w1 = tokio::spawn({
            let r = response.clone();
            async move { r.get().await }
        });
        let w2 = tokio::spawn({
            let r = response.clone();
            async move { r.get().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        response.write("receipt".to_string());
        response.write("ignored".to_string());

        assert_eq!(w1.await.unwrap(), "receipt");
        assert_eq!(w2.await.unwrap(), "receipt");
    }

    #[tokio::test]
    async fn get_blocks_until_written() {
        let response = SharedResponse::<u8>::new();
        let pending = tokio::time::timeout(Duration::from_millis(20), response.get()).await;
        assert!(pending.is_err());
    }
}
