//! End-to-end tests for the front watcher running its backend loop.

use std::sync::Arc;
use std::time::Duration;

use vigil_nullables::{NullClient, NullStore};
use vigil_store::{load_state, StateKey};
use vigil_types::{Address, ReceiptStatus, Transaction};
use vigil_watcher::{FrontWatcher, SubscribeOptions, Watcher, WatcherConfig, WatcherError, WatcherState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ME: Address = Address::ZERO;

fn fast_config() -> WatcherConfig {
    WatcherConfig {
        polling_time_ms: 10,
        status_time_ms: 50,
        network_timeout_ms: 500,
        worker_timeout_ms: 500,
        ..WatcherConfig::default()
    }
}

fn setup() -> (Arc<NullClient>, Arc<NullStore>, FrontWatcher) {
    let client = Arc::new(NullClient::new(ME));
    let store = Arc::new(NullStore::new());
    let watcher = FrontWatcher::new(client.clone(), store.clone(), fast_config()).unwrap();
    (client, store, watcher)
}

fn txn(nonce: u64) -> Transaction {
    Transaction::new(ME, Some(Address::new([7; 20])), nonce, vec![1, 2, 3, 4]).with_fees(30, 3)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_and_wait_returns_receipt() {
    let (client, _store, watcher) = setup();
    let watcher = Arc::new(watcher);
    watcher.start();
    client.set_height(5);
    let t = txn(0);
    client.add_pending(t.clone());

    let waiter = tokio::spawn({
        let watcher = watcher.clone();
        let t = t.clone();
        async move { watcher.subscribe_and_wait(t, None).await }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    client.mine(&t.hash(), ReceiptStatus::Successful);
    client.set_height(6);

    let receipt = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(receipt.transaction_hash, t.hash());
    assert_eq!(receipt.block_number, 5);
    watcher.close().await;
}

#[tokio::test]
async fn duplicate_subscriptions_resolve_identically() {
    let (client, _store, watcher) = setup();
    watcher.start();
    client.set_height(5);
    let t = txn(1);
    client.add_pending(t.clone());

    let a = watcher.subscribe(t.clone(), None).await.unwrap();
    let b = watcher.subscribe(t.clone(), None).await.unwrap();
    assert!(a.same_as(&b));

    client.mine(&t.hash(), ReceiptStatus::Reverted);
    client.set_height(6);
    let ra = tokio::time::timeout(Duration::from_secs(2), a.get()).await.unwrap();
    let rb = tokio::time::timeout(Duration::from_secs(2), b.get()).await.unwrap();
    assert_eq!(ra, rb);
    assert!(!ra.unwrap().is_successful());
    watcher.close().await;
}

#[tokio::test]
async fn stale_without_retry_reaches_subscriber() {
    let (client, _store, watcher) = setup();
    watcher.start();
    client.set_height(10);
    let t = txn(2);
    client.add_pending(t.clone());

    let response = watcher
        .subscribe(t, Some(SubscribeOptions::new(false, 1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    client.set_height(11);

    let outcome = tokio::time::timeout(Duration::from_secs(2), response.get())
        .await
        .unwrap();
    assert!(matches!(outcome, Err(WatcherError::TransactionStale(_))));
    watcher.close().await;
}

#[tokio::test]
async fn closed_watcher_rejects_subscriptions() {
    let (_client, _store, watcher) = setup();
    watcher.start();
    watcher.close().await;
    assert!(watcher.is_closed());
    let err = watcher.subscribe(txn(3), None).await.unwrap_err();
    assert_eq!(err, WatcherError::Closed);
}

#[tokio::test]
async fn close_persists_monitored_transactions() {
    let (client, store, watcher) = setup();
    watcher.start();
    client.set_height(3);
    let t = txn(4);
    client.add_pending(t.clone());
    watcher.subscribe(t.clone(), None).await.unwrap();
    watcher.close().await;

    let state: WatcherState = load_state(store.as_ref(), StateKey::TxWatcher)
        .unwrap()
        .unwrap();
    assert!(state.monitored_txns.contains_key(&t.hash()));
    assert!(state.retry_groups.contains_key(&t.hash()));
}

#[tokio::test]
async fn invalid_sender_is_reported_to_caller() {
    let (client, _store, watcher) = setup();
    watcher.start();
    client.set_sender_recovery_fails(true);
    let err = watcher.subscribe(txn(5), None).await.unwrap_err();
    assert!(matches!(err, WatcherError::InvalidMonitorRequest(_)));
    watcher.close().await;
}
