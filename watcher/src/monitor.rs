//! Monitoring state owned by the watcher backend.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vigil_types::{Address, BlockHeader, FuncSelector, Receipt, Transaction, TxHash};
use vigil_utils::SharedResponse;

use crate::WatcherError;

/// Outcome shared by every subscriber of one retry group.
pub type ReceiptResponse = SharedResponse<Result<Receipt, WatcherError>>;

/// Per-subscription monitoring options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Replace the transaction with a higher fee once it goes stale.
    pub enable_auto_retry: bool,
    /// Blocks the transaction may stay pending before it is stale.
    pub max_stale_blocks: u64,
}

impl SubscribeOptions {
    pub fn new(enable_auto_retry: bool, max_stale_blocks: u64) -> Self {
        Self {
            enable_auto_retry,
            max_stale_blocks,
        }
    }
}

/// A transaction the backend is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTransaction {
    pub txn: Transaction,
    pub from: Address,
    pub selector: FuncSelector,
    /// Human readable signature of the invoked function; empty when unknown.
    pub function_signature: String,
    /// Hash of the first attempt at this logical transaction.
    pub retry_group: TxHash,
    pub enable_auto_retry: bool,
    pub max_stale_blocks: u64,
    /// Height at which monitoring started or was last restarted; 0 means "next block".
    pub monitoring_height: u64,
    pub retry_amount: u64,
    pub not_found_blocks: u64,
}

impl MonitoredTransaction {
    pub fn new(
        txn: Transaction,
        from: Address,
        function_signature: String,
        retry_group: TxHash,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            selector: txn.selector(),
            txn,
            from,
            function_signature,
            retry_group,
            enable_auto_retry: options.enable_auto_retry,
            max_stale_blocks: options.max_stale_blocks,
            monitoring_height: 0,
            retry_amount: 0,
            not_found_blocks: 0,
        }
    }

    /// Monitoring entry for `replacement`, inheriting this entry's group and options.
    pub fn replaced_by(&self, replacement: Transaction) -> Self {
        let options = SubscribeOptions::new(self.enable_auto_retry, self.max_stale_blocks);
        let mut info = Self::new(
            replacement,
            self.from,
            self.function_signature.clone(),
            self.retry_group,
            options,
        );
        info.retry_amount = self.retry_amount + 1;
        info
    }

    pub fn hash(&self) -> TxHash {
        self.txn.hash()
    }
}

/// Successive attempts at one logical transaction and their shared response.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RetryGroup {
    members: Vec<TxHash>,
    #[serde(skip)]
    response: ReceiptResponse,
}

impl RetryGroup {
    pub fn new(first: TxHash) -> Self {
        Self {
            members: vec![first],
            response: ReceiptResponse::new(),
        }
    }

    pub fn add(&mut self, hash: TxHash) {
        if !self.members.contains(&hash) {
            self.members.push(hash);
        }
    }

    /// Remove `hash`; member order is not preserved. Returns whether it was present.
    pub fn remove(&mut self, hash: &TxHash) -> bool {
        match self.members.iter().position(|h| h == hash) {
            Some(index) => {
                self.members.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn members(&self) -> &[TxHash] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn response(&self) -> ReceiptResponse {
        self.response.clone()
    }

    /// Deliver the outcome of one member. A receipt always resolves the group; a failure
    /// only does when it concerns the last remaining attempt.
    pub fn deliver(&self, outcome: Result<Receipt, WatcherError>) -> bool {
        if outcome.is_ok() || self.members.len() == 1 {
            return self.response.write(outcome);
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReceipt {
    pub receipt: Receipt,
    pub retrieved_at_height: u64,
}

/// Gas usage statistics for one function selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasProfile {
    pub average_gas: u64,
    pub minimum_gas: u64,
    pub maximum_gas: u64,
    pub total_gas: u64,
    pub total_count: u64,
    pub total_success: u64,
}

impl GasProfile {
    pub fn record(&mut self, receipt: &Receipt) {
        let gas = receipt.gas_used;
        self.total_gas = self.total_gas.saturating_add(gas);
        self.total_count += 1;
        self.average_gas = self.total_gas / self.total_count;
        if self.minimum_gas == 0 || gas < self.minimum_gas {
            self.minimum_gas = gas;
        }
        self.maximum_gas = self.maximum_gas.max(gas);
        if receipt.is_successful() {
            self.total_success += 1;
        }
    }
}

/// Everything the backend persists between restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WatcherState {
    pub monitored_txns: HashMap<TxHash, MonitoredTransaction>,
    pub receipt_cache: HashMap<TxHash, CachedReceipt>,
    pub aggregates: HashMap<FuncSelector, GasProfile>,
    pub retry_groups: HashMap<TxHash, RetryGroup>,
    pub last_processed_block: Option<BlockHeader>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{BlockHash, ReceiptStatus};

    fn receipt(gas_used: u64, status: ReceiptStatus) -> Receipt {
        Receipt {
            transaction_hash: TxHash::new([1; 32]),
            block_number: 10,
            block_hash: BlockHash::ZERO,
            gas_used,
            status,
        }
    }

    #[test]
    fn gas_profile_tracks_extremes_and_success() {
        let mut profile = GasProfile::default();
        profile.record(&receipt(300, ReceiptStatus::Successful));
        profile.record(&receipt(100, ReceiptStatus::Reverted));
        profile.record(&receipt(200, ReceiptStatus::Successful));

        assert_eq!(profile.minimum_gas, 100);
        assert_eq!(profile.maximum_gas, 300);
        assert_eq!(profile.average_gas, 200);
        assert_eq!(profile.total_gas, 600);
        assert_eq!(profile.total_count, 3);
        assert_eq!(profile.total_success, 2);
    }

    #[test]
    fn group_failure_waits_for_last_member() {
        let a = TxHash::new([1; 32]);
        let b = TxHash::new([2; 32]);
        let mut group = RetryGroup::new(a);
        group.add(b);

        assert!(!group.deliver(Err(WatcherError::TxNotFound("a".into()))));
        assert!(!group.response().is_ready());

        group.remove(&a);
        assert!(group.deliver(Err(WatcherError::TxNotFound("b".into()))));
        assert!(group.response().is_ready());
    }

    #[test]
    fn group_receipt_resolves_immediately() {
        let mut group = RetryGroup::new(TxHash::new([1; 32]));
        group.add(TxHash::new([2; 32]));
        assert!(group.deliver(Ok(receipt(1, ReceiptStatus::Successful))));
    }

    #[test]
    fn group_add_is_idempotent_and_remove_reports_presence() {
        let a = TxHash::new([1; 32]);
        let mut group = RetryGroup::new(a);
        group.add(a);
        assert_eq!(group.members().len(), 1);
        assert!(group.remove(&a));
        assert!(!group.remove(&a));
        assert!(group.is_empty());
    }

    #[test]
    fn replacement_inherits_group_and_bumps_retry_amount() {
        let txn = Transaction::new(Address::new([1; 20]), None, 0, vec![]);
        let info = MonitoredTransaction::new(
            txn.clone(),
            Address::new([1; 20]),
            String::new(),
            txn.hash(),
            SubscribeOptions::new(true, 5),
        );
        let replacement = txn.with_fees(50, 5);
        let next = info.replaced_by(replacement.clone());
        assert_eq!(next.retry_group, info.retry_group);
        assert_eq!(next.retry_amount, 1);
        assert_eq!(next.monitoring_height, 0);
        assert_eq!(next.hash(), replacement.hash());
    }

    #[test]
    fn state_round_trips_without_responses() {
        let mut state = WatcherState::default();
        let hash = TxHash::new([4; 32]);
        let group = RetryGroup::new(hash);
        group.response().write(Err(WatcherError::Closed));
        state.retry_groups.insert(hash, group);

        let json = serde_json::to_string(&state).unwrap();
        let loaded: WatcherState = serde_json::from_str(&json).unwrap();
        let group = &loaded.retry_groups[&hash];
        assert_eq!(group.members(), &[hash]);
        assert!(!group.response().is_ready());
    }
}
