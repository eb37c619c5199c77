//! Nullable layer-1 client: a scripted chain that tests drive by hand.
//!
//! Transactions sent through the client become pending. Tests then `mine`, `drop`
//! or leave them pending while moving the head forward with `set_height`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use vigil_layer1::{ClientError, FeeSuggestion, Layer1Client, TransactionLookup};
use vigil_types::{
    blake2b_256, Address, BlockHash, BlockHeader, Receipt, ReceiptStatus, Transaction, TxHash,
};

#[derive(Clone, Debug)]
enum NullTxStatus {
    Pending,
    Mined(Receipt),
}

#[derive(Clone, Debug)]
struct NullTx {
    txn: Transaction,
    status: NullTxStatus,
}

struct ChainState {
    finalized_height: u64,
    head: u64,
    fees: FeeSuggestion,
    transactions: HashMap<TxHash, NullTx>,
    network_down: bool,
    reject_retries: bool,
    sender_recovery_fails: bool,
    sent: Vec<TxHash>,
    replacements: Vec<(TxHash, TxHash)>,
    lookups: u64,
}

/// A test chain with a programmable head, mempool and receipts.
pub struct NullClient {
    state: Mutex<ChainState>,
    default_account: Address,
    finality_delay: u64,
    tx_not_found_max_blocks: u64,
    tx_max_stale_blocks: u64,
}

impl NullClient {
    pub fn new(default_account: Address) -> Self {
        Self {
            state: Mutex::new(ChainState {
                finalized_height: 0,
                head: 0,
                fees: FeeSuggestion {
                    base_fee: 10,
                    tip_cap: 1,
                },
                transactions: HashMap::new(),
                network_down: false,
                reject_retries: false,
                sender_recovery_fails: false,
                sent: Vec::new(),
                replacements: Vec::new(),
                lookups: 0,
            }),
            default_account,
            finality_delay: 0,
            tx_not_found_max_blocks: 3,
            tx_max_stale_blocks: 5,
        }
    }

    pub fn with_finality_delay(mut self, blocks: u64) -> Self {
        self.finality_delay = blocks;
        self
    }

    pub fn with_tx_not_found_max_blocks(mut self, blocks: u64) -> Self {
        self.tx_not_found_max_blocks = blocks;
        self
    }

    pub fn with_tx_max_stale_blocks(mut self, blocks: u64) -> Self {
        self.tx_max_stale_blocks = blocks;
        self
    }

    /// Move both the head and the finalized height.
    pub fn set_height(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        state.head = height;
        state.finalized_height = height;
    }

    pub fn set_fees(&self, fees: FeeSuggestion) {
        self.state.lock().unwrap().fees = fees;
    }

    /// Make every network call fail with `ClientError::Network`.
    pub fn set_network_down(&self, down: bool) {
        self.state.lock().unwrap().network_down = down;
    }

    pub fn set_reject_retries(&self, reject: bool) {
        self.state.lock().unwrap().reject_retries = reject;
    }

    pub fn set_sender_recovery_fails(&self, fails: bool) {
        self.state.lock().unwrap().sender_recovery_fails = fails;
    }

    /// Put `txn` in the mempool without going through `send_transaction`.
    pub fn add_pending(&self, txn: Transaction) {
        self.state.lock().unwrap().transactions.insert(
            txn.hash(),
            NullTx {
                txn,
                status: NullTxStatus::Pending,
            },
        );
    }

    /// Include a known transaction in the current head block.
    pub fn mine(&self, hash: &TxHash, status: ReceiptStatus) -> Option<Receipt> {
        let mut state = self.state.lock().unwrap();
        let head = state.head;
        let entry = state.transactions.get_mut(hash)?;
        let receipt = Receipt {
            transaction_hash: *hash,
            block_number: head,
            block_hash: block_hash(head),
            gas_used: entry.txn.gas_limit(),
            status,
        };
        entry.status = NullTxStatus::Mined(receipt.clone());
        Some(receipt)
    }

    /// Forget a transaction entirely (evicted from the mempool).
    pub fn drop_transaction(&self, hash: &TxHash) {
        self.state.lock().unwrap().transactions.remove(hash);
    }

    /// Hashes sent through `send_transaction`, in order.
    pub fn sent(&self) -> Vec<TxHash> {
        self.state.lock().unwrap().sent.clone()
    }

    /// `(replaced, replacement)` pairs produced by `retry_transaction`.
    pub fn replacements(&self) -> Vec<(TxHash, TxHash)> {
        self.state.lock().unwrap().replacements.clone()
    }

    /// Number of `get_transaction_by_hash` calls served.
    pub fn lookups(&self) -> u64 {
        self.state.lock().unwrap().lookups
    }

    fn check_network(&self) -> Result<(), ClientError> {
        if self.state.lock().unwrap().network_down {
            return Err(ClientError::Network("null network is down".into()));
        }
        Ok(())
    }
}

fn block_hash(number: u64) -> BlockHash {
    BlockHash::new(blake2b_256(&[b"null-block", &number.to_le_bytes()]))
}

#[async_trait]
impl Layer1Client for NullClient {
    async fn get_finalized_height(&self) -> Result<u64, ClientError> {
        self.check_network()?;
        Ok(self.state.lock().unwrap().finalized_height)
    }

    async fn get_header_by_number(&self, number: Option<u64>) -> Result<BlockHeader, ClientError> {
        self.check_network()?;
        let head = self.state.lock().unwrap().head;
        let number = number.unwrap_or(head);
        if number > head {
            return Err(ClientError::NotFound(format!("block {number}")));
        }
        Ok(BlockHeader::new(number, block_hash(number)))
    }

    async fn send_transaction(&self, txn: &Transaction) -> Result<TxHash, ClientError> {
        self.check_network()?;
        self.add_pending(txn.clone());
        self.state.lock().unwrap().sent.push(txn.hash());
        Ok(txn.hash())
    }

    fn extract_transaction_sender(&self, txn: &Transaction) -> Result<Address, ClientError> {
        if self.state.lock().unwrap().sender_recovery_fails {
            return Err(ClientError::Rejected("invalid signature".into()));
        }
        Ok(txn.from())
    }

    async fn get_transaction_by_hash(
        &self,
        hash: &TxHash,
    ) -> Result<TransactionLookup, ClientError> {
        self.check_network()?;
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        let entry = state
            .transactions
            .get(hash)
            .ok_or_else(|| ClientError::NotFound(hash.to_string()))?;
        Ok(TransactionLookup {
            transaction: entry.txn.clone(),
            is_pending: matches!(entry.status, NullTxStatus::Pending),
        })
    }

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Receipt, ClientError> {
        self.check_network()?;
        let state = self.state.lock().unwrap();
        match state.transactions.get(hash).map(|t| &t.status) {
            Some(NullTxStatus::Mined(receipt)) => Ok(receipt.clone()),
            _ => Err(ClientError::NotFound(format!("receipt for {hash}"))),
        }
    }

    async fn get_block_base_fee_and_suggested_gas_tip(&self) -> Result<FeeSuggestion, ClientError> {
        self.check_network()?;
        Ok(self.state.lock().unwrap().fees)
    }

    async fn retry_transaction(
        &self,
        txn: &Transaction,
        fees: FeeSuggestion,
    ) -> Result<Transaction, ClientError> {
        self.check_network()?;
        if self.state.lock().unwrap().reject_retries {
            return Err(ClientError::Rejected("replacement underpriced".into()));
        }
        let tip = fees.tip_cap.max(txn.gas_tip_cap() + txn.gas_tip_cap() / 10 + 1);
        let cap = (2 * fees.base_fee + tip).max(txn.gas_fee_cap() + txn.gas_fee_cap() / 10 + 1);
        let replacement = txn.clone().with_fees(cap, tip);
        self.add_pending(replacement.clone());
        self.state
            .lock()
            .unwrap()
            .replacements
            .push((txn.hash(), replacement.hash()));
        Ok(replacement)
    }

    fn finality_delay(&self) -> u64 {
        self.finality_delay
    }

    fn default_account(&self) -> Address {
        self.default_account
    }

    fn tx_not_found_max_blocks(&self) -> u64 {
        self.tx_not_found_max_blocks
    }

    fn tx_max_stale_blocks(&self) -> u64 {
        self.tx_max_stale_blocks
    }
}
