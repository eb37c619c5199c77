use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_types::{Address, BlockHeader, Receipt, Transaction, TxHash};

use crate::ClientError;

/// Fee suggestion for the block currently being processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSuggestion {
    pub base_fee: u64,
    pub tip_cap: u64,
}

/// Result of looking a transaction up by hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionLookup {
    pub transaction: Transaction,
    /// Still in the mempool, not yet included in a block.
    pub is_pending: bool,
}

/// Structs that implement this trait give the node read and submit access to the chain.
#[async_trait]
pub trait Layer1Client: Send + Sync + 'static {
    /// Height the node treats as settled enough to act on.
    async fn get_finalized_height(&self) -> Result<u64, ClientError>;

    /// Header at `number`, or the latest header when `None`.
    async fn get_header_by_number(&self, number: Option<u64>) -> Result<BlockHeader, ClientError>;

    /// Submit a signed transaction to the mempool.
    async fn send_transaction(&self, txn: &Transaction) -> Result<TxHash, ClientError>;

    /// Recover the signer of `txn`.
    fn extract_transaction_sender(&self, txn: &Transaction) -> Result<Address, ClientError>;

    /// `ClientError::NotFound` when the chain does not know the hash.
    async fn get_transaction_by_hash(&self, hash: &TxHash)
        -> Result<TransactionLookup, ClientError>;

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Receipt, ClientError>;

    async fn get_block_base_fee_and_suggested_gas_tip(&self) -> Result<FeeSuggestion, ClientError>;

    /// Resubmit `txn` (same nonce) priced for `fees`, returning the replacement.
    async fn retry_transaction(
        &self,
        txn: &Transaction,
        fees: FeeSuggestion,
    ) -> Result<Transaction, ClientError>;

    /// Blocks a receipt must be buried under before it is reported.
    fn finality_delay(&self) -> u64;

    /// The account this node signs with.
    fn default_account(&self) -> Address;

    /// Consecutive not-found polls after which a transaction is given up on.
    fn tx_not_found_max_blocks(&self) -> u64;

    /// Blocks a transaction may stay pending before it is considered stale.
    fn tx_max_stale_blocks(&self) -> u64;
}
