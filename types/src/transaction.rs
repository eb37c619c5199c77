//! Signed layer-1 transactions and their receipts.

use serde::{Deserialize, Serialize};

use crate::address::{Address, FuncSelector};
use crate::block::BlockHash;
use crate::hash::{blake2b_256, TxHash};

/// Gas limit used when a caller does not set one explicitly.
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;

/// A dynamic-fee transaction as submitted by the node.
///
/// The hash commits to every field, so builders that change a field recompute it.
/// Fee replacement therefore always yields a new hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    chain_id: u64,
    nonce: u64,
    from: Address,
    to: Option<Address>,
    gas_limit: u64,
    gas_fee_cap: u64,
    gas_tip_cap: u64,
    value: u64,
    #[serde(with = "hex::serde")]
    data: Vec<u8>,
    hash: TxHash,
}

impl Transaction {
    pub fn new(from: Address, to: Option<Address>, nonce: u64, data: Vec<u8>) -> Self {
        let mut txn = Self {
            chain_id: 1,
            nonce,
            from,
            to,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_fee_cap: 0,
            gas_tip_cap: 0,
            value: 0,
            data,
            hash: TxHash::ZERO,
        };
        txn.rehash();
        txn
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self.rehash();
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self.rehash();
        self
    }

    pub fn with_fees(mut self, gas_fee_cap: u64, gas_tip_cap: u64) -> Self {
        self.gas_fee_cap = gas_fee_cap;
        self.gas_tip_cap = gas_tip_cap;
        self.rehash();
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self.rehash();
        self
    }

    pub fn hash(&self) -> TxHash {
        self.hash
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The account that signed the transaction.
    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Option<Address> {
        self.to
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_fee_cap(&self) -> u64 {
        self.gas_fee_cap
    }

    pub fn gas_tip_cap(&self) -> u64 {
        self.gas_tip_cap
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn selector(&self) -> FuncSelector {
        FuncSelector::from_calldata(&self.data)
    }

    fn rehash(&mut self) {
        let to = self.to.map(|a| *a.as_bytes()).unwrap_or_default();
        self.hash = TxHash::new(blake2b_256(&[
            &self.chain_id.to_le_bytes(),
            &self.nonce.to_le_bytes(),
            self.from.as_bytes(),
            &[self.to.is_some() as u8],
            &to,
            &self.gas_limit.to_le_bytes(),
            &self.gas_fee_cap.to_le_bytes(),
            &self.gas_tip_cap.to_le_bytes(),
            &self.value.to_le_bytes(),
            &self.data,
        ]));
    }
}

/// Execution status carried by a receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Reverted,
    Successful,
}

/// Proof that a transaction was included in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub gas_used: u64,
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn is_successful(&self) -> bool {
        self.status == ReceiptStatus::Successful
    }
}
