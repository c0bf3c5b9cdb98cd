// src/ledger/mod.rs
//! Durable record of every transaction the manager has submitted
//!
//! Records are unique by transaction id and by `(nonce, signer)`. The ledger is
//! the only state that survives a restart; everything else is rebuilt from chain.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub mod sqlite;

pub use sqlite::SqliteTxStore;

/// File name of the ledger inside the configured workdir.
pub const TXSTORE_FILENAME: &str = "txstore.db";

/// Largest nonce the ledger stores; SQLite integers are signed 64-bit.
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Purpose tag attached to every submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerAction {
    RegisterServer,
    AddWorker,
    RelayCall,
    ValueTransfer,
    DepositWithdrawal,
    Penalization,
}

impl ServerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerAction::RegisterServer => "REGISTER_SERVER",
            ServerAction::AddWorker => "ADD_WORKER",
            ServerAction::RelayCall => "RELAY_CALL",
            ServerAction::ValueTransfer => "VALUE_TRANSFER",
            ServerAction::DepositWithdrawal => "DEPOSIT_WITHDRAWAL",
            ServerAction::Penalization => "PENALIZATION",
        }
    }
}

impl fmt::Display for ServerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "REGISTER_SERVER" => Ok(ServerAction::RegisterServer),
            "ADD_WORKER" => Ok(ServerAction::AddWorker),
            "RELAY_CALL" => Ok(ServerAction::RelayCall),
            "VALUE_TRANSFER" => Ok(ServerAction::ValueTransfer),
            "DEPOSIT_WITHDRAWAL" => Ok(ServerAction::DepositWithdrawal),
            "PENALIZATION" => Ok(ServerAction::Penalization),
            other => Err(format!("unknown server action: {}", other)),
        }
    }
}

/// Uniqueness key of a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceSigner {
    pub nonce: u64,
    pub signer: Address,
}

/// A signed transaction as submitted, plus its tracking metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub tx_id: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub data: Option<Bytes>,
    pub nonce: u64,
    pub server_action: ServerAction,
    pub attempts: u32,
    pub creation_block_number: u64,
    pub boost_block_number: Option<u64>,
    pub mined_block_number: Option<u64>,
}

impl StoredTransaction {
    pub fn nonce_signer(&self) -> NonceSigner {
        NonceSigner {
            nonce: self.nonce,
            signer: self.from,
        }
    }

    pub fn is_mined(&self) -> bool {
        self.mined_block_number.is_some()
    }

    /// Reject records that could never have come from a real submission.
    pub fn validate(&self) -> Result<()> {
        if self.tx_id.is_zero() {
            return Err(Error::InvalidRecord(format!(
                "missing transaction id (nonce {} from {:#x})",
                self.nonce, self.from
            )));
        }
        if self.attempts == 0 {
            return Err(Error::InvalidRecord(format!(
                "transaction {:#x} has zero attempts",
                self.tx_id
            )));
        }
        if self.nonce > MAX_NONCE {
            return Err(Error::InvalidRecord(format!(
                "transaction {:#x} nonce {} exceeds {}",
                self.tx_id, self.nonce, MAX_NONCE
            )));
        }
        Ok(())
    }
}

/// Storage contract for the transaction ledger.
///
/// Every read that returns several records orders them ascending by nonce:
/// retry and cancel logic relies on seeing the lowest unconfirmed nonce first.
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Insert a record, or overwrite the one holding the same `(nonce, signer)`
    /// slot when `update_existing` is set.
    async fn put_tx(&self, tx: &StoredTransaction, update_existing: bool) -> Result<()>;

    async fn get_tx_by_nonce(&self, signer: Address, nonce: u64) -> Result<Option<StoredTransaction>>;

    async fn get_tx_by_id(&self, tx_id: H256) -> Result<Option<StoredTransaction>>;

    /// Records of `signer` with nonce `<= nonce`.
    async fn get_txs_until_nonce(&self, signer: Address, nonce: u64) -> Result<Vec<StoredTransaction>>;

    /// Prune records of `signer` with nonce `<= nonce`. Returns the number removed.
    async fn remove_txs_until_nonce(&self, signer: Address, nonce: u64) -> Result<u64>;

    async fn clear_all(&self) -> Result<()>;

    async fn get_all_by_signer(&self, signer: Address) -> Result<Vec<StoredTransaction>>;

    async fn get_all(&self) -> Result<Vec<StoredTransaction>>;

    /// True while an unmined record with this action (and destination, if given) exists.
    async fn is_action_pending(
        &self,
        action: ServerAction,
        destination: Option<Address>,
    ) -> Result<bool>;
}
