// src/error.rs
//! Crate-wide error type

use ethers::types::{Address, H256};

/// Every failure the manager core can surface to its caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `handle_past_events` was called before `init`.
    #[error("Registration manager not initialized")]
    NotInitialized,

    /// A ledger record is missing its id, attempts or nonce.
    #[error("Invalid transaction record: {0}")]
    InvalidRecord(String),

    /// The signer already has a different record for this nonce.
    #[error("Signer {signer:#x} already has a transaction with nonce {nonce}")]
    DuplicateNonce { signer: Address, nonce: u64 },

    /// A record with this transaction id is already stored.
    #[error("Transaction {0:#x} is already stored")]
    DuplicateTransactionId(H256),

    /// The hub holds more than one relay record for a single manager.
    #[error("More than one relay manager record found for {manager:#x} ({records} records)")]
    InconsistentRegistryState { manager: Address, records: usize },

    /// Ledger storage failure.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure reported by a chain reader or transaction sender.
    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
