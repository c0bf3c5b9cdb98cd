// src/lib.rs
//! Relay Manager Library
//!
//! Control plane of an unattended relay manager: decides when the manager is
//! staked, funded and registered on the relay hub, keeps a durable ledger of
//! every submitted transaction, and keeps the worker account funded.

pub mod chain;
pub mod config;
pub mod context;
pub mod delayed;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod registration;
pub mod replenish;
pub mod threshold;

#[cfg(test)]
mod mock;

// Re-export commonly used types
pub use chain::{ChainReader, HubEvent, HubEventKind, TransactionSender};
pub use config::ManagerConfig;
pub use context::ManagerContext;
pub use error::{Error, Result};
pub use ledger::{ServerAction, SqliteTxStore, StoredTransaction, TxStore};
pub use notify::{EventSink, LogSink, ManagerEvent};
pub use registration::RegistrationManager;
pub use replenish::Replenisher;
pub use threshold::ThresholdRequirement;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
