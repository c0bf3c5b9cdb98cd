// src/chain.rs
//! Contracts for the chain-facing collaborators
//!
//! Reading hub state and broadcasting signed transactions live outside this crate.
//! The manager core only talks to them through [`ChainReader`] and [`TransactionSender`].

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::fmt;

use crate::error::Result;
use crate::ledger::ServerAction;

/// Stake record held by the hub for a manager.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StakeInfo {
    pub stake: U256,
    pub unstake_delay: u64,
    pub owner: Address,
    /// Zero while the stake is locked.
    pub withdraw_block: u64,
}

impl StakeInfo {
    pub fn is_locked(&self) -> bool {
        self.withdraw_block == 0
    }
}

/// Registration record held by the hub for a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    pub manager: Address,
    pub url: String,
}

/// Names of the hub events the manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubEventName {
    StakeAdded,
    StakeUnlocked,
    StakeWithdrawn,
    RelayWorkersAdded,
    RelayServerRegistered,
}

impl HubEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubEventName::StakeAdded => "StakeAdded",
            HubEventName::StakeUnlocked => "StakeUnlocked",
            HubEventName::StakeWithdrawn => "StakeWithdrawn",
            HubEventName::RelayWorkersAdded => "RelayWorkersAdded",
            HubEventName::RelayServerRegistered => "RelayServerRegistered",
        }
    }
}

impl fmt::Display for HubEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded payload of a hub event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEventKind {
    StakeAdded {
        relay_manager: Address,
        owner: Address,
        stake: U256,
        unstake_delay: u64,
    },
    StakeUnlocked {
        relay_manager: Address,
        owner: Address,
        withdraw_block: u64,
    },
    StakeWithdrawn {
        relay_manager: Address,
        owner: Address,
        amount: U256,
    },
    RelayWorkersAdded {
        relay_manager: Address,
        new_relay_workers: Vec<Address>,
        workers_count: u64,
    },
    RelayServerRegistered {
        relay_manager: Address,
        relay_url: String,
    },
}

/// A hub log with its position on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEvent {
    pub block_number: u64,
    pub transaction_index: u64,
    pub transaction_hash: H256,
    pub kind: HubEventKind,
}

impl HubEvent {
    pub fn name(&self) -> HubEventName {
        match self.kind {
            HubEventKind::StakeAdded { .. } => HubEventName::StakeAdded,
            HubEventKind::StakeUnlocked { .. } => HubEventName::StakeUnlocked,
            HubEventKind::StakeWithdrawn { .. } => HubEventName::StakeWithdrawn,
            HubEventKind::RelayWorkersAdded { .. } => HubEventName::RelayWorkersAdded,
            HubEventKind::RelayServerRegistered { .. } => HubEventName::RelayServerRegistered,
        }
    }

    /// Chain order: block number first, transaction index breaks ties.
    pub fn is_later_than(&self, other: &HubEvent) -> bool {
        (self.block_number, self.transaction_index) > (other.block_number, other.transaction_index)
    }
}

/// Most recent event by block, then transaction index.
pub fn latest_event<I>(events: I) -> Option<HubEvent>
where
    I: IntoIterator<Item = HubEvent>,
{
    events
        .into_iter()
        .max_by_key(|e| (e.block_number, e.transaction_index))
}

/// Block range for historical event queries. `to_block = None` means latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub from_block: u64,
    pub to_block: Option<u64>,
}

impl EventFilter {
    pub fn since(from_block: u64) -> Self {
        Self {
            from_block,
            to_block: None,
        }
    }
}

/// Hub calls populated by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCall {
    AddRelayWorkers { workers: Vec<Address> },
    RegisterRelayServer { url: String },
}

impl HubCall {
    /// Label used when estimating gas.
    pub fn method_name(&self) -> &'static str {
        match self {
            HubCall::AddRelayWorkers { .. } => "AddRelayWorkers",
            HubCall::RegisterRelayServer { .. } => "RegisterRelay",
        }
    }
}

/// Everything the transaction manager needs to sign, send and record a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTransactionDetails {
    pub signer: Address,
    pub server_action: ServerAction,
    pub destination: Address,
    pub value: U256,
    pub gas_limit: U256,
    /// Left to the transaction manager when unset.
    pub gas_price: Option<U256>,
    pub call: Option<HubCall>,
    pub creation_block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTransaction {
    pub tx_id: H256,
}

/// Read access to balances and hub state.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<U256>;

    async fn get_stake_info(&self, manager: Address) -> Result<StakeInfo>;

    /// Every relay record the hub holds for `manager`.
    async fn get_relay_records(&self, manager: Address) -> Result<Vec<RelayRecord>>;

    /// Past hub events grouped per requested name, each group in chain order.
    async fn get_past_events(
        &self,
        filter: EventFilter,
        names: &[HubEventName],
    ) -> Result<Vec<Vec<HubEvent>>>;

    async fn get_gas_price(&self) -> Result<U256>;
}

/// Signing, broadcasting and ledger bookkeeping of outgoing transactions.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn estimate_gas(&self, call: &HubCall, from: Address) -> Result<U256>;

    async fn send_transaction(&self, details: SendTransactionDetails) -> Result<SentTransaction>;
}
