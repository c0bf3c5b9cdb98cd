// src/mock.rs
//! In-process chain used by unit tests
//!
//! Submitted transactions are recorded and written to the ledger the same way the
//! real transaction manager does, so pending-action checks behave as in production.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chain::{
    ChainReader, EventFilter, HubCall, HubEvent, HubEventName, RelayRecord,
    SendTransactionDetails, SentTransaction, StakeInfo, TransactionSender,
};
use crate::error::Result;
use crate::ledger::{StoredTransaction, TxStore};

#[derive(Default)]
pub struct MockState {
    pub balances: HashMap<Address, U256>,
    pub stake: StakeInfo,
    pub relay_records: Vec<RelayRecord>,
    pub events: Vec<HubEvent>,
    pub gas_price: U256,
    pub gas_estimate: U256,
    pub sent: Vec<SendTransactionDetails>,
    pub fail_reads: bool,
    pub fail_gas_price: bool,
    next_tx: u64,
    nonces: HashMap<Address, u64>,
}

pub struct MockChain {
    state: Mutex<MockState>,
    store: Arc<dyn TxStore>,
}

impl MockChain {
    pub fn new(store: Arc<dyn TxStore>) -> Self {
        let state = MockState {
            gas_price: U256::one(),
            gas_estimate: U256::from(100_000),
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
            store,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn push_event(&self, event: HubEvent) {
        self.state().events.push(event);
    }

    pub fn sent(&self) -> Vec<SendTransactionDetails> {
        self.state().sent.clone()
    }

    /// Mark every ledger record as mined at `block`.
    pub async fn mine_all(&self, block: u64) {
        for mut tx in self.store.get_all().await.unwrap() {
            tx.mined_block_number = Some(block);
            self.store.put_tx(&tx, true).await.unwrap();
        }
    }

    fn check_reads(&self) -> Result<()> {
        if self.state().fail_reads {
            return Err(anyhow::anyhow!("rpc unavailable").into());
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.check_reads()?;
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_stake_info(&self, _manager: Address) -> Result<StakeInfo> {
        self.check_reads()?;
        Ok(self.state().stake.clone())
    }

    async fn get_relay_records(&self, manager: Address) -> Result<Vec<RelayRecord>> {
        self.check_reads()?;
        Ok(self
            .state()
            .relay_records
            .iter()
            .filter(|r| r.manager == manager)
            .cloned()
            .collect())
    }

    async fn get_past_events(
        &self,
        filter: EventFilter,
        names: &[HubEventName],
    ) -> Result<Vec<Vec<HubEvent>>> {
        self.check_reads()?;
        let state = self.state();
        let groups = names
            .iter()
            .map(|name| {
                let mut group: Vec<HubEvent> = state
                    .events
                    .iter()
                    .filter(|e| e.name() == *name)
                    .filter(|e| e.block_number >= filter.from_block)
                    .filter(|e| filter.to_block.map_or(true, |to| e.block_number <= to))
                    .cloned()
                    .collect();
                group.sort_by_key(|e| (e.block_number, e.transaction_index));
                group
            })
            .collect();
        Ok(groups)
    }

    async fn get_gas_price(&self) -> Result<U256> {
        self.check_reads()?;
        if self.state().fail_gas_price {
            return Err(anyhow::anyhow!("gas price unavailable").into());
        }
        Ok(self.state().gas_price)
    }
}

#[async_trait]
impl TransactionSender for MockChain {
    async fn estimate_gas(&self, _call: &HubCall, _from: Address) -> Result<U256> {
        Ok(self.state().gas_estimate)
    }

    async fn send_transaction(&self, details: SendTransactionDetails) -> Result<SentTransaction> {
        let stored = {
            let mut state = self.state();
            state.next_tx += 1;
            let tx_id = H256::from_low_u64_be(state.next_tx);
            let gas_price = details.gas_price.unwrap_or(state.gas_price);
            let nonce = {
                let next = state.nonces.entry(details.signer).or_insert(0);
                let nonce = *next;
                *next += 1;
                nonce
            };
            let stored = StoredTransaction {
                tx_id,
                from: details.signer,
                to: Some(details.destination),
                gas_limit: details.gas_limit,
                gas_price,
                data: None,
                nonce,
                server_action: details.server_action,
                attempts: 1,
                creation_block_number: details.creation_block_number,
                boost_block_number: None,
                mined_block_number: None,
            };
            state.sent.push(details);
            stored
        };

        self.store.put_tx(&stored, false).await?;
        Ok(SentTransaction {
            tx_id: stored.tx_id,
        })
    }
}
