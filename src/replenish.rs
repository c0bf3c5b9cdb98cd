// src/replenish.rs
//! Keeps the worker funded from the manager balance

use ethers::types::{Address, H256, U256};
use tracing::{debug, info};

use crate::chain::SendTransactionDetails;
use crate::config::ManagerConfig;
use crate::context::ManagerContext;
use crate::error::Result;
use crate::ledger::ServerAction;
use crate::metrics;
use crate::notify::ManagerEvent;
use crate::threshold::{format_amount, to_ether, ThresholdRequirement};

/// Balances and ledger state a replenish decision is made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplenishInput {
    pub manager_balance: U256,
    pub manager_min_balance: U256,
    pub worker_balance: U256,
    pub worker_target_balance: U256,
    pub transfer_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplenishDecision {
    NothingToDo,
    AlreadyPending,
    Transfer { amount: U256 },
    FundingNeeded { refill: U256, available: U256 },
}

/// Decide whether to move funds from manager to worker.
///
/// A refill is only sent when it leaves the manager strictly above its minimum.
pub fn decide(input: &ReplenishInput) -> ReplenishDecision {
    if input.worker_balance >= input.worker_target_balance {
        return ReplenishDecision::NothingToDo;
    }

    if input.transfer_pending {
        return ReplenishDecision::AlreadyPending;
    }

    let refill = input.worker_target_balance - input.worker_balance;
    let available = input
        .manager_balance
        .saturating_sub(input.manager_min_balance);
    if refill < available {
        ReplenishDecision::Transfer { amount: refill }
    } else {
        ReplenishDecision::FundingNeeded { refill, available }
    }
}

pub struct Replenisher {
    worker_balance_required: ThresholdRequirement,
    manager_min_balance: U256,
    min_tx_gas_cost: u64,
    manager_address: Address,
    worker_address: Address,
    ctx: ManagerContext,
}

impl Replenisher {
    pub fn new(
        config: &ManagerConfig,
        manager_address: Address,
        worker_address: Address,
        ctx: ManagerContext,
    ) -> Self {
        Self {
            worker_balance_required: ThresholdRequirement::new(
                "Worker balance",
                config.blockchain.worker_target_balance,
            ),
            manager_min_balance: config.blockchain.manager_min_balance,
            min_tx_gas_cost: config.environment.min_tx_gas_cost,
            manager_address,
            worker_address,
            ctx,
        }
    }

    pub fn worker_balance_required(&self) -> &ThresholdRequirement {
        &self.worker_balance_required
    }

    /// One replenish tick. Returns the ids of submitted transfers.
    pub async fn replenish(&mut self, current_block: u64) -> Result<Vec<H256>> {
        let manager_balance = self.ctx.chain.get_balance(self.manager_address).await?;
        let worker_balance = self.ctx.chain.get_balance(self.worker_address).await?;
        self.worker_balance_required.set_current(worker_balance);
        metrics::MANAGER_BALANCE.set(to_ether(manager_balance));
        metrics::WORKER_BALANCE.set(to_ether(worker_balance));

        let transfer_pending = self
            .ctx
            .store
            .is_action_pending(ServerAction::ValueTransfer, Some(self.worker_address))
            .await?;

        let input = ReplenishInput {
            manager_balance,
            manager_min_balance: self.manager_min_balance,
            worker_balance,
            worker_target_balance: self.worker_balance_required.required(),
            transfer_pending,
        };

        match decide(&input) {
            ReplenishDecision::NothingToDo => Ok(Vec::new()),
            ReplenishDecision::AlreadyPending => {
                debug!("Worker refill already pending for {:#x}", self.worker_address);
                Ok(Vec::new())
            }
            ReplenishDecision::Transfer { amount } => {
                info!(
                    "Replenishing worker {:#x}\nManager balance: {}\n{}\nRefill: {}",
                    self.worker_address,
                    format_amount(manager_balance),
                    self.worker_balance_required.description(),
                    format_amount(amount),
                );
                let details = SendTransactionDetails {
                    signer: self.manager_address,
                    server_action: ServerAction::ValueTransfer,
                    destination: self.worker_address,
                    value: amount,
                    gas_limit: U256::from(self.min_tx_gas_cost),
                    gas_price: None,
                    call: None,
                    creation_block_number: current_block,
                };
                let sent = self.ctx.sender.send_transaction(details).await?;
                metrics::TRANSACTIONS_SUBMITTED.inc();
                info!("✓ Worker refill submitted: tx={:#x}", sent.tx_id);
                Ok(vec![sent.tx_id])
            }
            ReplenishDecision::FundingNeeded { refill, available } => {
                let message = format!(
                    "Manager balance too low to refill worker {:#x}: refill {}, spendable {}",
                    self.worker_address,
                    format_amount(refill),
                    format_amount(available),
                );
                info!("{}", message);
                metrics::FUNDING_NEEDED.inc();
                self.ctx.events.emit(ManagerEvent::FundingNeeded { message });
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, BlockchainConfig, ContractsConfig, EnvironmentConfig};
    use crate::ledger::SqliteTxStore;
    use crate::mock::MockChain;
    use ethers::utils::parse_ether;
    use std::sync::Arc;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn ether(value: &str) -> U256 {
        parse_ether(value).unwrap()
    }

    fn input(manager: &str, worker: &str) -> ReplenishInput {
        ReplenishInput {
            manager_balance: ether(manager),
            manager_min_balance: ether("1.0"),
            worker_balance: ether(worker),
            worker_target_balance: ether("1.0"),
            transfer_pending: false,
        }
    }

    #[test]
    fn test_refill_within_manager_surplus() {
        assert_eq!(
            decide(&input("5.0", "0.1")),
            ReplenishDecision::Transfer {
                amount: ether("0.9")
            }
        );
    }

    #[test]
    fn test_refill_exceeding_surplus_needs_funding() {
        assert_eq!(
            decide(&input("1.05", "0.1")),
            ReplenishDecision::FundingNeeded {
                refill: ether("0.9"),
                available: ether("0.05"),
            }
        );
    }

    #[test]
    fn test_refill_equal_to_surplus_needs_funding() {
        assert!(matches!(
            decide(&input("1.9", "0.1")),
            ReplenishDecision::FundingNeeded { .. }
        ));
    }

    #[test]
    fn test_manager_below_minimum_needs_funding() {
        assert_eq!(
            decide(&input("0.5", "0.1")),
            ReplenishDecision::FundingNeeded {
                refill: ether("0.9"),
                available: U256::zero(),
            }
        );
    }

    #[test]
    fn test_funded_worker_is_left_alone() {
        assert_eq!(decide(&input("5.0", "1.0")), ReplenishDecision::NothingToDo);
        assert_eq!(decide(&input("1.5", "1.2")), ReplenishDecision::NothingToDo);
    }

    #[test]
    fn test_pending_transfer_blocks_refill() {
        let mut pending = input("5.0", "0.1");
        pending.transfer_pending = true;
        assert_eq!(decide(&pending), ReplenishDecision::AlreadyPending);
    }

    fn manager() -> Address {
        Address::repeat_byte(0x11)
    }

    fn worker() -> Address {
        Address::repeat_byte(0x22)
    }

    async fn setup(
        manager_balance: &str,
        worker_balance: &str,
    ) -> (Replenisher, Arc<MockChain>, UnboundedReceiver<ManagerEvent>) {
        let config = ManagerConfig {
            app: AppConfig {
                url: "http://relay.test".to_string(),
                port: 0,
                workdir: Default::default(),
                in_memory: true,
            },
            blockchain: BlockchainConfig {
                manager_min_balance: ether("1.0"),
                manager_min_stake: ether("1.0"),
                manager_target_balance: ether("2.0"),
                worker_target_balance: ether("1.0"),
            },
            contracts: ContractsConfig {
                relay_hub_address: Address::repeat_byte(0x44),
            },
            environment: EnvironmentConfig::default(),
        };

        let store = Arc::new(SqliteTxStore::in_memory().await.unwrap());
        let chain = Arc::new(MockChain::new(store.clone()));
        chain.set_balance(manager(), ether(manager_balance));
        chain.set_balance(worker(), ether(worker_balance));

        let (sink, events) = unbounded_channel();
        let ctx = ManagerContext::new(chain.clone(), chain.clone(), store, Arc::new(sink));
        let replenisher = Replenisher::new(&config, manager(), worker(), ctx);
        (replenisher, chain, events)
    }

    #[tokio::test]
    async fn test_replenish_submits_transfer_once() {
        let (mut replenisher, chain, _events) = setup("5.0", "0.1").await;

        let tx_ids = replenisher.replenish(10).await.unwrap();

        assert_eq!(tx_ids.len(), 1);
        let sent = chain.sent();
        assert_eq!(sent[0].signer, manager());
        assert_eq!(sent[0].destination, worker());
        assert_eq!(sent[0].value, ether("0.9"));
        assert_eq!(sent[0].gas_limit, U256::from(21_000));
        assert_eq!(sent[0].server_action, ServerAction::ValueTransfer);
        assert!(!replenisher.worker_balance_required().is_satisfied());

        // unmined transfer still in the ledger
        assert!(replenisher.replenish(11).await.unwrap().is_empty());
        assert_eq!(chain.sent().len(), 1);

        chain.mine_all(12).await;
        assert_eq!(replenisher.replenish(13).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replenish_reports_funding_needed() {
        let (mut replenisher, chain, mut events) = setup("1.05", "0.1").await;

        let tx_ids = replenisher.replenish(10).await.unwrap();

        assert!(tx_ids.is_empty());
        assert!(chain.sent().is_empty());
        match events.try_recv().unwrap() {
            ManagerEvent::FundingNeeded { message } => {
                assert!(message.contains("0.9000"));
                assert!(message.contains("0.0500"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
