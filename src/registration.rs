// src/registration.rs
//! Stake and registration lifecycle of a relay manager
//!
//! Driven once per scan by an external scheduler:
//! 1. Refresh stake figures on StakeAdded / StakeUnlocked / StakeWithdrawn
//! 2. Delay the worker sweep of an unlock until its withdraw block
//! 3. Sweep worker and manager balances to the owner once the stake is withdrawn
//! 4. (Re)register on the hub when stake, balance and lock allow it

use ethers::types::{Address, H256, U256};
use tracing::{debug, info, warn};

use crate::chain::{
    latest_event, EventFilter, HubCall, HubEvent, HubEventKind, HubEventName, RelayRecord,
    SendTransactionDetails,
};
use crate::config::{AppConfig, EnvironmentConfig, ManagerConfig};
use crate::context::ManagerContext;
use crate::delayed::DelayedEventQueue;
use crate::error::{Error, Result};
use crate::ledger::ServerAction;
use crate::metrics;
use crate::notify::ManagerEvent;
use crate::threshold::{bool_string, to_ether, ThresholdRequirement};

const STAKE_EVENTS: [HubEventName; 3] = [
    HubEventName::StakeAdded,
    HubEventName::StakeUnlocked,
    HubEventName::StakeWithdrawn,
];

pub struct RegistrationManager {
    balance_required: ThresholdRequirement,
    stake_required: ThresholdRequirement,
    is_stake_locked: bool,
    is_initialized: bool,
    hub_address: Address,
    manager_address: Address,
    worker_address: Address,
    owner_address: Option<Address>,
    relay_data: Option<RelayRecord>,
    last_worker_added: Option<HubEvent>,
    delayed_events: DelayedEventQueue,
    app: AppConfig,
    environment: EnvironmentConfig,
    ctx: ManagerContext,
}

impl RegistrationManager {
    pub fn new(
        config: &ManagerConfig,
        manager_address: Address,
        worker_address: Address,
        ctx: ManagerContext,
    ) -> Self {
        Self {
            balance_required: ThresholdRequirement::new(
                "Balance",
                config.blockchain.manager_min_balance,
            ),
            stake_required: ThresholdRequirement::new("Stake", config.blockchain.manager_min_stake),
            is_stake_locked: false,
            is_initialized: false,
            hub_address: config.contracts.relay_hub_address,
            manager_address,
            worker_address,
            owner_address: None,
            relay_data: None,
            last_worker_added: None,
            delayed_events: DelayedEventQueue::new(),
            app: config.app.clone(),
            environment: config.environment.clone(),
            ctx,
        }
    }

    /// Cache the most recent worker-added event for this manager. Must run before the first cycle.
    pub async fn init(&mut self) -> Result<()> {
        if self.last_worker_added.is_none() {
            let manager = self.manager_address;
            let groups = self
                .ctx
                .chain
                .get_past_events(EventFilter::since(1), &[HubEventName::RelayWorkersAdded])
                .await?;
            self.last_worker_added = latest_event(
                groups
                    .into_iter()
                    .flatten()
                    .filter(|e| is_workers_added_for(e, manager)),
            );
        }

        self.is_initialized = true;
        info!("✓ Registration manager initialized for {:#x}", self.manager_address);
        Ok(())
    }

    /// Run one scan cycle and return the ids of every transaction submitted.
    pub async fn handle_past_events(
        &mut self,
        hub_events: &[HubEvent],
        last_scanned_block: u64,
        current_block: u64,
        force_registration: bool,
    ) -> Result<Vec<H256>> {
        if !self.is_initialized {
            return Err(Error::NotInitialized);
        }

        let filter = EventFilter::since(last_scanned_block.saturating_add(1));
        let stake_events: Vec<HubEvent> = self
            .ctx
            .chain
            .get_past_events(filter, &STAKE_EVENTS)
            .await?
            .into_iter()
            .flatten()
            .collect();
        print_events(&stake_events, filter.from_block);

        let mut tx_ids = Vec::new();
        for event in stake_events {
            match &event.kind {
                HubEventKind::StakeAdded { .. } => {
                    self.refresh_stake().await?;
                }
                HubEventKind::StakeUnlocked { withdraw_block, .. } => {
                    self.refresh_stake().await?;
                    self.delayed_events.push(*withdraw_block, event.clone());
                }
                HubEventKind::StakeWithdrawn { .. } => {
                    self.refresh_stake().await?;
                    warn!("Handling StakeWithdrawn event: {:?}", event);
                    tx_ids.extend(self.withdraw_all_funds(true, current_block).await?);
                }
                HubEventKind::RelayWorkersAdded { .. }
                | HubEventKind::RelayServerRegistered { .. } => {
                    debug!("Ignoring {} in stake scan", event.name());
                }
            }
        }

        self.relay_data = self.get_relay_data().await?;

        for event in hub_events {
            if !is_workers_added_for(event, self.manager_address) {
                continue;
            }
            let is_newer = self
                .last_worker_added
                .as_ref()
                .map_or(true, |last| event.is_later_than(last));
            if is_newer {
                self.last_worker_added = Some(event.clone());
            }
        }

        while let Some(entry) = self.delayed_events.pop_due(current_block) {
            if !matches!(entry.event.kind, HubEventKind::StakeUnlocked { .. }) {
                debug!("Dropping delayed {} event", entry.event.name());
                continue;
            }
            warn!("Handling StakeUnlocked event: {:?}", entry.event);
            match self.withdraw_all_funds(false, current_block).await {
                Ok(ids) => tx_ids.extend(ids),
                Err(err) => {
                    // Due again on the next cycle
                    self.delayed_events.restore(entry);
                    return Err(err);
                }
            }
        }

        self.refresh_balance().await?;

        let is_registration_correct = self.is_registration_correct();
        let is_registration_pending = self
            .ctx
            .store
            .is_action_pending(ServerAction::RegisterServer, None)
            .await?;
        metrics::REGISTERED.set(self.is_registered() as i64);

        if !(is_registration_pending || is_registration_correct) || force_registration {
            tx_ids.extend(self.attempt_registration(current_block).await?);
        }

        Ok(tx_ids)
    }

    /// The hub's record for this manager, if any.
    pub async fn get_relay_data(&self) -> Result<Option<RelayRecord>> {
        let mut records = self
            .ctx
            .chain
            .get_relay_records(self.manager_address)
            .await?;

        if records.len() > 1 {
            return Err(Error::InconsistentRegistryState {
                manager: self.manager_address,
                records: records.len(),
            });
        }
        Ok(records.pop())
    }

    pub async fn refresh_balance(&mut self) -> Result<()> {
        let balance = self.ctx.chain.get_balance(self.manager_address).await?;
        metrics::MANAGER_BALANCE.set(to_ether(balance));

        if self.balance_required.set_current(balance).is_some() {
            self.print_not_registered_message();
        }
        Ok(())
    }

    pub async fn refresh_stake(&mut self) -> Result<()> {
        let stake_info = self.ctx.chain.get_stake_info(self.manager_address).await?;
        if stake_info.stake.is_zero() {
            return Ok(());
        }

        self.set_stake_locked(stake_info.is_locked());
        metrics::STAKE_AMOUNT.set(to_ether(stake_info.stake));
        if self.stake_required.set_current(stake_info.stake).is_some() {
            self.print_not_registered_message();
        }

        if self.owner_address.is_none() {
            self.owner_address = Some(stake_info.owner);
            info!("Got staked for the first time");
            self.print_not_registered_message();
        }
        Ok(())
    }

    /// Add the worker (when needed) and register the advertised URL on the hub.
    pub async fn attempt_registration(&mut self, current_block: u64) -> Result<Vec<H256>> {
        let all_prerequisites_ok = self.is_stake_locked
            && self.stake_required.is_satisfied()
            && self.balance_required.is_satisfied();
        if !all_prerequisites_ok {
            info!("Not all prerequisites for registration are met yet. Registration attempt cancelled");
            self.print_not_registered_message();
            return Ok(Vec::new());
        }

        let mut tx_ids = Vec::new();

        let add_worker_pending = self
            .ctx
            .store
            .is_action_pending(ServerAction::AddWorker, None)
            .await?;
        if !(self.is_worker_valid() || add_worker_pending) {
            tx_ids.push(self.add_relay_worker(current_block).await?);
        }

        let call = HubCall::RegisterRelayServer {
            url: self.app.registration_url(),
        };
        let tx_id = self
            .send_hub_call(call, ServerAction::RegisterServer, current_block)
            .await?;
        tx_ids.push(tx_id);
        debug!(
            "Relay {:#x} registered on hub {:#x}",
            self.manager_address, self.hub_address
        );

        Ok(tx_ids)
    }

    async fn add_relay_worker(&self, current_block: u64) -> Result<H256> {
        let call = HubCall::AddRelayWorkers {
            workers: vec![self.worker_address],
        };
        self.send_hub_call(call, ServerAction::AddWorker, current_block)
            .await
    }

    async fn send_hub_call(
        &self,
        call: HubCall,
        server_action: ServerAction,
        current_block: u64,
    ) -> Result<H256> {
        let gas_limit = self
            .ctx
            .sender
            .estimate_gas(&call, self.manager_address)
            .await?;

        let details = SendTransactionDetails {
            signer: self.manager_address,
            server_action,
            destination: self.hub_address,
            value: U256::zero(),
            gas_limit,
            gas_price: None,
            call: Some(call),
            creation_block_number: current_block,
        };
        let sent = self.ctx.sender.send_transaction(details).await?;
        metrics::TRANSACTIONS_SUBMITTED.inc();

        info!("✓ {} submitted: tx={:#x}", server_action, sent.tx_id);
        Ok(sent.tx_id)
    }

    /// Sweep the worker balance, and the manager balance when `include_manager`, to the owner.
    pub async fn withdraw_all_funds(
        &mut self,
        include_manager: bool,
        current_block: u64,
    ) -> Result<Vec<H256>> {
        let mut tx_ids = Vec::new();

        tx_ids.extend(
            self.send_balance_to_owner(self.worker_address, "Worker", current_block)
                .await?,
        );
        if include_manager {
            tx_ids.extend(
                self.send_balance_to_owner(self.manager_address, "Manager", current_block)
                    .await?,
            );
        }

        // Once per withdrawal episode, whether or not anything was sent.
        self.ctx.events.emit(ManagerEvent::Unstaked);

        Ok(tx_ids)
    }

    async fn send_balance_to_owner(
        &self,
        from: Address,
        label: &str,
        current_block: u64,
    ) -> Result<Option<H256>> {
        let owner = match self.owner_address {
            Some(owner) => owner,
            None => {
                warn!("{} balance not swept: owner of {:#x} unknown", label, self.manager_address);
                return Ok(None);
            }
        };

        let gas_price = self.ctx.chain.get_gas_price().await?;
        let gas_limit = U256::from(self.environment.min_tx_gas_cost);
        let tx_cost = gas_price.saturating_mul(gas_limit);

        let balance = self.ctx.chain.get_balance(from).await?;
        if balance < tx_cost {
            warn!(
                "{} balance too low: {}, tx cost: {}",
                label, balance, tx_cost
            );
            return Ok(None);
        }

        info!("Sending {} balance {} to owner {:#x}", label, balance, owner);
        let details = SendTransactionDetails {
            signer: from,
            server_action: ServerAction::ValueTransfer,
            destination: owner,
            value: balance - tx_cost,
            gas_limit,
            gas_price: Some(gas_price),
            call: None,
            creation_block_number: current_block,
        };
        let sent = self.ctx.sender.send_transaction(details).await?;
        metrics::TRANSACTIONS_SUBMITTED.inc();

        Ok(Some(sent.tx_id))
    }

    fn set_stake_locked(&mut self, locked: bool) {
        if self.is_stake_locked == locked {
            return;
        }
        self.is_stake_locked = locked;
        metrics::STAKE_LOCKED.set(locked as i64);
        info!(
            "Manager stake is {} locked",
            if locked { "now" } else { "no longer" }
        );
        self.print_not_registered_message();
    }

    /// The cached worker-added event lists this manager's worker.
    fn is_worker_valid(&self) -> bool {
        match self.last_worker_added.as_ref().map(|e| &e.kind) {
            Some(HubEventKind::RelayWorkersAdded {
                new_relay_workers, ..
            }) => new_relay_workers.contains(&self.worker_address),
            _ => false,
        }
    }

    pub fn is_registration_correct(&self) -> bool {
        is_registration_valid(self.relay_data.as_ref(), &self.app, self.manager_address)
    }

    /// Used by readiness checks.
    pub fn is_registered(&self) -> bool {
        self.stake_required.is_satisfied() && self.is_stake_locked && self.is_registration_correct()
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn is_stake_locked(&self) -> bool {
        self.is_stake_locked
    }

    pub fn owner_address(&self) -> Option<Address> {
        self.owner_address
    }

    pub fn relay_data(&self) -> Option<&RelayRecord> {
        self.relay_data.as_ref()
    }

    pub fn last_worker_added(&self) -> Option<&HubEvent> {
        self.last_worker_added.as_ref()
    }

    pub fn delayed_events(&self) -> &DelayedEventQueue {
        &self.delayed_events
    }

    pub fn stake_required(&self) -> &ThresholdRequirement {
        &self.stake_required
    }

    pub fn balance_required(&self) -> &ThresholdRequirement {
        &self.balance_required
    }

    /// Operator-facing table of every registration prerequisite.
    pub fn status_report(&self) -> String {
        let owner = self
            .owner_address
            .map(|o| format!("{:#x}", o))
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Not registered yet. Prerequisites:\n\
             {}\n\
             {}\n\
             Stake locked   | {}\n\
             Manager        | {:#x}\n\
             Worker         | {:#x}\n\
             Owner          | {}",
            self.balance_required.description(),
            self.stake_required.description(),
            bool_string(self.is_stake_locked),
            self.manager_address,
            self.worker_address,
            owner,
        )
    }

    fn print_not_registered_message(&self) {
        if self.is_registration_correct() {
            return;
        }
        info!("\n{}", self.status_report());
    }
}

/// The record names this manager and advertises the configured URL.
pub fn is_registration_valid(
    record: Option<&RelayRecord>,
    app: &AppConfig,
    manager_address: Address,
) -> bool {
    match record {
        Some(record) => {
            record.manager == manager_address && record.url == app.registration_url()
        }
        None => false,
    }
}

fn is_workers_added_for(event: &HubEvent, manager: Address) -> bool {
    matches!(
        &event.kind,
        HubEventKind::RelayWorkersAdded { relay_manager, .. } if *relay_manager == manager
    )
}

fn print_events(events: &[HubEvent], from_block: u64) {
    if events.is_empty() {
        return;
    }
    info!(
        "Handling {} events emitted since block: {}",
        events.len(),
        from_block
    );
    for event in events {
        info!(
            "\nName      | {:<25}\nBlock     | {}\nTxHash    | {:#x}",
            event.name(),
            event.block_number,
            event.transaction_hash
        );
    }
}
