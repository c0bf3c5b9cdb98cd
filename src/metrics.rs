// src/metrics.rs
//! Prometheus metrics

use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref STAKE_AMOUNT: Gauge =
        Gauge::new("manager_stake", "Current manager stake (ether)").unwrap();
    pub static ref MANAGER_BALANCE: Gauge =
        Gauge::new("manager_balance", "Current manager balance (ether)").unwrap();
    pub static ref WORKER_BALANCE: Gauge =
        Gauge::new("worker_balance", "Current worker balance (ether)").unwrap();
    pub static ref STAKE_LOCKED: IntGauge =
        IntGauge::new("stake_locked", "1 while the manager stake is locked").unwrap();
    pub static ref REGISTERED: IntGauge =
        IntGauge::new("registered", "1 while the hub registration is correct").unwrap();
    pub static ref TRANSACTIONS_SUBMITTED: IntCounter =
        IntCounter::new("transactions_submitted", "Transactions submitted by the manager").unwrap();
    pub static ref FUNDING_NEEDED: IntCounter =
        IntCounter::new("funding_needed", "Replenish attempts declined for lack of funds").unwrap();
}

/// Add every metric to [`REGISTRY`]. Safe to call more than once.
pub fn register() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(STAKE_AMOUNT.clone()),
        Box::new(MANAGER_BALANCE.clone()),
        Box::new(WORKER_BALANCE.clone()),
        Box::new(STAKE_LOCKED.clone()),
        Box::new(REGISTERED.clone()),
        Box::new(TRANSACTIONS_SUBMITTED.clone()),
        Box::new(FUNDING_NEEDED.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeated calls
        let _ = REGISTRY.register(collector);
    }
}

/// Render the registry in the Prometheus text format.
pub fn gather() -> String {
    register();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
