// src/context.rs
//! Collaborators shared by the registration manager and the replenisher

use std::sync::Arc;

use crate::chain::{ChainReader, TransactionSender};
use crate::ledger::TxStore;
use crate::notify::EventSink;

#[derive(Clone)]
pub struct ManagerContext {
    pub chain: Arc<dyn ChainReader>,
    pub sender: Arc<dyn TransactionSender>,
    pub store: Arc<dyn TxStore>,
    pub events: Arc<dyn EventSink>,
}

impl ManagerContext {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        sender: Arc<dyn TransactionSender>,
        store: Arc<dyn TxStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            chain,
            sender,
            store,
            events,
        }
    }
}
