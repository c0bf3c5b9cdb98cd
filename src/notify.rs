// src/notify.rs
//! Fire-and-forget notifications for operators

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Funds were swept back to the owner after unstaking.
    Unstaked,
    /// The manager cannot afford to top up its worker.
    FundingNeeded { message: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ManagerEvent);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::Unstaked => warn!("Manager unstaked, funds returned to owner"),
            ManagerEvent::FundingNeeded { message } => warn!("Funding needed: {}", message),
        }
    }
}

impl EventSink for UnboundedSender<ManagerEvent> {
    fn emit(&self, event: ManagerEvent) {
        if self.send(event).is_err() {
            debug!("No listener for manager events");
        }
    }
}
