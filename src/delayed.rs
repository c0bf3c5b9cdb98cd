// src/delayed.rs
//! Events whose handling must wait for a future block

use crate::chain::HubEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedEvent {
    pub due_block: u64,
    pub event: HubEvent,
}

/// Insertion-ordered queue of delayed events.
#[derive(Debug, Default)]
pub struct DelayedEventQueue {
    entries: Vec<DelayedEvent>,
}

impl DelayedEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, due_block: u64, event: HubEvent) {
        self.entries.push(DelayedEvent { due_block, event });
    }

    /// Remove and return the oldest entry due at or before `current_block`.
    pub fn pop_due(&mut self, current_block: u64) -> Option<DelayedEvent> {
        let index = self
            .entries
            .iter()
            .position(|e| e.due_block <= current_block)?;
        Some(self.entries.remove(index))
    }

    /// Put back an entry whose handling failed; it is the next one due.
    pub fn restore(&mut self, entry: DelayedEvent) {
        self.entries.insert(0, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DelayedEvent> {
        self.entries.iter()
    }
}
