//! Change notifications for store observers.
//!
//! The store emits one [`StoreChange`] per affected row after the journal
//! write for that row's batch has succeeded. Receivers are plain std
//! channels, so a UI thread can drain them at its own pace and apply updates
//! serially without additional locking.

use crate::event::EventId;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Kind of change applied to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new row was inserted.
    Inserted,
    /// An existing row's fields or remote id changed.
    Updated,
    /// A row was removed.
    Deleted,
}

/// A committed change to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Commit sequence of the batch this change belongs to.
    pub sequence: u64,
    /// The affected row.
    pub id: EventId,
    /// What happened to it.
    pub kind: ChangeKind,
}

/// Fan-out of committed changes to subscribers.
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StoreChange>>>,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for all future changes.
    pub fn subscribe(&self) -> Receiver<StoreChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Delivers a committed batch, dropping subscribers that hung up.
    pub fn emit_batch(&self, changes: &[StoreChange]) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| changes.iter().all(|change| tx.send(change.clone()).is_ok()));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
