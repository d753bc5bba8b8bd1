use std::sync::{Mutex, MutexGuard, PoisonError};

use dcdn_protocol::{BatchStatus, ItemProgress, ItemState};

use crate::types::UploadItem;

/// Authoritative per-item state for a batch.
///
/// Terminal states are sticky: once an item is Registered, Failed, or
/// Cancelled, later transitions are ignored. Workers and cancellation can
/// therefore race on the same item without regressing it.
#[derive(Debug, Default)]
pub struct ItemTable {
    items: Mutex<Vec<ItemProgress>>,
}

impl ItemTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ItemProgress>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds items in the Pending state.
    pub fn insert(&self, items: &[UploadItem]) {
        let mut table = self.lock();
        table.extend(items.iter().map(|item| ItemProgress {
            item_id: item.id.clone(),
            target_path: item.target_path.clone(),
            state: ItemState::Pending,
            total_bytes: item.size,
            transferred_bytes: 0,
            error: None,
        }));
    }

    fn update<F>(&self, item_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ItemProgress) -> bool,
    {
        let mut table = self.lock();
        table
            .iter_mut()
            .find(|p| p.item_id == item_id)
            .is_some_and(f)
    }

    /// Moves a Pending item to Active. Returns `false` if the item was
    /// not pending (for example, cancelled before a worker reached it).
    pub fn begin(&self, item_id: &str) -> bool {
        self.update(item_id, |p| {
            if p.state != ItemState::Pending {
                return false;
            }
            p.state = ItemState::Active;
            true
        })
    }

    /// Applies a non-terminal-to-`state` transition. Returns `false` if the
    /// item is unknown or already terminal.
    pub fn transition(&self, item_id: &str, state: ItemState) -> bool {
        self.update(item_id, |p| {
            if p.state.is_terminal() {
                return false;
            }
            p.state = state;
            true
        })
    }

    /// Marks an item Failed with a human-readable cause.
    pub fn fail(&self, item_id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(item_id, |p| {
            if p.state.is_terminal() {
                return false;
            }
            p.state = ItemState::Failed;
            p.error = Some(error);
            true
        })
    }

    pub fn set_transferred(&self, item_id: &str, bytes: u64) {
        self.update(item_id, |p| {
            p.transferred_bytes = bytes;
            true
        });
    }

    /// Cancels `item_id` if it is still Pending.
    pub fn cancel_pending(&self, item_id: &str) -> bool {
        self.update(item_id, |p| {
            if p.state != ItemState::Pending {
                return false;
            }
            p.state = ItemState::Cancelled;
            true
        })
    }

    /// Cancels every Pending item and returns how many changed.
    pub fn cancel_all_pending(&self) -> usize {
        let mut table = self.lock();
        let mut count = 0;
        for p in table.iter_mut().filter(|p| p.state == ItemState::Pending) {
            p.state = ItemState::Cancelled;
            count += 1;
        }
        count
    }

    pub fn get(&self, item_id: &str) -> Option<ItemProgress> {
        self.lock().iter().find(|p| p.item_id == item_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<ItemProgress> {
        self.lock().clone()
    }

    pub fn status(&self) -> BatchStatus {
        BatchStatus::from_states(self.lock().iter().map(|p| p.state))
    }
}
