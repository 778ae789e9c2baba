//! Per-document advisory locks.
//!
//! Two classifications of the same bytes must not both decide "unique", so
//! every operation that reads then writes a record holds the lock for that
//! record's id. Unrelated ids never contend. Slots exist only while someone
//! holds or waits on them.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use canonical::DocumentId;
use dashmap::DashMap;

#[derive(Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

#[derive(Default)]
pub struct HashLocks {
    slots: DashMap<DocumentId, Arc<Slot>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `id` is free, then hold it until the guard drops.
    pub fn acquire(&self, id: &DocumentId) -> HashLockGuard<'_> {
        let slot = self
            .slots
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Slot::default()))
            .clone();
        {
            let mut held = slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            while *held {
                held = slot
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *held = true;
        }
        HashLockGuard {
            locks: self,
            id: id.clone(),
            slot,
        }
    }

    /// Number of ids currently held or waited on.
    pub fn active(&self) -> usize {
        self.slots.len()
    }
}

pub struct HashLockGuard<'a> {
    locks: &'a HashLocks,
    id: DocumentId,
    slot: Arc<Slot>,
}

impl Drop for HashLockGuard<'_> {
    fn drop(&mut self) {
        {
            let mut held = self.slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            *held = false;
        }
        self.slot.released.notify_one();
        // Only the map and this guard reference the slot: nobody is waiting.
        self.locks
            .slots
            .remove_if(&self.id, |_, slot| Arc::strong_count(slot) == 2);
    }
}
