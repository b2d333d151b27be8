//! Dense readiness table.
//!
//! Slot 0 belongs to the listener; slots `1..=live()` belong to clients with
//! no gaps. Each slot queues the readiness events delivered for its owner in
//! the current wait cycle. Releasing a slot moves the last slot into the hole,
//! queued events included, so a slot index only identifies a client until the
//! next removal.

use std::collections::VecDeque;

use super::arena::Key;
use crate::transport::ReadEvent;

pub const LISTENER_SLOT: usize = 0;

#[derive(Debug, Default)]
struct Slot {
    owner: Option<Key>,
    pending: VecDeque<ReadEvent>,
}

#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::default()],
        }
    }

    /// Number of client slots in use.
    pub fn live(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn allocate(&mut self, owner: Key) -> usize {
        self.slots.push(Slot {
            owner: Some(owner),
            pending: VecDeque::new(),
        });
        self.slots.len() - 1
    }

    pub fn owner(&self, index: usize) -> Option<Key> {
        self.slots.get(index).and_then(|slot| slot.owner)
    }

    /// Frees `index` and returns the client that was moved into it, if any.
    ///
    /// Events queued for the freed slot are dropped; events queued for the
    /// moved client travel with it.
    pub fn release(&mut self, index: usize) -> Option<Key> {
        if index == LISTENER_SLOT || index >= self.slots.len() {
            return None;
        }
        self.slots.swap_remove(index);
        self.owner(index)
    }

    pub fn push_ready(&mut self, index: usize, event: ReadEvent) {
        if index == LISTENER_SLOT {
            return;
        }
        if let Some(slot) = self.slots.get_mut(index) {
            slot.pending.push_back(event);
        }
    }

    pub fn take_ready(&mut self, index: usize) -> VecDeque<ReadEvent> {
        self.slots
            .get_mut(index)
            .map(|slot| std::mem::take(&mut slot.pending))
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn has_ready(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| !slot.pending.is_empty())
    }

    /// Client owners in slot order.
    pub fn owners(&self) -> impl Iterator<Item = Key> + '_ {
        self.slots.iter().skip(1).filter_map(|slot| slot.owner)
    }
}
