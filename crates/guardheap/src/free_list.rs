//! FIFO queue of recycled registry slots.
//!
//! Released slots are appended at the tail and handed out again from the
//! head, so reuse is O(1) and the registry never needs compaction.

use std::collections::VecDeque;

use crate::registry::SlotIndex;

#[derive(Debug, Default)]
pub struct FreeSlotQueue {
    slots: VecDeque<SlotIndex>,
}

impl FreeSlotQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: VecDeque::new(),
        }
    }

    /// Enqueue a tombstoned slot at the tail.
    pub fn push(&mut self, index: SlotIndex) {
        debug_assert!(
            !self.slots.contains(&index),
            "slot {index} queued twice on the free list"
        );
        self.slots.push_back(index);
    }

    /// Put a slot back at the head, ahead of everything already queued.
    pub fn push_front(&mut self, index: SlotIndex) {
        debug_assert!(
            !self.slots.contains(&index),
            "slot {index} queued twice on the free list"
        );
        self.slots.push_front(index);
    }

    /// Take the oldest recycled slot, if any.
    pub fn pop(&mut self) -> Option<SlotIndex> {
        self.slots.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn contains(&self, index: SlotIndex) -> bool {
        self.slots.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.slots.iter().copied()
    }
}
