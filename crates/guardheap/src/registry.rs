//! Allocation registry: a growable slot table plus a free-slot queue.
//!
//! Slots below `size()` are either live or tombstoned. Tombstones keep the
//! stale address and the site that released them so a repeated release can
//! be told apart from a pointer the registry never saw. A stale address is
//! forgotten as soon as the system heap hands it out again, so at most one
//! tombstone remembers any address. Capacity starts at a
//! fixed slot count, doubles when full and never shrinks.

use std::fmt;
use std::ptr::NonNull;

use serde::Serialize;

use crate::free_list::FreeSlotQueue;
use crate::site::OriginSite;

/// Number of slots reserved on first use.
pub const INITIAL_CAPACITY: usize = 100;

/// Index of a slot in the registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SlotIndex(pub usize);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One user-visible allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Payload start. The buffer behind it is `requested_size + CANARY_SIZE` bytes.
    pub data: NonNull<u8>,
    /// Bytes the caller asked for.
    pub requested_size: usize,
    /// Site of the allocate (or latest reallocate) call.
    pub origin: OriginSite,
}

impl AllocationRecord {
    #[must_use]
    pub fn addr(&self) -> usize {
        self.data.as_ptr() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Live(AllocationRecord),
    /// Released record. Only the stale address survives, and only until a
    /// later record lands on it.
    Tombstone {
        addr: Option<usize>,
        released_at: OriginSite,
    },
}

impl Slot {
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    #[must_use]
    pub fn record(&self) -> Option<&AllocationRecord> {
        match self {
            Self::Live(record) => Some(record),
            Self::Tombstone { .. } => None,
        }
    }
}

/// Slot table could not grow to the wanted number of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExhausted {
    pub wanted_slots: usize,
}

impl CapacityExhausted {
    /// Bytes the failed reservation asked for.
    #[must_use]
    pub fn bytes(self) -> usize {
        self.wanted_slots.saturating_mul(std::mem::size_of::<Slot>())
    }
}

/// Outcome of [`Registry::acquire_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredSlot {
    pub index: SlotIndex,
    /// Taken from the free list rather than appended.
    pub recycled: bool,
    /// New capacity, if the table had to double first.
    pub grew_to: Option<usize>,
}

#[derive(Debug)]
pub struct Registry {
    slots: Vec<Slot>,
    capacity: usize,
    initial_capacity: usize,
    free: FreeSlotQueue,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An uninitialized registry; nothing is reserved until first use.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_initial_capacity(INITIAL_CAPACITY)
    }

    #[must_use]
    pub const fn with_initial_capacity(initial_capacity: usize) -> Self {
        let initial_capacity = if initial_capacity == 0 {
            1
        } else {
            initial_capacity
        };
        Self {
            slots: Vec::new(),
            capacity: 0,
            initial_capacity,
            free: FreeSlotQueue::new(),
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.capacity != 0
    }

    /// Reserve the initial slot table. Returns true if this call did the work.
    pub fn ensure_initialized(&mut self) -> Result<bool, CapacityExhausted> {
        if self.is_initialized() {
            return Ok(false);
        }
        self.slots
            .try_reserve_exact(self.initial_capacity)
            .map_err(|_| CapacityExhausted {
                wanted_slots: self.initial_capacity,
            })?;
        self.capacity = self.initial_capacity;
        Ok(true)
    }

    /// Logical high-water slot count.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn free_list(&self) -> &FreeSlotQueue {
        &self.free
    }

    #[must_use]
    pub fn slot(&self, index: SlotIndex) -> Option<&Slot> {
        self.slots.get(index.0)
    }

    #[must_use]
    pub fn record(&self, index: SlotIndex) -> Option<&AllocationRecord> {
        self.slot(index).and_then(Slot::record)
    }

    /// First live slot whose payload pointer equals `ptr`. Linear in `size()`.
    #[must_use]
    pub fn find_slot_by_pointer(&self, ptr: *const u8) -> Option<SlotIndex> {
        let addr = ptr as usize;
        self.slots
            .iter()
            .position(|slot| matches!(slot, Slot::Live(record) if record.addr() == addr))
            .map(SlotIndex)
    }

    /// First tombstone that still remembers `ptr`, with its release site.
    #[must_use]
    pub fn find_tombstone_by_pointer(&self, ptr: *const u8) -> Option<(SlotIndex, OriginSite)> {
        let addr = ptr as usize;
        self.slots.iter().enumerate().find_map(|(i, slot)| match slot {
            Slot::Tombstone {
                addr: stale,
                released_at,
            } if *stale == Some(addr) => Some((SlotIndex(i), *released_at)),
            _ => None,
        })
    }

    /// Pick the slot for the next record: oldest recycled slot first, else
    /// the next unused index, doubling capacity when the table is full.
    ///
    /// An appended slot is not counted in `size()` until [`Registry::fill`].
    pub fn acquire_slot(&mut self) -> Result<AcquiredSlot, CapacityExhausted> {
        self.ensure_initialized()?;

        if let Some(index) = self.free.pop() {
            debug_assert!(matches!(self.slots[index.0], Slot::Tombstone { .. }));
            return Ok(AcquiredSlot {
                index,
                recycled: true,
                grew_to: None,
            });
        }

        let mut grew_to = None;
        if self.slots.len() == self.capacity {
            let wanted = self.capacity.checked_mul(2).ok_or(CapacityExhausted {
                wanted_slots: usize::MAX,
            })?;
            self.slots
                .try_reserve_exact(wanted - self.slots.len())
                .map_err(|_| CapacityExhausted {
                    wanted_slots: wanted,
                })?;
            self.capacity = wanted;
            grew_to = Some(wanted);
        }

        Ok(AcquiredSlot {
            index: SlotIndex(self.slots.len()),
            recycled: false,
            grew_to,
        })
    }

    /// Hand an acquired-but-unfilled slot back, e.g. when the system heap
    /// refused the bytes for it.
    pub fn abandon_slot(&mut self, acquired: AcquiredSlot) {
        if acquired.recycled {
            self.free.push_front(acquired.index);
        }
    }

    /// Write `record` into an acquired slot, advancing `size()` if the slot
    /// was appended.
    pub fn fill(&mut self, index: SlotIndex, record: AllocationRecord) {
        self.forget_stale_address(record.addr());
        if index.0 == self.slots.len() {
            debug_assert!(self.slots.len() < self.capacity);
            self.slots.push(Slot::Live(record));
        } else {
            debug_assert!(!self.slots[index.0].is_live());
            self.slots[index.0] = Slot::Live(record);
        }
    }

    /// Replace the record in a live slot after its buffer was resized.
    /// Returns false if the slot is not live.
    pub fn update(&mut self, index: SlotIndex, record: AllocationRecord) -> bool {
        if !self.slot(index).is_some_and(Slot::is_live) {
            return false;
        }
        self.forget_stale_address(record.addr());
        self.slots[index.0] = Slot::Live(record);
        true
    }

    fn forget_stale_address(&mut self, addr: usize) {
        for slot in &mut self.slots {
            if let Slot::Tombstone { addr: stale, .. } = slot {
                if *stale == Some(addr) {
                    *stale = None;
                }
            }
        }
    }

    /// Tombstone a live slot and queue it for reuse. Returns the record that
    /// was live there.
    pub fn release_slot(
        &mut self,
        index: SlotIndex,
        released_at: OriginSite,
    ) -> Option<AllocationRecord> {
        let slot = self.slots.get_mut(index.0)?;
        let Slot::Live(record) = *slot else {
            return None;
        };
        *slot = Slot::Tombstone {
            addr: Some(record.addr()),
            released_at,
        };
        self.free.push(index);
        Some(record)
    }

    /// Live records in slot order.
    pub fn live(&self) -> impl Iterator<Item = (SlotIndex, &AllocationRecord)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.record().map(|record| (SlotIndex(i), record)))
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Drain every live record, leaving the table empty but initialized.
    pub fn take_live(&mut self) -> Vec<AllocationRecord> {
        let live = self.live().map(|(_, record)| *record).collect();
        self.slots.clear();
        self.free = FreeSlotQueue::new();
        live
    }
}
