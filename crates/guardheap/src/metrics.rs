//! Atomic counters for allocator observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-allocator operation counters.
#[derive(Debug)]
pub struct AllocatorMetrics {
    /// Successful allocate calls (including null-pointer reallocates).
    pub allocations: AtomicU64,
    /// Successful in-place or moving reallocates.
    pub reallocations: AtomicU64,
    /// Successful releases.
    pub releases: AtomicU64,
    /// Global corruption sweeps run.
    pub sweeps: AtomicU64,
    /// Individual canary validations.
    pub canary_checks: AtomicU64,
    /// Canary validations that found corruption.
    pub canary_failures: AtomicU64,
    /// Allocations placed in a recycled slot.
    pub slot_reuses: AtomicU64,
    /// Times the slot table doubled.
    pub registry_growths: AtomicU64,
    /// Fatal conditions reported.
    pub fatal_errors: AtomicU64,
    /// Payload bytes currently live.
    pub live_bytes: AtomicU64,
    /// High-water mark of `live_bytes`.
    pub peak_live_bytes: AtomicU64,
}

impl AllocatorMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            reallocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            canary_checks: AtomicU64::new(0),
            canary_failures: AtomicU64::new(0),
            slot_reuses: AtomicU64::new(0),
            registry_growths: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
            peak_live_bytes: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Account for live payload bytes moving from `old` to `new`.
    pub fn track_live_bytes(&self, old: usize, new: usize) {
        let live = if new >= old {
            self.live_bytes
                .fetch_add((new - old) as u64, Ordering::Relaxed)
                + (new - old) as u64
        } else {
            self.live_bytes
                .fetch_sub((old - new) as u64, Ordering::Relaxed)
                - (old - new) as u64
        };
        self.peak_live_bytes.fetch_max(live, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            reallocations: Self::get(&self.reallocations),
            releases: Self::get(&self.releases),
            sweeps: Self::get(&self.sweeps),
            canary_checks: Self::get(&self.canary_checks),
            canary_failures: Self::get(&self.canary_failures),
            slot_reuses: Self::get(&self.slot_reuses),
            registry_growths: Self::get(&self.registry_growths),
            fatal_errors: Self::get(&self.fatal_errors),
            live_bytes: Self::get(&self.live_bytes),
            peak_live_bytes: Self::get(&self.peak_live_bytes),
        }
    }
}

impl Default for AllocatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub reallocations: u64,
    pub releases: u64,
    pub sweeps: u64,
    pub canary_checks: u64,
    pub canary_failures: u64,
    pub slot_reuses: u64,
    pub registry_growths: u64,
    pub fatal_errors: u64,
    pub live_bytes: u64,
    pub peak_live_bytes: u64,
}
