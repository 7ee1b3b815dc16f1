//! One guarded allocator shared between threads behind a single lock.
//!
//! Every registry and free-list mutation happens under the same
//! `parking_lot::Mutex`, so the single-threaded invariants of
//! [`GuardedAllocator`] hold as long as callers only go through this type.
//! Pointers cross threads as plain addresses; callers own the logical
//! lifetime as usual.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::allocator::GuardedAllocator;
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::heap::{RawHeap, SystemHeap};
use crate::metrics::MetricsSnapshot;
use crate::report::LeakReport;
use crate::site::OriginSite;

pub struct SharedGuardedAllocator<H: RawHeap + Send = SystemHeap> {
    inner: Mutex<GuardedAllocator<H>>,
}

impl SharedGuardedAllocator<SystemHeap> {
    #[must_use]
    pub fn with_config(config: GuardConfig) -> Self {
        Self::new(GuardedAllocator::with_config(config))
    }
}

impl<H: RawHeap + Send> SharedGuardedAllocator<H> {
    #[must_use]
    pub fn new(allocator: GuardedAllocator<H>) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    #[track_caller]
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, GuardError> {
        let site = OriginSite::caller();
        self.inner.lock().allocate_at(size, site)
    }

    #[track_caller]
    pub fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, GuardError> {
        let site = OriginSite::caller();
        self.inner.lock().reallocate_at(ptr, new_size, site)
    }

    #[track_caller]
    pub fn release(&self, ptr: *mut u8) -> Result<(), GuardError> {
        let site = OriginSite::caller();
        self.inner.lock().release_at(ptr, site)
    }

    #[track_caller]
    pub fn sweep_for_corruption(&self) -> Result<(), GuardError> {
        let site = OriginSite::caller();
        self.inner.lock().sweep_for_corruption_at(site)
    }

    #[track_caller]
    pub fn report_leaks(&self) -> Result<LeakReport, GuardError> {
        let site = OriginSite::caller();
        self.inner.lock().report_leaks_at(site)
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.inner.lock().live_count()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.lock().metrics()
    }

    /// Run `f` with exclusive access to the underlying allocator.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut GuardedAllocator<H>) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn into_inner(self) -> GuardedAllocator<H> {
        self.inner.into_inner()
    }
}
