//! Per-thread guarded allocator for code that wants free functions.
//!
//! Each thread lazily gets its own [`GuardedAllocator`] configured from the
//! `GUARDHEAP_*` environment. Pointers must be released on the thread that
//! allocated them; anywhere else they are unknown. Whatever is still live
//! when the thread exits is freed then, after a leak report if
//! `GUARDHEAP_REPORT_ON_DROP` is set.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::allocator::GuardedAllocator;
use crate::error::GuardError;
use crate::report::LeakReport;
use crate::site::OriginSite;

thread_local! {
    static THREAD_ALLOCATOR: RefCell<GuardedAllocator> = RefCell::new(GuardedAllocator::from_env());
}

/// Run `f` against this thread's allocator.
///
/// # Panics
///
/// Panics if called re-entrantly from inside `f`.
pub fn with_thread_allocator<R>(f: impl FnOnce(&mut GuardedAllocator) -> R) -> R {
    THREAD_ALLOCATOR.with(|cell| f(&mut *cell.borrow_mut()))
}

#[track_caller]
pub fn allocate(size: usize) -> Result<NonNull<u8>, GuardError> {
    let site = OriginSite::caller();
    with_thread_allocator(|a| a.allocate_at(size, site))
}

#[track_caller]
pub fn reallocate(ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, GuardError> {
    let site = OriginSite::caller();
    with_thread_allocator(|a| a.reallocate_at(ptr, new_size, site))
}

#[track_caller]
pub fn release(ptr: *mut u8) -> Result<(), GuardError> {
    let site = OriginSite::caller();
    with_thread_allocator(|a| a.release_at(ptr, site))
}

#[track_caller]
pub fn sweep_for_corruption() -> Result<(), GuardError> {
    let site = OriginSite::caller();
    with_thread_allocator(|a| a.sweep_for_corruption_at(site))
}

#[track_caller]
pub fn report_leaks() -> Result<LeakReport, GuardError> {
    let site = OriginSite::caller();
    with_thread_allocator(|a| a.report_leaks_at(site))
}
