//! The system allocator underneath the guard layer.
//!
//! [`GuardedAllocator`](crate::GuardedAllocator) never touches memory it did
//! not get from a [`RawHeap`]. Lengths passed here always include the
//! trailing canary.

use std::ffi::c_void;
use std::ptr::NonNull;

/// Byte source for guarded allocations.
///
/// Default alignment only: whatever the backing allocator gives for a plain
/// `malloc`.
pub trait RawHeap {
    /// Allocate `len` bytes, or `None` when the heap is exhausted.
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Resize a block. On `None` the old block is untouched and still owned
    /// by the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this heap whose current length is `old_len`.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>>;

    /// Return a block to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this heap whose current length is `len`.
    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize);
}

/// `malloc` / `realloc` / `free` from the host libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

impl RawHeap for SystemHeap {
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc has no preconditions; a null return is handled.
        let raw = unsafe { libc::malloc(len) };
        NonNull::new(raw.cast::<u8>())
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        _old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees `ptr` is a live malloc block. On failure
        // realloc leaves it untouched.
        let raw = unsafe { libc::realloc(ptr.as_ptr().cast::<c_void>(), new_len) };
        NonNull::new(raw.cast::<u8>())
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, _len: usize) {
        // SAFETY: caller guarantees `ptr` is a live malloc block.
        unsafe { libc::free(ptr.as_ptr().cast::<c_void>()) }
    }
}

/// A [`SystemHeap`] that refuses to hand out more than `budget` bytes at once.
///
/// Lets callers exercise out-of-memory paths deterministically.
#[derive(Debug, Clone, Copy)]
pub struct BudgetHeap {
    budget: usize,
    in_use: usize,
}

impl BudgetHeap {
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self { budget, in_use: 0 }
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.in_use)
    }
}

impl RawHeap for BudgetHeap {
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.remaining() {
            return None;
        }
        let ptr = SystemHeap.allocate(len)?;
        self.in_use += len;
        Some(ptr)
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        let others = self.in_use - old_len;
        if others.checked_add(new_len)? > self.budget {
            return None;
        }
        // SAFETY: forwarded caller contract.
        let moved = unsafe { SystemHeap.reallocate(ptr, old_len, new_len) }?;
        self.in_use = others + new_len;
        Some(moved)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize) {
        self.in_use -= len;
        // SAFETY: forwarded caller contract.
        unsafe { SystemHeap.release(ptr, len) }
    }
}
