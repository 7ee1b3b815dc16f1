//! Trailing canary bytes for buffer overflow detection.
//!
//! Every guarded allocation is laid out as:
//! `[payload: user_size bytes | canary: CANARY_SIZE bytes]`
//!
//! The canary is a fixed sentinel. A write that runs past the payload
//! clobbers it, and the next check over that allocation notices.

use crate::error::GuardError;

/// Size of the trailing canary appended to allocations.
pub const CANARY_SIZE: usize = 4;

/// The sentinel pattern written after every payload.
pub const CANARY: [u8; CANARY_SIZE] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Byte used to fill fresh payloads so uninitialized reads stand out.
pub const ALLOC_POISON: u8 = 0xCC;

/// Byte used to fill payloads right before they go back to the system heap.
pub const RELEASE_POISON: u8 = 0xDD;

/// Total bytes needed for a payload of `user_size` plus its canary.
///
/// Fails with [`GuardError::InvalidSize`] instead of wrapping.
pub fn guarded_len(user_size: usize) -> Result<usize, GuardError> {
    user_size
        .checked_add(CANARY_SIZE)
        .ok_or(GuardError::InvalidSize {
            size: user_size,
            site: None,
        })
}

/// Write the canary at `user_size` in `buffer`.
///
/// Fails with [`GuardError::InvalidSize`] if `user_size + CANARY_SIZE`
/// overflows.
///
/// # Panics
///
/// Panics if `buffer` is shorter than `user_size + CANARY_SIZE`.
pub fn append_canary(buffer: &mut [u8], user_size: usize) -> Result<(), GuardError> {
    let end = guarded_len(user_size)?;
    buffer[user_size..end].copy_from_slice(&CANARY);
    Ok(())
}

/// Returns true if `buffer[user_size..user_size + CANARY_SIZE]` still holds
/// the canary. A guard region that would end past `usize::MAX` is never intact.
#[must_use]
pub fn canary_intact(buffer: &[u8], user_size: usize) -> bool {
    let Ok(end) = guarded_len(user_size) else {
        return false;
    };
    buffer
        .get(user_size..end)
        .is_some_and(|bytes| bytes == CANARY)
}

/// Write the canary directly behind a raw payload.
///
/// # Safety
///
/// `payload` must be valid for writes of `user_size + CANARY_SIZE` bytes.
pub unsafe fn write_canary_raw(payload: *mut u8, user_size: usize) {
    // SAFETY: caller guarantees the guard region is inside the allocation.
    unsafe {
        std::ptr::copy_nonoverlapping(CANARY.as_ptr(), payload.add(user_size), CANARY_SIZE);
    }
}

/// Read back the guard region behind a raw payload and compare it.
///
/// # Safety
///
/// `payload` must be valid for reads of `user_size + CANARY_SIZE` bytes.
#[must_use]
pub unsafe fn canary_intact_raw(payload: *const u8, user_size: usize) -> bool {
    let mut actual = [0u8; CANARY_SIZE];
    // SAFETY: caller guarantees the guard region is inside the allocation.
    unsafe {
        std::ptr::copy_nonoverlapping(payload.add(user_size), actual.as_mut_ptr(), CANARY_SIZE);
    }
    actual == CANARY
}
