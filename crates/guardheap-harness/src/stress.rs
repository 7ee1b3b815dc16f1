//! Deterministic allocate / reallocate / release pressure.
//!
//! A seeded xorshift generator picks one of `slots` user handles per step and
//! either allocates into it, resizes it, releases it or re-reads its payload.
//! Every payload is filled with a per-handle byte so silent data loss shows
//! up as a [`HarnessError::PayloadMismatch`].

use guardheap::{GuardConfig, GuardError, GuardedAllocator, MetricsSnapshot, NullSink};
use serde::Serialize;

use crate::error::HarnessError;

/// Largest payload the runner asks for.
pub const MAX_PAYLOAD: usize = 1024;

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// A zero seed would stay zero forever, so it is remapped.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressConfig {
    pub seed: u64,
    pub steps: usize,
    pub slots: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: 0xDEAD_BEEF,
            steps: 10_000,
            slots: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub config: StressConfig,
    pub live_at_end: usize,
    pub registry_size: usize,
    pub registry_capacity: usize,
    pub leaks_reported: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone, Copy)]
struct Handle {
    ptr: *mut u8,
    size: usize,
    fill: u8,
}

/// Run the sequence described by `config`, then release whatever is left.
pub fn run_stress(config: &StressConfig) -> Result<StressReport, HarnessError> {
    let mut alloc = GuardedAllocator::with_config(GuardConfig::recoverable()).with_sink(NullSink);
    let mut rng = XorShift64::new(config.seed);
    let slots = config.slots.max(1);
    let mut handles: Vec<Option<Handle>> = vec![None; slots];

    for step in 0..config.steps {
        let i = rng.gen_range_usize(0, slots - 1);
        let op = rng.gen_range_usize(0, 9);
        let stress = |source: GuardError| HarnessError::Stress { step, source };

        match (handles[i], op) {
            (Some(handle), 0..=3) => {
                alloc.release(handle.ptr).map_err(stress)?;
                handles[i] = None;
            }
            (Some(handle), 4..=6) => {
                let new_size = rng.gen_range_usize(0, MAX_PAYLOAD);
                let moved = alloc.reallocate(handle.ptr, new_size).map_err(stress)?;
                let kept = handle.size.min(new_size);
                let payload = alloc
                    .payload_mut(moved.as_ptr())
                    .ok_or(HarnessError::PayloadMismatch { step, slot: i })?;
                if payload[..kept].iter().any(|&b| b != handle.fill) {
                    return Err(HarnessError::PayloadMismatch { step, slot: i });
                }
                payload.fill(handle.fill);
                handles[i] = Some(Handle {
                    ptr: moved.as_ptr(),
                    size: new_size,
                    fill: handle.fill,
                });
            }
            (Some(handle), _) => {
                let intact = alloc
                    .payload(handle.ptr)
                    .is_some_and(|p| p.len() == handle.size && p.iter().all(|&b| b == handle.fill));
                if !intact {
                    return Err(HarnessError::PayloadMismatch { step, slot: i });
                }
            }
            (None, _) => {
                let size = rng.gen_range_usize(0, MAX_PAYLOAD);
                let fill = (rng.next_u64() & 0xFF) as u8;
                let ptr = alloc.allocate(size).map_err(stress)?;
                if let Some(payload) = alloc.payload_mut(ptr.as_ptr()) {
                    payload.fill(fill);
                }
                handles[i] = Some(Handle {
                    ptr: ptr.as_ptr(),
                    size,
                    fill,
                });
            }
        }
    }

    let live_at_end = alloc.live_count();
    let registry_size = alloc.registry_size();
    let registry_capacity = alloc.registry_capacity();
    let leaks_reported = alloc.report_leaks()?.count();
    for handle in handles.into_iter().flatten() {
        alloc.release(handle.ptr)?;
    }

    Ok(StressReport {
        config: *config,
        live_at_end,
        registry_size,
        registry_capacity,
        leaks_reported,
        metrics: alloc.metrics(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_report() {
        let config = StressConfig {
            seed: 7,
            steps: 500,
            slots: 16,
        };
        let a = run_stress(&config).unwrap();
        let b = run_stress(&config).unwrap();
        assert_eq!(a.metrics.allocations, b.metrics.allocations);
        assert_eq!(a.metrics.releases, b.metrics.releases);
        assert_eq!(a.registry_size, b.registry_size);
        assert_eq!(a.live_at_end, a.leaks_reported);
    }

    #[test]
    fn everything_is_released_at_the_end() {
        let report = run_stress(&StressConfig {
            seed: 1,
            steps: 2_000,
            slots: 32,
        })
        .unwrap();
        assert_eq!(report.metrics.live_bytes, 0);
        assert_eq!(report.metrics.canary_failures, 0);
        assert_eq!(report.metrics.fatal_errors, 0);
        assert!(report.registry_size <= 32);
        assert!(report.registry_size <= report.registry_capacity);
    }

    #[test]
    fn zero_slots_still_runs() {
        let report = run_stress(&StressConfig {
            seed: 0,
            steps: 10,
            slots: 0,
        })
        .unwrap();
        assert!(report.registry_size <= 1);
    }

    #[test]
    fn generator_is_deterministic() {
        let mut a = XorShift64::new(42);
        let mut b = XorShift64::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        assert_ne!(XorShift64::new(0).next_u64(), 0);
    }
}
