//! Corruption sweep and leak accounting over the registry.
//!
//! These are the read-only halves of the reporter. The allocator decides what
//! to emit and whether a finding is fatal.

use serde::Serialize;

use crate::canary::canary_intact_raw;
use crate::metrics::AllocatorMetrics;
use crate::registry::{AllocationRecord, Registry, SlotIndex};
use crate::site::OriginSite;

/// One allocation whose canary no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CorruptionReport {
    pub slot: SlotIndex,
    pub addr: usize,
    pub size: usize,
    /// Where the damaged allocation was made, not where the damage was noticed.
    pub origin: OriginSite,
}

impl CorruptionReport {
    #[must_use]
    pub fn from_record(slot: SlotIndex, record: &AllocationRecord) -> Self {
        Self {
            slot,
            addr: record.addr(),
            size: record.requested_size,
            origin: record.origin,
        }
    }
}

/// One allocation still live when leaks were counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeakRecord {
    pub slot: SlotIndex,
    pub addr: usize,
    pub size: usize,
    pub origin: OriginSite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    pub leaks: Vec<LeakRecord>,
    pub total_bytes: usize,
}

impl LeakReport {
    #[must_use]
    pub fn count(&self) -> usize {
        self.leaks.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }
}

/// Check the canary of one live record.
pub(crate) fn check_record(record: &AllocationRecord, metrics: &AllocatorMetrics) -> bool {
    AllocatorMetrics::inc(&metrics.canary_checks);
    // SAFETY: every live record owns `requested_size + CANARY_SIZE` bytes
    // starting at `data`.
    let intact = unsafe { canary_intact_raw(record.data.as_ptr(), record.requested_size) };
    if !intact {
        AllocatorMetrics::inc(&metrics.canary_failures);
    }
    intact
}

/// Validate every live canary, collecting all failures.
pub(crate) fn scan_for_corruption(
    registry: &Registry,
    metrics: &AllocatorMetrics,
) -> Vec<CorruptionReport> {
    AllocatorMetrics::inc(&metrics.sweeps);
    registry
        .live()
        .filter(|(_, record)| !check_record(record, metrics))
        .map(|(slot, record)| CorruptionReport::from_record(slot, record))
        .collect()
}

/// Every live record is a leak at the time of the call.
#[must_use]
pub fn collect_leaks(registry: &Registry) -> LeakReport {
    let leaks: Vec<LeakRecord> = registry
        .live()
        .map(|(slot, record)| LeakRecord {
            slot,
            addr: record.addr(),
            size: record.requested_size,
            origin: record.origin,
        })
        .collect();
    let total_bytes = leaks.iter().map(|leak| leak.size).sum();
    LeakReport { leaks, total_bytes }
}
