//! Guarded allocate / reallocate / release.
//!
//! Every operation first sweeps all live allocations for clobbered canaries,
//! then does its own bookkeeping, then touches the system heap. Any defect
//! found along the way is reported through the diagnostic sink and handled
//! according to the configured [`FatalPolicy`].
//!
//! Per-allocation lifecycle:
//! `Uninitialized -> Allocated -> (Reallocated)* -> Released`.
//! Released is terminal for the pointer; its slot may host a new allocation.

use std::ptr::NonNull;

use crate::canary::{CANARY_SIZE, guarded_len, write_canary_raw};
use crate::config::{FatalPolicy, GuardConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, stderr_sink};
use crate::error::GuardError;
use crate::heap::{RawHeap, SystemHeap};
use crate::metrics::{AllocatorMetrics, MetricsSnapshot};
use crate::registry::{AllocationRecord, CapacityExhausted, Registry, SlotIndex};
use crate::report::{self, CorruptionReport, LeakReport};
use crate::site::OriginSite;

/// Instrumented heap allocator.
///
/// Owns every buffer it hands out until the caller releases it. Operations
/// take `&mut self`; use [`SharedGuardedAllocator`](crate::SharedGuardedAllocator)
/// to share one instance between threads.
pub struct GuardedAllocator<H: RawHeap = SystemHeap> {
    registry: Registry,
    heap: H,
    config: GuardConfig,
    sink: Box<dyn DiagnosticSink + Send>,
    metrics: AllocatorMetrics,
}

// SAFETY: the allocator is the sole owner of every tracked buffer; the raw
// pointers in its registry are never shared outside `&self`/`&mut self`
// borrows, so moving the whole allocator to another thread moves that
// ownership with it.
unsafe impl<H: RawHeap + Send> Send for GuardedAllocator<H> {}

impl GuardedAllocator<SystemHeap> {
    /// System heap, default config (abort on fatal), text diagnostics on stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    /// System heap with `GUARDHEAP_*` environment configuration.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(GuardConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: GuardConfig) -> Self {
        Self::with_heap(SystemHeap, config)
    }
}

impl Default for GuardedAllocator<SystemHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: RawHeap> GuardedAllocator<H> {
    #[must_use]
    pub fn with_heap(heap: H, config: GuardConfig) -> Self {
        let sink = stderr_sink(config.format);
        Self {
            registry: Registry::with_initial_capacity(config.initial_capacity),
            heap,
            config,
            sink,
            metrics: AllocatorMetrics::new(),
        }
    }

    /// Replace the diagnostic sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl DiagnosticSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    // ------------------------------------------------------------------
    // Allocate
    // ------------------------------------------------------------------

    /// Allocate `size` payload bytes, recording the caller as origin.
    #[track_caller]
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, GuardError> {
        self.allocate_at(size, OriginSite::caller())
    }

    pub fn allocate_at(&mut self, size: usize, site: OriginSite) -> Result<NonNull<u8>, GuardError> {
        self.ensure_initialized(site)?;
        self.sweep_for_corruption_at(site)?;

        let total = match guarded_len(size) {
            Ok(total) => total,
            Err(_) => return self.invalid_size(size, site),
        };

        let acquired = match self.registry.acquire_slot() {
            Ok(acquired) => acquired,
            Err(exhausted) => return self.registry_out_of_memory(exhausted, site),
        };
        if let Some(capacity) = acquired.grew_to {
            AllocatorMetrics::inc(&self.metrics.registry_growths);
            self.info(Diagnostic::RegistryGrown { capacity });
        }

        let Some(data) = self.heap.allocate(total) else {
            self.registry.abandon_slot(acquired);
            return self.fail(
                [Diagnostic::OutOfMemory { size, site }],
                GuardError::OutOfMemory {
                    requested: total,
                    site,
                },
            );
        };

        // SAFETY: `data` is a fresh block of `total = size + CANARY_SIZE` bytes.
        unsafe {
            if let Some(poison) = self.config.poison_on_allocate {
                std::ptr::write_bytes(data.as_ptr(), poison, size);
            }
            write_canary_raw(data.as_ptr(), size);
        }

        self.registry.fill(
            acquired.index,
            AllocationRecord {
                data,
                requested_size: size,
                origin: site,
            },
        );

        AllocatorMetrics::inc(&self.metrics.allocations);
        if acquired.recycled {
            AllocatorMetrics::inc(&self.metrics.slot_reuses);
        }
        self.metrics.track_live_bytes(0, size);
        Ok(data)
    }

    // ------------------------------------------------------------------
    // Reallocate
    // ------------------------------------------------------------------

    /// Resize an allocation. A null `ptr` behaves like [`Self::allocate`].
    ///
    /// The first `min(old, new)` payload bytes are preserved. On success the
    /// record takes the caller as its new origin.
    #[track_caller]
    pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, GuardError> {
        self.reallocate_at(ptr, new_size, OriginSite::caller())
    }

    pub fn reallocate_at(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
        site: OriginSite,
    ) -> Result<NonNull<u8>, GuardError> {
        if ptr.is_null() {
            return self.allocate_at(new_size, site);
        }

        self.ensure_initialized(site)?;
        self.sweep_for_corruption_at(site)?;

        let (index, record) = self.locate_live(ptr, site, Lookup::Reallocate)?;
        if !report::check_record(&record, &self.metrics) {
            return self.corrupted(vec![CorruptionReport::from_record(index, &record)], site);
        }

        let new_total = match guarded_len(new_size) {
            Ok(total) => total,
            Err(_) => return self.invalid_size(new_size, site),
        };
        let old_size = record.requested_size;
        let old_total = old_size + CANARY_SIZE;

        // SAFETY: `record.data` is a live block of `old_total` bytes from `self.heap`.
        let moved = unsafe { self.heap.reallocate(record.data, old_total, new_total) };
        let Some(moved) = moved else {
            // The old block is untouched and stays tracked.
            return self.fail(
                [Diagnostic::ReallocOutOfMemory {
                    addr: record.addr(),
                    current_size: old_size,
                    requested_size: new_size,
                    site,
                }],
                GuardError::OutOfMemory {
                    requested: new_total,
                    site,
                },
            );
        };

        // SAFETY: `moved` is a block of `new_total = new_size + CANARY_SIZE` bytes.
        unsafe {
            if new_size > old_size {
                if let Some(poison) = self.config.poison_on_allocate {
                    std::ptr::write_bytes(moved.as_ptr().add(old_size), poison, new_size - old_size);
                }
            }
            write_canary_raw(moved.as_ptr(), new_size);
        }

        self.registry.update(
            index,
            AllocationRecord {
                data: moved,
                requested_size: new_size,
                origin: site,
            },
        );

        AllocatorMetrics::inc(&self.metrics.reallocations);
        self.metrics.track_live_bytes(old_size, new_size);
        Ok(moved)
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Release an allocation back to the system heap.
    #[track_caller]
    pub fn release(&mut self, ptr: *mut u8) -> Result<(), GuardError> {
        self.release_at(ptr, OriginSite::caller())
    }

    pub fn release_at(&mut self, ptr: *mut u8, site: OriginSite) -> Result<(), GuardError> {
        if ptr.is_null() {
            return self.fail(
                [Diagnostic::NullRelease { site }],
                GuardError::NullRelease { site },
            );
        }

        self.ensure_initialized(site)?;
        self.sweep_for_corruption_at(site)?;

        let (index, record) = self.locate_live(ptr, site, Lookup::Release)?;
        if !report::check_record(&record, &self.metrics) {
            return self.corrupted(vec![CorruptionReport::from_record(index, &record)], site);
        }

        let size = record.requested_size;
        if let Some(poison) = self.config.poison_on_release {
            // SAFETY: the payload is `size` bytes of a live block we own.
            unsafe { std::ptr::write_bytes(record.data.as_ptr(), poison, size) };
        }

        self.registry.release_slot(index, site);
        // SAFETY: `record.data` is a live block of `size + CANARY_SIZE` bytes
        // from `self.heap`, and its slot is now tombstoned so it cannot be
        // released twice.
        unsafe { self.heap.release(record.data, size + CANARY_SIZE) };

        AllocatorMetrics::inc(&self.metrics.releases);
        self.metrics.track_live_bytes(size, 0);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Validate every live canary. All failures are reported before the
    /// call fails.
    #[track_caller]
    pub fn sweep_for_corruption(&mut self) -> Result<(), GuardError> {
        self.sweep_for_corruption_at(OriginSite::caller())
    }

    pub fn sweep_for_corruption_at(&mut self, site: OriginSite) -> Result<(), GuardError> {
        let findings = report::scan_for_corruption(&self.registry, &self.metrics);
        if findings.is_empty() {
            return Ok(());
        }
        self.corrupted(findings, site)
    }

    /// Report every still-live allocation as a leak, then re-check all
    /// canaries.
    #[track_caller]
    pub fn report_leaks(&mut self) -> Result<LeakReport, GuardError> {
        self.report_leaks_at(OriginSite::caller())
    }

    pub fn report_leaks_at(&mut self, site: OriginSite) -> Result<LeakReport, GuardError> {
        let leaks = self.emit_leaks();
        self.sweep_for_corruption_at(site)?;
        Ok(leaks)
    }

    fn emit_leaks(&mut self) -> LeakReport {
        let leaks = report::collect_leaks(&self.registry);
        for leak in &leaks.leaks {
            self.sink.emit(&Diagnostic::MemoryLeak {
                addr: leak.addr,
                size: leak.size,
                origin: leak.origin,
            });
        }
        if !leaks.is_clean() {
            self.sink.emit(&Diagnostic::LeakTotal {
                count: leaks.count(),
                bytes: leaks.total_bytes,
            });
        }
        leaks
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Live allocations in slot order.
    pub fn live_allocations(&self) -> impl Iterator<Item = (SlotIndex, &AllocationRecord)> + '_ {
        self.registry.live()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.registry.live().map(|(_, r)| r.requested_size).sum()
    }

    /// Logical high-water slot count.
    #[must_use]
    pub fn registry_size(&self) -> usize {
        self.registry.size()
    }

    #[must_use]
    pub fn registry_capacity(&self) -> usize {
        self.registry.capacity()
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.registry.free_slots()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Slot currently holding the live allocation at `ptr`.
    #[must_use]
    pub fn slot_of(&self, ptr: *const u8) -> Option<SlotIndex> {
        self.registry.find_slot_by_pointer(ptr)
    }

    /// Payload of the live allocation starting at `ptr`.
    #[must_use]
    pub fn payload(&self, ptr: *const u8) -> Option<&[u8]> {
        let record = self.registry.record(self.slot_of(ptr)?)?;
        // SAFETY: live records own `requested_size` readable payload bytes;
        // the borrow of `self` keeps the block from being released.
        Some(unsafe { std::slice::from_raw_parts(record.data.as_ptr(), record.requested_size) })
    }

    /// Mutable payload of the live allocation starting at `ptr`.
    pub fn payload_mut(&mut self, ptr: *const u8) -> Option<&mut [u8]> {
        let record = *self.registry.record(self.slot_of(ptr)?)?;
        // SAFETY: as in `payload`, with exclusive access through `&mut self`.
        Some(unsafe {
            std::slice::from_raw_parts_mut(record.data.as_ptr(), record.requested_size)
        })
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    #[must_use]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_initialized(&mut self, site: OriginSite) -> Result<(), GuardError> {
        match self.registry.ensure_initialized() {
            Ok(true) => {
                let capacity = self.registry.capacity();
                self.info(Diagnostic::RegistryInitialized { capacity });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(exhausted) => self.registry_out_of_memory(exhausted, site),
        }
    }

    /// Find the live record for `ptr`.
    ///
    /// Only a release consults tombstones: releasing a stale address is a
    /// double release, while resizing one is an unknown pointer.
    fn locate_live(
        &mut self,
        ptr: *mut u8,
        site: OriginSite,
        lookup: Lookup,
    ) -> Result<(SlotIndex, AllocationRecord), GuardError> {
        let addr = ptr as usize;
        let found = self
            .registry
            .find_slot_by_pointer(ptr)
            .and_then(|index| self.registry.record(index).map(|record| (index, *record)));
        if let Some(found) = found {
            return Ok(found);
        }
        let released_at = match lookup {
            Lookup::Release => self.registry.find_tombstone_by_pointer(ptr),
            Lookup::Reallocate => None,
        };
        match released_at {
            Some((_, released_at)) => self.fail(
                [Diagnostic::DoubleRelease {
                    addr,
                    site,
                    released_at,
                }],
                GuardError::DoubleRelease {
                    addr,
                    site,
                    released_at,
                },
            ),
            None => self.fail(
                [Diagnostic::AllocationNotFound { addr, site }],
                GuardError::AllocationNotFound { addr, site },
            ),
        }
    }

    fn corrupted<T>(
        &mut self,
        reports: Vec<CorruptionReport>,
        detected_at: OriginSite,
    ) -> Result<T, GuardError> {
        let diagnostics: Vec<Diagnostic> = reports
            .iter()
            .map(|r| Diagnostic::BufferOverflow {
                addr: r.addr,
                size: r.size,
                origin: r.origin,
            })
            .collect();
        self.fail(
            diagnostics,
            GuardError::CorruptedBuffer {
                reports,
                detected_at,
            },
        )
    }

    fn invalid_size<T>(&mut self, size: usize, site: OriginSite) -> Result<T, GuardError> {
        let site = Some(site);
        self.fail(
            [Diagnostic::InvalidSize { size, site }],
            GuardError::InvalidSize { size, site },
        )
    }

    fn registry_out_of_memory<T>(
        &mut self,
        exhausted: CapacityExhausted,
        site: OriginSite,
    ) -> Result<T, GuardError> {
        let size = exhausted.bytes();
        self.fail(
            [Diagnostic::OutOfMemory { size, site }],
            GuardError::OutOfMemory {
                requested: size,
                site,
            },
        )
    }

    /// Report a fatal condition, then abort or hand it back.
    fn fail<T>(
        &mut self,
        diagnostics: impl IntoIterator<Item = Diagnostic>,
        error: GuardError,
    ) -> Result<T, GuardError> {
        for diagnostic in diagnostics {
            self.sink.emit(&diagnostic);
        }
        AllocatorMetrics::inc(&self.metrics.fatal_errors);
        match self.config.fatal_policy {
            FatalPolicy::Abort => std::process::abort(),
            FatalPolicy::Return => Err(error),
        }
    }

    fn info(&mut self, diagnostic: Diagnostic) {
        if self.config.verbose {
            self.sink.emit(&diagnostic);
        }
    }
}

/// Which operation is looking a pointer up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Release,
    Reallocate,
}

impl<H: RawHeap> Drop for GuardedAllocator<H> {
    /// With `report_on_drop`, leaks are reported and corruption is fatal
    /// like anywhere else: counted, and under [`FatalPolicy::Abort`] the
    /// process aborts before anything is freed. A drop cannot hand an error
    /// back, so [`FatalPolicy::Return`] only reports.
    fn drop(&mut self) {
        if self.config.report_on_drop {
            self.emit_leaks();
            let findings = report::scan_for_corruption(&self.registry, &self.metrics);
            if !findings.is_empty() {
                for finding in &findings {
                    self.sink.emit(&Diagnostic::BufferOverflow {
                        addr: finding.addr,
                        size: finding.size,
                        origin: finding.origin,
                    });
                }
                AllocatorMetrics::inc(&self.metrics.fatal_errors);
                if self.config.fatal_policy == FatalPolicy::Abort && !std::thread::panicking() {
                    std::process::abort();
                }
            }
        }
        for record in self.registry.take_live() {
            // SAFETY: every live record owns a block of
            // `requested_size + CANARY_SIZE` bytes from `self.heap`.
            unsafe {
                self.heap
                    .release(record.data, record.requested_size + CANARY_SIZE);
            }
        }
    }
}

impl<H: RawHeap> std::fmt::Debug for GuardedAllocator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedAllocator")
            .field("registry_size", &self.registry.size())
            .field("registry_capacity", &self.registry.capacity())
            .field("live", &self.registry.live_count())
            .field("free_slots", &self.registry.free_slots())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::error::ErrorKind;
    use crate::heap::BudgetHeap;

    fn allocator() -> (GuardedAllocator, MemorySink) {
        let sink = MemorySink::new();
        let alloc = GuardedAllocator::with_config(GuardConfig::recoverable()).with_sink(sink.clone());
        (alloc, sink)
    }

    /// Hands released blocks of the same length back most-recent-first, so
    /// address reuse is deterministic.
    #[derive(Default)]
    struct RecyclingHeap {
        cached: Vec<(NonNull<u8>, usize)>,
    }

    impl RawHeap for RecyclingHeap {
        fn allocate(&mut self, len: usize) -> Option<NonNull<u8>> {
            match self.cached.iter().rposition(|&(_, cached)| cached == len) {
                Some(pos) => Some(self.cached.remove(pos).0),
                None => SystemHeap.allocate(len),
            }
        }

        unsafe fn reallocate(
            &mut self,
            ptr: NonNull<u8>,
            old_len: usize,
            new_len: usize,
        ) -> Option<NonNull<u8>> {
            let moved = self.allocate(new_len)?;
            // SAFETY: both blocks are live and at least `min(old, new)` long.
            unsafe {
                std::ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), old_len.min(new_len));
                self.release(ptr, old_len);
            }
            Some(moved)
        }

        unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize) {
            self.cached.push((ptr, len));
        }
    }

    impl Drop for RecyclingHeap {
        fn drop(&mut self) {
            for (ptr, len) in self.cached.drain(..) {
                // SAFETY: cached blocks came from the system heap and are unused.
                unsafe { SystemHeap.release(ptr, len) };
            }
        }
    }

    fn recycling_allocator() -> GuardedAllocator<RecyclingHeap> {
        GuardedAllocator::with_heap(RecyclingHeap::default(), GuardConfig::recoverable())
            .with_sink(MemorySink::new())
    }

    #[test]
    fn allocate_poisons_payload_and_appends_canary() {
        let (mut alloc, _) = allocator();
        let p = alloc.allocate(6).unwrap();
        assert_eq!(alloc.payload(p.as_ptr()).unwrap(), &[0xCC; 6]);
        // SAFETY: the guard region is part of the same block.
        let guard = unsafe { std::slice::from_raw_parts(p.as_ptr().add(6), CANARY_SIZE) };
        assert_eq!(guard, &[0xDE, 0xAD, 0xBE, 0xEF]);
        alloc.release(p.as_ptr()).unwrap();
    }

    #[test]
    fn first_call_initializes_registry() {
        let (mut alloc, _) = allocator();
        assert_eq!(alloc.registry_capacity(), 0);
        let p = alloc.allocate(1).unwrap();
        assert_eq!(alloc.registry_capacity(), 100);
        assert_eq!(alloc.registry_size(), 1);
        alloc.release(p.as_ptr()).unwrap();
    }

    #[test]
    fn origin_site_is_the_caller() {
        let (mut alloc, _) = allocator();
        let line = line!() + 1;
        let p = alloc.allocate(3).unwrap();
        let (_, record) = alloc.live_allocations().next().unwrap();
        assert_eq!(record.origin.line, line);
        assert!(record.origin.file.ends_with("allocator.rs"));
        alloc.release(p.as_ptr()).unwrap();
    }

    #[test]
    fn null_release_is_reported() {
        let (mut alloc, sink) = allocator();
        let err = alloc.release(std::ptr::null_mut()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullRelease);
        assert!(sink.lines()[0].starts_with("nullptr free | location "));
    }

    #[test]
    fn release_of_corrupted_buffer_names_allocation_site() {
        let (mut alloc, sink) = allocator();
        let line = line!() + 1;
        let p = alloc.allocate(8).unwrap();
        // SAFETY: writes into the guard region of our own block.
        unsafe { *p.as_ptr().add(8) = 0 };

        let err = alloc.release(p.as_ptr()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptedBuffer);
        let reports = err.corruption_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].origin.line, line);
        assert!(sink.lines()[0].starts_with("buffer overflow | addr "));
        assert_eq!(alloc.live_count(), 1);
    }

    #[test]
    fn realloc_of_released_pointer_is_not_found() {
        let (mut alloc, sink) = allocator();
        let p = alloc.allocate(16).unwrap();
        alloc.release(p.as_ptr()).unwrap();

        let err = alloc.reallocate(p.as_ptr(), 32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationNotFound);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("allocation not found | addr "), "{lines:?}");
        assert_eq!(alloc.metrics().fatal_errors, 1);
    }

    #[test]
    fn double_release_names_latest_release_of_reused_address() {
        let mut alloc = recycling_allocator();
        let a = alloc.allocate(24).unwrap();
        let b = alloc.allocate(24).unwrap();
        alloc.release(b.as_ptr()).unwrap();
        alloc.release(a.as_ptr()).unwrap();

        // Slot of b, block of a.
        let c = alloc.allocate(24).unwrap();
        assert_eq!(c, a);
        assert_eq!(alloc.slot_of(c.as_ptr()), Some(SlotIndex(1)));

        let line = line!() + 1;
        alloc.release(c.as_ptr()).unwrap();
        let err = alloc.release(c.as_ptr()).unwrap_err();
        let GuardError::DoubleRelease { released_at, .. } = err else {
            panic!("expected double release, got {err:?}");
        };
        assert_eq!(released_at.line, line);
    }

    #[test]
    fn realloc_onto_released_address_forgets_its_tombstone() {
        let mut alloc = recycling_allocator();
        let a = alloc.allocate(8).unwrap();
        let b = alloc.allocate(24).unwrap();
        alloc.release(a.as_ptr()).unwrap();

        let moved = alloc.reallocate(b.as_ptr(), 8).unwrap();
        assert_eq!(moved, a);
        assert_eq!(alloc.registry().find_tombstone_by_pointer(a.as_ptr()), None);

        let line = line!() + 1;
        alloc.release(moved.as_ptr()).unwrap();
        let err = alloc.release(moved.as_ptr()).unwrap_err();
        let GuardError::DoubleRelease { released_at, .. } = err else {
            panic!("expected double release, got {err:?}");
        };
        assert_eq!(released_at.line, line);
    }

    #[test]
    fn registry_grows_past_initial_capacity() {
        let sink = MemorySink::new();
        let mut alloc = GuardedAllocator::with_config(
            GuardConfig::recoverable()
                .with_initial_capacity(2)
                .with_verbose(true),
        )
        .with_sink(sink.clone());
        let ptrs: Vec<_> = (0..5).map(|i| alloc.allocate(i).unwrap()).collect();
        assert_eq!(alloc.registry_capacity(), 8);
        assert_eq!(alloc.metrics().registry_growths, 2);
        assert!(
            sink.events()
                .contains(&Diagnostic::RegistryGrown { capacity: 4 })
        );
        for p in ptrs {
            alloc.release(p.as_ptr()).unwrap();
        }
    }

    #[test]
    fn heap_exhaustion_is_out_of_memory_and_keeps_slot() {
        let sink = MemorySink::new();
        let mut alloc =
            GuardedAllocator::with_heap(BudgetHeap::new(64), GuardConfig::recoverable())
                .with_sink(sink.clone());
        let a = alloc.allocate(10).unwrap();
        alloc.release(a.as_ptr()).unwrap();
        assert_eq!(alloc.free_slots(), 1);

        let err = alloc.allocate(100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert_eq!(alloc.free_slots(), 1);
        assert!(sink.lines()[0].starts_with("out of memory | size 100"));

        let b = alloc.allocate(4).unwrap();
        assert_eq!(alloc.free_slots(), 0);
        assert_eq!(alloc.registry_size(), 1);
        alloc.release(b.as_ptr()).unwrap();
    }

    #[test]
    fn realloc_exhaustion_keeps_original_allocation() {
        let sink = MemorySink::new();
        let mut alloc =
            GuardedAllocator::with_heap(BudgetHeap::new(64), GuardConfig::recoverable())
                .with_sink(sink.clone());
        let p = alloc.allocate(16).unwrap();
        alloc.payload_mut(p.as_ptr()).unwrap().fill(0x11);

        let err = alloc.reallocate(p.as_ptr(), 200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert!(sink.lines()[0].starts_with("realloc OOM | addr "));
        assert!(sink.lines()[0].contains("current size 16 | realloc size 200"));
        assert_eq!(alloc.payload(p.as_ptr()).unwrap(), &[0x11; 16]);
        alloc.release(p.as_ptr()).unwrap();
        assert_eq!(alloc.heap().in_use(), 0);
    }

    #[test]
    fn invalid_size_is_reported() {
        let (mut alloc, sink) = allocator();
        let err = alloc.allocate(usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSize);
        assert!(sink.lines()[0].starts_with("invalid size | size "));
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn shrinking_realloc_moves_canary() {
        let (mut alloc, _) = allocator();
        let p = alloc.allocate(32).unwrap();
        alloc.payload_mut(p.as_ptr()).unwrap().copy_from_slice(&[7; 32]);
        let q = alloc.reallocate(p.as_ptr(), 4).unwrap();
        assert_eq!(alloc.payload(q.as_ptr()).unwrap(), &[7; 4]);
        alloc.sweep_for_corruption().unwrap();
        alloc.release(q.as_ptr()).unwrap();
    }

    #[test]
    fn realloc_of_null_allocates() {
        let (mut alloc, _) = allocator();
        let p = alloc.reallocate(std::ptr::null_mut(), 12).unwrap();
        assert_eq!(alloc.live_count(), 1);
        assert_eq!(alloc.metrics().allocations, 1);
        assert_eq!(alloc.metrics().reallocations, 0);
        alloc.release(p.as_ptr()).unwrap();
    }

    #[test]
    fn realloc_updates_origin() {
        let (mut alloc, _) = allocator();
        let p = alloc.allocate(2).unwrap();
        let line = line!() + 1;
        let q = alloc.reallocate(p.as_ptr(), 20).unwrap();
        let (_, record) = alloc.live_allocations().next().unwrap();
        assert_eq!(record.origin.line, line);
        assert_eq!(record.requested_size, 20);
        alloc.release(q.as_ptr()).unwrap();
    }

    #[test]
    fn drop_releases_leftovers_and_optionally_reports() {
        let sink = MemorySink::new();
        let mut alloc = GuardedAllocator::with_heap(
            BudgetHeap::new(1024),
            GuardConfig::recoverable().with_report_on_drop(true),
        )
        .with_sink(sink.clone());
        alloc.allocate(10).unwrap();
        alloc.allocate(20).unwrap();
        drop(alloc);

        let lines = sink.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("memory leak: 10 bytes at "));
        assert!(lines[1].starts_with("memory leak: 20 bytes at "));
        assert_eq!(lines[2], "total leaks: 2 leaks");
    }

    #[test]
    fn drop_reports_corruption_as_fatal_without_aborting_on_return() {
        let sink = MemorySink::new();
        let mut alloc = GuardedAllocator::with_heap(
            BudgetHeap::new(1024),
            GuardConfig::recoverable().with_report_on_drop(true),
        )
        .with_sink(sink.clone());
        let p = alloc.allocate(8).unwrap();
        // SAFETY: writes into the guard region of our own block.
        unsafe { *p.as_ptr().add(8) = 0 };
        drop(alloc);

        let lines = sink.lines();
        assert_eq!(lines.len(), 3, "{lines:?}");
        assert!(lines[0].starts_with("memory leak: 8 bytes at "));
        assert_eq!(lines[1], "total leaks: 1 leaks");
        assert!(lines[2].starts_with("buffer overflow | addr "));
        assert!(lines[2].contains("| size 8 |"));
    }

    #[test]
    fn metrics_follow_operations() {
        let (mut alloc, _) = allocator();
        let a = alloc.allocate(10).unwrap();
        let b = alloc.allocate(30).unwrap();
        let a = alloc.reallocate(a.as_ptr(), 50).unwrap();
        alloc.release(b.as_ptr()).unwrap();
        let c = alloc.allocate(5).unwrap();

        let m = alloc.metrics();
        assert_eq!(m.allocations, 3);
        assert_eq!(m.reallocations, 1);
        assert_eq!(m.releases, 1);
        assert_eq!(m.slot_reuses, 1);
        assert_eq!(m.live_bytes, 55);
        assert_eq!(m.peak_live_bytes, 80);
        assert_eq!(alloc.live_bytes(), 55);

        alloc.release(a.as_ptr()).unwrap();
        alloc.release(c.as_ptr()).unwrap();
    }
}
