//! Guarded heap allocator.
//!
//! A debugging replacement for raw allocate / reallocate / release that
//! tracks every live allocation and catches the usual heap bugs at the next
//! allocator call instead of at some distant crash.
//!
//! # Architecture
//!
//! - **Canary codec** (`canary`): fixed `DE AD BE EF` guard bytes behind every payload
//! - **Registry** (`registry`): slot table of allocation records with lazy, doubling capacity
//! - **Free slot queue** (`free_list`): FIFO recycling of released slots
//! - **Guarded allocator** (`allocator`): allocate / reallocate / release with validation
//! - **Reporter** (`report`): corruption sweep and leak accounting
//! - **Diagnostics** (`diagnostics`): text and JSONL event sinks
//! - **System heap** (`heap`): the byte source underneath the guard layer
//! - **Configuration** (`config`): fatal-error policy and output format
//! - **Metrics** (`metrics`): atomic counters for observability
//! - **Sharing** (`shared`, `global`): one locked instance across threads, or one per thread
//!
//! Every defect (overflow, double release, unknown pointer, null release, out
//! of memory, size overflow) is fatal. With [`FatalPolicy::Abort`] the process
//! stops after the diagnostic is written; with [`FatalPolicy::Return`] the
//! named [`GuardError`] is handed back instead.

pub mod allocator;
pub mod canary;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod free_list;
pub mod global;
pub mod heap;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod shared;
pub mod site;

pub use allocator::GuardedAllocator;
pub use config::{FatalPolicy, GuardConfig, ReportFormat};
pub use diagnostics::{Diagnostic, DiagnosticSink, JsonlSink, Level, MemorySink, NullSink, TextSink};
pub use error::{ErrorKind, GuardError};
pub use heap::{BudgetHeap, RawHeap, SystemHeap};
pub use metrics::{AllocatorMetrics, MetricsSnapshot};
pub use registry::{AllocationRecord, SlotIndex};
pub use report::{CorruptionReport, LeakRecord, LeakReport};
pub use shared::SharedGuardedAllocator;
pub use site::OriginSite;
