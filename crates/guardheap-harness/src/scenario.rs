//! Named defect scenarios.
//!
//! Each scenario drives a fresh allocator into one well-known heap bug (or
//! none) and records which fatal condition, if any, the allocator raised.
//! Diagnostics go to whatever sink the caller supplies.

use guardheap::{
    DiagnosticSink, ErrorKind, FatalPolicy, GuardConfig, GuardError, GuardedAllocator,
    MetricsSnapshot,
};
use serde::Serialize;

use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Allocate, resize and release everything; nothing to report.
    Clean,
    /// Write one byte past a payload, then allocate again.
    Overflow,
    /// Release the same pointer twice.
    DoubleRelease,
    /// Release a pointer that never came from the allocator.
    ForeignRelease,
    /// Release a null pointer.
    NullRelease,
    /// Leave allocations live and ask for a leak report.
    Leak,
    /// Grow and shrink one allocation, checking the payload survives.
    Realloc,
}

impl Scenario {
    pub const ALL: [Self; 7] = [
        Self::Clean,
        Self::Overflow,
        Self::DoubleRelease,
        Self::ForeignRelease,
        Self::NullRelease,
        Self::Leak,
        Self::Realloc,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Overflow => "overflow",
            Self::DoubleRelease => "double-release",
            Self::ForeignRelease => "foreign-release",
            Self::NullRelease => "null-release",
            Self::Leak => "leak",
            Self::Realloc => "realloc",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, HarnessError> {
        let wanted = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|s| s.name() == wanted)
            .ok_or_else(|| HarnessError::UnknownScenario(name.to_string()))
    }

    /// Comma-separated list of every scenario name.
    #[must_use]
    pub fn names() -> String {
        Self::ALL.map(Self::name).join(", ")
    }

    /// Fatal condition this scenario is built to provoke.
    #[must_use]
    pub fn expected(self) -> Option<ErrorKind> {
        match self {
            Self::Clean | Self::Leak | Self::Realloc => None,
            Self::Overflow => Some(ErrorKind::CorruptedBuffer),
            Self::DoubleRelease => Some(ErrorKind::DoubleRelease),
            Self::ForeignRelease => Some(ErrorKind::AllocationNotFound),
            Self::NullRelease => Some(ErrorKind::NullRelease),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub expected: Option<ErrorKind>,
    pub observed: Option<ErrorKind>,
    /// Allocations still live when the leak report ran.
    pub leaks: usize,
    /// Payload bytes survived every resize.
    pub payload_intact: bool,
    pub metrics: MetricsSnapshot,
}

impl ScenarioOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.expected == self.observed && self.payload_intact
    }

    /// Turn a mismatch into an error.
    pub fn into_result(self) -> Result<Self, HarnessError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(HarnessError::UnexpectedOutcome {
                scenario: self.scenario.name(),
                expected: self.expected,
                observed: self.observed,
            })
        }
    }
}

/// Run `scenario` on a fresh system-heap allocator.
///
/// With [`FatalPolicy::Abort`] a scenario that expects a defect ends the
/// process after its diagnostic is written.
pub fn run_scenario(
    scenario: Scenario,
    policy: FatalPolicy,
    sink: impl DiagnosticSink + Send + 'static,
) -> ScenarioOutcome {
    let config = GuardConfig::default().with_fatal_policy(policy);
    let mut alloc = GuardedAllocator::with_config(config).with_sink(sink);

    let mut payload_intact = true;
    let result = drive(scenario, &mut alloc, &mut payload_intact);
    let (observed, leaks) = match result {
        Ok(leaks) => (None, leaks),
        Err(err) => (Some(err.kind()), alloc.live_count()),
    };

    ScenarioOutcome {
        scenario,
        expected: scenario.expected(),
        observed,
        leaks,
        payload_intact,
        metrics: alloc.metrics(),
    }
}

/// Returns the number of leaks the final report found.
fn drive(
    scenario: Scenario,
    alloc: &mut GuardedAllocator,
    payload_intact: &mut bool,
) -> Result<usize, GuardError> {
    match scenario {
        Scenario::Clean => {
            let a = alloc.allocate(32)?;
            let b = alloc.allocate(0)?;
            let a = alloc.reallocate(a.as_ptr(), 128)?;
            alloc.release(b.as_ptr())?;
            alloc.release(a.as_ptr())?;
        }
        Scenario::Overflow => {
            let victim = alloc.allocate(16)?;
            // SAFETY: the block behind a 16 byte payload is 16 + CANARY_SIZE
            // bytes, so index 16 is the first guard byte and still in bounds.
            unsafe { *victim.as_ptr().add(16) = b'!' };
            alloc.allocate(8)?;
        }
        Scenario::DoubleRelease => {
            let p = alloc.allocate(24)?;
            alloc.release(p.as_ptr())?;
            alloc.release(p.as_ptr())?;
        }
        Scenario::ForeignRelease => {
            let mut local = [0u8; 8];
            alloc.release(local.as_mut_ptr())?;
        }
        Scenario::NullRelease => {
            alloc.release(std::ptr::null_mut())?;
        }
        Scenario::Leak => {
            let _kept = alloc.allocate(64)?;
            let freed = alloc.allocate(8)?;
            let _also_kept = alloc.allocate(200)?;
            alloc.release(freed.as_ptr())?;
        }
        Scenario::Realloc => {
            let p = alloc.allocate(8)?;
            if let Some(payload) = alloc.payload_mut(p.as_ptr()) {
                payload.copy_from_slice(b"guarded!");
            }
            let grown = alloc.reallocate(p.as_ptr(), 4096)?;
            let shrunk = alloc.reallocate(grown.as_ptr(), 4)?;
            *payload_intact = alloc.payload(shrunk.as_ptr()) == Some(&b"guar"[..]);
            alloc.release(shrunk.as_ptr())?;
        }
    }
    Ok(alloc.report_leaks()?.count())
}
