//! Allocator configuration.
//!
//! [`GuardConfig::from_env`] reads:
//! - `GUARDHEAP_ON_FATAL`: `abort` (default) stops the process on the first
//!   defect after printing diagnostics; `return` hands the error back as
//!   `Err(GuardError)` instead.
//! - `GUARDHEAP_FORMAT`: `text` (default) or `jsonl` diagnostics.
//! - `GUARDHEAP_VERBOSE`: any truthy value enables informational events.
//! - `GUARDHEAP_REPORT_ON_DROP`: any truthy value runs a leak report when the
//!   allocator is dropped.

use serde::Serialize;

use crate::canary::{ALLOC_POISON, RELEASE_POISON};
use crate::registry::INITIAL_CAPACITY;

/// What happens once a fatal condition has been reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Emit diagnostics, then `std::process::abort()`.
    #[default]
    Abort,
    /// Emit diagnostics, then return the error to the caller.
    Return,
}

impl FatalPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "return" | "error" | "err" | "recover" | "soft" => Self::Return,
            _ => Self::Abort,
        }
    }
}

/// Diagnostic output encoding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// One human-readable line per event.
    #[default]
    Text,
    /// One JSON object per line.
    Jsonl,
}

impl ReportFormat {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "json" | "ndjson" => Self::Jsonl,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardConfig {
    pub fatal_policy: FatalPolicy,
    pub format: ReportFormat,
    /// Fill byte for fresh payloads.
    pub poison_on_allocate: Option<u8>,
    /// Fill byte for payloads about to be released.
    pub poison_on_release: Option<u8>,
    /// Slots reserved on first use. Zero is treated as one.
    pub initial_capacity: usize,
    pub report_on_drop: bool,
    pub verbose: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            fatal_policy: FatalPolicy::Abort,
            format: ReportFormat::Text,
            poison_on_allocate: Some(ALLOC_POISON),
            poison_on_release: Some(RELEASE_POISON),
            initial_capacity: INITIAL_CAPACITY,
            report_on_drop: false,
            verbose: false,
        }
    }
}

impl GuardConfig {
    /// Defaults with errors handed back instead of aborting.
    #[must_use]
    pub fn recoverable() -> Self {
        Self {
            fatal_policy: FatalPolicy::Return,
            ..Self::default()
        }
    }

    /// Defaults overridden by `GUARDHEAP_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`GuardConfig::from_env`] but with an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("GUARDHEAP_ON_FATAL") {
            config.fatal_policy = FatalPolicy::from_str_loose(&v);
        }
        if let Some(v) = lookup("GUARDHEAP_FORMAT") {
            config.format = ReportFormat::from_str_loose(&v);
        }
        if let Some(v) = lookup("GUARDHEAP_VERBOSE") {
            config.verbose = truthy(&v);
        }
        if let Some(v) = lookup("GUARDHEAP_REPORT_ON_DROP") {
            config.report_on_drop = truthy(&v);
        }
        config
    }

    #[must_use]
    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    #[must_use]
    pub fn with_initial_capacity(mut self, slots: usize) -> Self {
        self.initial_capacity = slots;
        self
    }

    #[must_use]
    pub fn with_report_on_drop(mut self, enabled: bool) -> Self {
        self.report_on_drop = enabled;
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }
}

fn truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
