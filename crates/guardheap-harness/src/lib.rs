//! Tooling around the guarded heap allocator.
//!
//! This crate provides:
//! - Scenarios: drive a fresh allocator into one named heap defect and
//!   record what it reported
//! - Stress: deterministic allocate / reallocate / release sequences with
//!   payload integrity checks and a metrics snapshot at the end

pub mod error;
pub mod scenario;
pub mod stress;

pub use error::HarnessError;
pub use scenario::{Scenario, ScenarioOutcome, run_scenario};
pub use stress::{StressConfig, StressReport, run_stress};
