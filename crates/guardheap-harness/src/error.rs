//! Harness failures.

use guardheap::{ErrorKind, GuardError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown scenario '{0}', expected one of: {names}", names = crate::scenario::Scenario::names())]
    UnknownScenario(String),

    #[error("scenario {scenario}: expected {expected:?}, observed {observed:?}")]
    UnexpectedOutcome {
        scenario: &'static str,
        expected: Option<ErrorKind>,
        observed: Option<ErrorKind>,
    },

    #[error("stress step {step}: {source}")]
    Stress {
        step: usize,
        #[source]
        source: GuardError,
    },

    #[error("stress step {step}: payload of slot {slot} changed under us")]
    PayloadMismatch { step: usize, slot: usize },

    #[error(transparent)]
    Allocator(#[from] GuardError),
}
