//! Fatal allocator conditions.
//!
//! Every variant is fatal by contract. Whether a fatal condition aborts the
//! process or is handed back to the caller is decided by
//! [`FatalPolicy`](crate::config::FatalPolicy).

use serde::Serialize;
use thiserror::Error;

use crate::report::CorruptionReport;
use crate::site::OriginSite;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("out of memory allocating {requested} bytes at {site}")]
    OutOfMemory { requested: usize, site: OriginSite },

    #[error("allocation not found: addr {addr:#x} at {site}")]
    AllocationNotFound { addr: usize, site: OriginSite },

    #[error("double release: addr {addr:#x} at {site} (first released at {released_at})")]
    DoubleRelease {
        addr: usize,
        site: OriginSite,
        released_at: OriginSite,
    },

    #[error("release of null pointer at {site}")]
    NullRelease { site: OriginSite },

    #[error("{} corrupted buffer(s) detected at {detected_at}", reports.len())]
    CorruptedBuffer {
        reports: Vec<CorruptionReport>,
        detected_at: OriginSite,
    },

    #[error("invalid size {size}: guard region does not fit in usize")]
    InvalidSize {
        size: usize,
        site: Option<OriginSite>,
    },
}

/// Field-less discriminant of [`GuardError`], handy for assertions and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OutOfMemory,
    AllocationNotFound,
    DoubleRelease,
    NullRelease,
    CorruptedBuffer,
    InvalidSize,
}

impl GuardError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::AllocationNotFound { .. } => ErrorKind::AllocationNotFound,
            Self::DoubleRelease { .. } => ErrorKind::DoubleRelease,
            Self::NullRelease { .. } => ErrorKind::NullRelease,
            Self::CorruptedBuffer { .. } => ErrorKind::CorruptedBuffer,
            Self::InvalidSize { .. } => ErrorKind::InvalidSize,
        }
    }

    /// Corruption reports carried by a `CorruptedBuffer` error.
    #[must_use]
    pub fn corruption_reports(&self) -> &[CorruptionReport] {
        match self {
            Self::CorruptedBuffer { reports, .. } => reports,
            _ => &[],
        }
    }
}
