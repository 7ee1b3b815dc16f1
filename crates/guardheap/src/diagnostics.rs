//! Diagnostic events and where they are written.
//!
//! Provides:
//! - [`Diagnostic`]: every event the allocator reports, serializable with a
//!   stable `event` tag.
//! - [`TextSink`]: one human-readable line per event (the default, on stderr).
//! - [`JsonlSink`]: one JSON object per line with `level`, `event` and
//!   `timestamp_ms` fields.
//! - [`MemorySink`]: keeps events in a shared buffer for tests and embedders.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::config::ReportFormat;
use crate::site::OriginSite;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Fatal,
}

fn hex_addr<S: Serializer>(addr: &usize, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{addr:#x}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Diagnostic {
    BufferOverflow {
        #[serde(serialize_with = "hex_addr")]
        addr: usize,
        size: usize,
        origin: OriginSite,
    },
    AllocationNotFound {
        #[serde(serialize_with = "hex_addr")]
        addr: usize,
        site: OriginSite,
    },
    DoubleRelease {
        #[serde(serialize_with = "hex_addr")]
        addr: usize,
        site: OriginSite,
        released_at: OriginSite,
    },
    NullRelease {
        site: OriginSite,
    },
    OutOfMemory {
        size: usize,
        site: OriginSite,
    },
    ReallocOutOfMemory {
        #[serde(serialize_with = "hex_addr")]
        addr: usize,
        current_size: usize,
        requested_size: usize,
        site: OriginSite,
    },
    InvalidSize {
        size: usize,
        site: Option<OriginSite>,
    },
    MemoryLeak {
        #[serde(serialize_with = "hex_addr")]
        addr: usize,
        size: usize,
        origin: OriginSite,
    },
    LeakTotal {
        count: usize,
        bytes: usize,
    },
    RegistryInitialized {
        capacity: usize,
    },
    RegistryGrown {
        capacity: usize,
    },
}

impl Diagnostic {
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::RegistryInitialized { .. } | Self::RegistryGrown { .. } => Level::Info,
            Self::MemoryLeak { .. } | Self::LeakTotal { .. } => Level::Warn,
            Self::BufferOverflow { .. }
            | Self::AllocationNotFound { .. }
            | Self::DoubleRelease { .. }
            | Self::NullRelease { .. }
            | Self::OutOfMemory { .. }
            | Self::ReallocOutOfMemory { .. }
            | Self::InvalidSize { .. } => Level::Fatal,
        }
    }

    /// Stable event name, identical to the serialized `event` tag.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::BufferOverflow { .. } => "buffer_overflow",
            Self::AllocationNotFound { .. } => "allocation_not_found",
            Self::DoubleRelease { .. } => "double_release",
            Self::NullRelease { .. } => "null_release",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::ReallocOutOfMemory { .. } => "realloc_out_of_memory",
            Self::InvalidSize { .. } => "invalid_size",
            Self::MemoryLeak { .. } => "memory_leak",
            Self::LeakTotal { .. } => "leak_total",
            Self::RegistryInitialized { .. } => "registry_initialized",
            Self::RegistryGrown { .. } => "registry_grown",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferOverflow { addr, size, origin } => write!(
                f,
                "buffer overflow | addr {addr:#x} | size {size} | location {origin}"
            ),
            Self::AllocationNotFound { addr, site } => {
                write!(f, "allocation not found | addr {addr:#x} | location {site}")
            }
            Self::DoubleRelease { addr, site, .. } => {
                write!(f, "double free | addr {addr:#x} | location {site}")
            }
            Self::NullRelease { site } => write!(f, "nullptr free | location {site}"),
            Self::OutOfMemory { size, site } => {
                write!(f, "out of memory | size {size} | location {site}")
            }
            Self::ReallocOutOfMemory {
                addr,
                current_size,
                requested_size,
                site,
            } => write!(
                f,
                "realloc OOM | addr {addr:#x} | current size {current_size} | realloc size {requested_size} | location {site}"
            ),
            Self::InvalidSize { size, site } => match site {
                Some(site) => write!(f, "invalid size | size {size} | location {site}"),
                None => write!(f, "invalid size | size {size}"),
            },
            Self::MemoryLeak { size, origin, .. } => {
                write!(f, "memory leak: {size} bytes at {origin}")
            }
            Self::LeakTotal { count, .. } => write!(f, "total leaks: {count} leaks"),
            Self::RegistryInitialized { capacity } => {
                write!(f, "registry initialized | capacity {capacity}")
            }
            Self::RegistryGrown { capacity } => {
                write!(f, "registry grown | capacity {capacity}")
            }
        }
    }
}

/// Destination for diagnostic events.
///
/// Emission never fails the allocator operation that triggered it.
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: &Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Box<S> {
    fn emit(&mut self, diagnostic: &Diagnostic) {
        (**self).emit(diagnostic);
    }
}

/// Plain text, one line per event.
#[derive(Debug)]
pub struct TextSink<W: Write> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl TextSink<std::io::Stderr> {
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> DiagnosticSink for TextSink<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) {
        let _ = writeln!(self.writer, "{diagnostic}");
        let _ = self.writer.flush();
    }
}

/// JSON Lines, one object per event.
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonlSink<std::io::Stderr> {
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

/// Render one event as a JSON object with `level` and `timestamp_ms` added.
#[must_use]
pub fn to_json_line(diagnostic: &Diagnostic) -> serde_json::Value {
    let mut value = serde_json::to_value(diagnostic).unwrap_or_else(|_| {
        serde_json::json!({ "event": diagnostic.event() })
    });
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "level".to_string(),
            serde_json::to_value(diagnostic.level()).unwrap_or_default(),
        );
        object.insert("timestamp_ms".to_string(), serde_json::json!(now_ms()));
    }
    value
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl<W: Write> DiagnosticSink for JsonlSink<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) {
        let line = to_json_line(diagnostic);
        let _ = writeln!(self.writer, "{line}");
        let _ = self.writer.flush();
    }
}

/// Collects events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    /// Events rendered the way [`TextSink`] would print them.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&mut self, diagnostic: &Diagnostic) {
        self.events.lock().push(diagnostic.clone());
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&mut self, _diagnostic: &Diagnostic) {}
}

/// Sink writing `format` to `writer`.
#[must_use]
pub fn sink_for<W: Write + Send + 'static>(
    format: ReportFormat,
    writer: W,
) -> Box<dyn DiagnosticSink + Send> {
    match format {
        ReportFormat::Text => Box::new(TextSink::new(writer)),
        ReportFormat::Jsonl => Box::new(JsonlSink::new(writer)),
    }
}

/// Sink writing `format` to stderr.
#[must_use]
pub fn stderr_sink(format: ReportFormat) -> Box<dyn DiagnosticSink + Send> {
    sink_for(format, std::io::stderr())
}
