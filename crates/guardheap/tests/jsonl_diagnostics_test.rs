use std::io::Write;
use std::sync::{Arc, Mutex};

use guardheap::{GuardConfig, GuardedAllocator, JsonlSink, OriginSite, ReportFormat};
use serde_json::Value;

/// Writer whose bytes stay readable after the allocator takes ownership.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn records(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn jsonl_allocator(config: GuardConfig) -> (GuardedAllocator, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let alloc = GuardedAllocator::with_config(config).with_sink(JsonlSink::new(buffer.clone()));
    (alloc, buffer)
}

#[test]
fn leak_report_is_one_object_per_line() {
    let (mut alloc, buffer) = jsonl_allocator(GuardConfig::recoverable());
    let site = OriginSite::new("service.rs", 42);
    let p = alloc.allocate_at(24, site).unwrap();
    alloc.report_leaks().unwrap();

    let records = buffer.records();
    assert_eq!(records.len(), 2);

    let leak = &records[0];
    assert_eq!(leak["event"], "memory_leak");
    assert_eq!(leak["level"], "warn");
    assert_eq!(leak["size"], 24);
    assert_eq!(leak["addr"], format!("{:#x}", p.as_ptr() as usize));
    assert_eq!(leak["origin"]["file"], "service.rs");
    assert_eq!(leak["origin"]["line"], 42);
    assert!(leak["timestamp_ms"].as_u64().is_some());

    let total = &records[1];
    assert_eq!(total["event"], "leak_total");
    assert_eq!(total["count"], 1);
    assert_eq!(total["bytes"], 24);

    alloc.release(p.as_ptr()).unwrap();
}

#[test]
fn defect_events_carry_their_level() {
    let (mut alloc, buffer) = jsonl_allocator(GuardConfig::recoverable());
    let p = alloc.allocate(4).unwrap();
    // SAFETY: first guard byte of our own block.
    unsafe { *p.as_ptr().add(4) = 0 };
    let _ = alloc.sweep_for_corruption();
    let _ = alloc.release(std::ptr::null_mut());

    let records = buffer.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["event"], "buffer_overflow");
    assert_eq!(records[0]["level"], "fatal");
    assert_eq!(records[0]["size"], 4);
    assert_eq!(records[1]["event"], "null_release");
    assert_eq!(records[1]["level"], "fatal");
}

#[test]
fn verbose_mode_reports_registry_lifecycle() {
    let (mut alloc, buffer) = jsonl_allocator(
        GuardConfig::recoverable()
            .with_initial_capacity(1)
            .with_verbose(true),
    );
    let a = alloc.allocate(1).unwrap();
    let b = alloc.allocate(1).unwrap();

    let events: Vec<String> = buffer
        .records()
        .iter()
        .map(|r| r["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(events, ["registry_initialized", "registry_grown"]);
    assert_eq!(buffer.records()[1]["capacity"], 2);

    alloc.release(a.as_ptr()).unwrap();
    alloc.release(b.as_ptr()).unwrap();
}

#[test]
fn format_is_selected_from_lookup() {
    let config = GuardConfig::from_lookup(|key| match key {
        "GUARDHEAP_FORMAT" => Some("jsonl".to_string()),
        "GUARDHEAP_ON_FATAL" => Some("return".to_string()),
        _ => None,
    });
    assert_eq!(config.format, ReportFormat::Jsonl);
    assert_eq!(config, GuardConfig {
        format: ReportFormat::Jsonl,
        ..GuardConfig::recoverable()
    });
}
