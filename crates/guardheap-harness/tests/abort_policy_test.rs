// Integration tests for the default abort-on-fatal policy, run through the
// harness binary so the abort cannot take the test runner down with it.

use std::process::{Command, Output};

fn run_harness(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_guardheap-harness"))
        .args(args)
        .output()
        .expect("failed to execute guardheap-harness")
}

#[test]
fn overflow_aborts_after_reporting_the_victim() {
    let output = run_harness(&["scenario", "overflow", "--abort"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        !output.status.success(),
        "overflow under abort exited cleanly:\n{stdout}"
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        const SIGABRT: i32 = 6;
        assert_eq!(output.status.signal(), Some(SIGABRT), "{:?}", output.status);
    }

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "{stdout}");
    assert!(lines[0].starts_with("buffer overflow | addr 0x"), "{stdout}");
    assert!(lines[0].contains("| size 16 |"), "{stdout}");
    assert!(lines[0].contains("| location "), "{stdout}");
    assert!(lines[0].contains("scenario.rs:"), "{stdout}");

    // The per-scenario summary comes after the run, which never returned.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("scenario overflow:"), "{stderr}");
}

#[test]
fn double_release_aborts_with_both_sites() {
    let output = run_harness(&["scenario", "double-release", "--abort", "--format", "jsonl"]);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let record: serde_json::Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("Invalid JSONL from harness: {e}\n{stdout}"));
    assert_eq!(record["event"], "double_release");
    assert_eq!(record["level"], "fatal");
    assert!(record["site"]["line"].as_u64().unwrap() > record["released_at"]["line"].as_u64().unwrap());
}

#[test]
fn clean_scenario_survives_abort_policy() {
    let output = run_harness(&["scenario", "clean", "--abort"]);
    assert!(
        output.status.success(),
        "clean scenario failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn overflow_without_abort_returns_and_passes() {
    let output = run_harness(&["scenario", "overflow"]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("scenario overflow:"), "{stderr}");
    assert!(stderr.contains("passed=true"), "{stderr}");
}
