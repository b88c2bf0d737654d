//! Integration tests: harness CLI
//!
//! Validates:
//! 1. `simulate` prints a JSON report with no leaked handles.
//! 2. `options` resolves an option string to the documented JSON shape.
//! 3. Invalid configurations exit non-zero.

use std::process::Command;

fn harness() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_heapscope-harness"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn simulate_prints_json_report() {
    let output = harness()
        .args([
            "simulate",
            "--threads",
            "2",
            "--allocs",
            "1000",
            "--options",
            "nosampling,capacity=8192",
            "--seed",
            "0x1234",
        ])
        .output()
        .expect("run harness");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(report["producers"]["attempted"], 2000);
    assert_eq!(report["producers"]["recorded"], 2000);
    assert_eq!(report["workload"]["seed"], 0x1234);
    assert_eq!(report["config"]["channel_capacity"], 8192);
    assert_eq!(report["handles_promoted"], report["handles_released"]);
}

#[test]
fn simulate_markdown_format() {
    let output = harness()
        .args(["simulate", "--threads", "1", "--allocs", "100", "--format", "markdown"])
        .output()
        .expect("run harness");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.starts_with("# heapscope simulation"));
}

#[test]
fn options_resolves_string() {
    let output = harness()
        .args(["options", "sampling=25,depth=16,bogus"])
        .output()
        .expect("run harness");
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert_eq!(config["sampling_enabled"], true);
    assert_eq!(config["sampling_interval"], 25);
    assert_eq!(config["max_stack_depth"], 16);
    assert_eq!(config["channel_capacity"], 65_536);
}

#[test]
fn options_falls_back_to_env() {
    let output = harness()
        .arg("options")
        .env("HEAPSCOPE_OPTIONS", "nosampling")
        .output()
        .expect("run harness");
    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert_eq!(config["sampling_enabled"], false);
}

#[test]
fn zero_threads_fail() {
    let output = harness()
        .args(["simulate", "--threads", "0", "--allocs", "10"])
        .output()
        .expect("run harness");
    assert!(!output.status.success());
}
