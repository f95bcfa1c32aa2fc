//! Integration tests for netowner CLI functionality

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

/// Base URL with nothing listening, so every fetch fails fast
const DEAD_BASE_URL: &str = "http://127.0.0.1:9";

#[test]
fn test_help_output() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("autonomous system"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--api-key"))
        .stdout(predicate::str::contains("--timeout-ms"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn test_version_output() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.arg("--version");

    let output = cmd.output().expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("netowner "));
}

#[test]
fn test_missing_target() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.assert().failure();
}

#[test]
fn test_invalid_target_exits_before_resolving() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.args(["198.51.100.7", "not-a-target"]);

    cmd.assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("not-a-target"));
}

#[test]
fn test_unresolvable_target_times_out() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.env_remove("NETWORKSDB_API_KEY").args([
        "--base-url",
        DEAD_BASE_URL,
        "--rate-limit-ms",
        "0",
        "--timeout-ms",
        "300",
        "AS64500",
    ]);

    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn test_json_output_reports_errors() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.env_remove("NETWORKSDB_API_KEY").args([
        "--json",
        "--base-url",
        DEAD_BASE_URL,
        "--rate-limit-ms",
        "0",
        "--timeout-ms",
        "300",
        "192.0.2.1",
        "AS64500",
    ]);

    let output = cmd.output().expect("Failed to execute command");
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
    let results = json.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["target"], "192.0.2.1");
    assert_eq!(results[1]["target"], "AS64500");
    for result in results {
        assert!(result.get("record").is_none());
        assert!(result["error"].as_str().unwrap().contains("timed out"));
    }
}

#[test]
fn test_invalid_domain_exits_before_resolving() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.args(["--domain", "not a domain"]);

    cmd.assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("not a domain"));
}

#[test]
fn test_unreachable_domain_lookup_finds_nothing() {
    let mut cmd = Command::cargo_bin("netowner").expect("Failed to find netowner binary");
    cmd.env_remove("NETWORKSDB_API_KEY").args([
        "--json",
        "--base-url",
        DEAD_BASE_URL,
        "--rate-limit-ms",
        "0",
        "--timeout-ms",
        "5000",
        "--domain",
        "example.com",
    ]);

    let output = cmd.output().expect("Failed to execute command");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
    let results = json.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["domain"], "example.com");
    assert_eq!(results[0]["related"], Value::Array(Vec::new()));
}
