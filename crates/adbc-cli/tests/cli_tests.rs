//! Integration tests for the Adbc CLI
//!
//! These tests invoke the actual adbc-cli binary and verify:
//! - Exit codes (0 = success, 1 = violation or verification failure, 2 = error)
//! - stdout/stderr output
//! - JSON output format

use std::path::PathBuf;
use std::process::Command;

// ── Helpers ───────────────────────────────────────────────

fn adbc_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_adbc-cli"))
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn run_adbc(args: &[&str]) -> std::process::Output {
    Command::new(adbc_bin())
        .args(args)
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .env_remove("RUST_LOG")
        .env_remove("ADBC_ENFORCE")
        .env_remove("ADBC_ENGINE")
        .env_remove("ADBC_KEYWORD_PREFIX")
        .env_remove("ADBC_CHECK_SUBSTITUTION")
        .env_remove("ADBC_CHECK_POSTCONDITIONS")
        .output()
        .expect("failed to execute adbc-cli")
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

// ── Version ───────────────────────────────────────────────

#[test]
fn test_version_command() {
    let output = run_adbc(&["version"]);
    assert!(output.status.success(), "version should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("adbc"), "should contain 'adbc'");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "should contain version"
    );
}

#[test]
fn test_version_flag() {
    let output = run_adbc(&["--version"]);
    assert!(output.status.success(), "--version should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

// ── Check ─────────────────────────────────────────────────

#[test]
fn test_check_clean_trace() {
    let output = run_adbc(&[
        "check",
        &fixture("bank.json"),
        "--trace",
        &fixture("trace_ok.json"),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "stdout: {}", stdout);
    assert!(stdout.contains("4 calls, 0 violations, 0 errors"));
}

#[test]
fn test_check_reports_violations() {
    let output = run_adbc(&[
        "check",
        &fixture("bank.json"),
        "--trace",
        &fixture("trace_violation.json"),
    ]);
    assert_eq!(output.status.code(), Some(1), "violations should exit 1");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Precondition broken!"));
    assert!(stdout.contains("amount>0"));
    assert!(stdout.contains("Teller.pay()"), "caller should be blamed");
    assert!(stdout.contains("precondition strengthened"));
    assert!(stdout.contains("3 calls, 2 violations, 0 errors"));
}

#[test]
fn test_check_json_output() {
    let output = run_adbc(&[
        "check",
        &fixture("bank.json"),
        "--trace",
        &fixture("trace_violation.json"),
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["violations"], 2);
    assert_eq!(json["errors"], 0);
    let calls = json["calls"].as_array().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0]["status"], "violation");
    assert_eq!(calls[0]["violation"]["kind"], "precondition");
    assert_eq!(calls[0]["violation"]["expression"], "amount>0");
    assert_eq!(calls[1]["violation"]["rule"], "precondition_strengthened");
    assert_eq!(calls[1]["violation"]["blame"], "LockedAccount.transfer(double, Account)");
    assert_eq!(calls[2]["status"], "ok");
}

#[test]
fn test_check_with_enforcement_disabled_by_env() {
    let output = Command::new(adbc_bin())
        .args([
            "check",
            &fixture("bank.json"),
            "--trace",
            &fixture("trace_violation.json"),
        ])
        .env("ADBC_ENFORCE", "off")
        .output()
        .expect("failed to execute adbc-cli");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_check_missing_trace() {
    let output = run_adbc(&[
        "check",
        &fixture("bank.json"),
        "--trace",
        "/nonexistent/trace.json",
    ]);
    assert_eq!(output.status.code(), Some(2), "missing file should exit 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"));
}

#[test]
fn test_check_invalid_program() {
    let output = run_adbc(&[
        "check",
        &fixture("trace_ok.json"),
        "--trace",
        &fixture("trace_ok.json"),
    ]);
    assert_eq!(output.status.code(), Some(2));
}

// ── Resolve ───────────────────────────────────────────────

#[test]
fn test_resolve_inherited_precondition() {
    let output = run_adbc(&[
        "resolve",
        &fixture("bank.json"),
        "SavingsAccount.withdraw(double)",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("((amount>0) && (amount <= $this.balance))"));
    assert!(stdout.contains("($this.balance == $old($this.balance) - amount)"));
}

#[test]
fn test_resolve_invariant() {
    let output = run_adbc(&["resolve", &fixture("bank.json"), "SavingsAccount", "--json"]);
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(
        json["contracts"][0]["contract"],
        serde_json::json!(["($this.balance >= 0)", "$this.rate >= 0"])
    );
}

#[test]
fn test_resolve_advice_at_join_point() {
    let output = run_adbc(&["resolve", &fixture("bank.json"), "@Audit.log", "--json"]);
    assert!(output.status.success());
    let json = stdout_json(&output);
    let first = &json["contracts"][0];
    assert_eq!(first["context"], "at Account.deposit(double)");
    assert_eq!(first["contract"], serde_json::json!(["((amount>0))"]));
}

#[test]
fn test_resolve_unknown_declaration() {
    let output = run_adbc(&["resolve", &fixture("bank.json"), "Account.close()"]);
    assert_eq!(output.status.code(), Some(2));
}

// ── Verify ────────────────────────────────────────────────

#[test]
fn test_verify_clean_program() {
    let output = run_adbc(&["verify", &fixture("bank.json")]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {}", stdout);
    assert!(stdout.contains("verified"));
}

#[test]
fn test_verify_broken_program() {
    let output = run_adbc(&["verify", &fixture("broken.json")]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[placeholder]"));
    assert!(stdout.contains("[substitution]"));
    assert!(stdout.contains("warning [dead-advice]"));
}

#[test]
fn test_verify_strict_config_rejects_dead_advice() {
    let output = run_adbc(&[
        "verify",
        &fixture("broken.json"),
        "--config",
        &fixture("strict.json"),
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["valid"], false);
    let diagnostics = json["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 3);
    assert!(diagnostics
        .iter()
        .all(|d| d["severity"] == "error"));
    assert!(diagnostics.iter().any(|d| d["kind"] == "dead-advice"));
}

// ── Eval ──────────────────────────────────────────────────

#[test]
fn test_eval_arithmetic() {
    let output = run_adbc(&["eval", "1 + 2 * 3"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "7");
}

#[test]
fn test_eval_with_bindings() {
    let output = run_adbc(&["eval", "amount > 0 && owner == \"alice\"", "--bindings", r#"{"amount": 5, "owner": "alice"}"#]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
}

#[test]
fn test_eval_malformed_expression() {
    let output = run_adbc(&["eval", "amount >"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Malformed expression"));
}

#[test]
fn test_eval_unknown_engine() {
    let output = run_adbc(&["eval", "true", "--engine", "nashorn"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unknown_command_fails() {
    let output = run_adbc(&["nonexistent"]);
    assert!(!output.status.success());
}
