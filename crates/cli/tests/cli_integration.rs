//! CLI integration tests for every subcommand.
//!
//! Uses `assert_cmd` to spawn the `kyc` binary and verify exit codes,
//! stdout content, and stderr content. Fixtures are written to temporary
//! directories.

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const NAMIBIAN_ID: &str = "REPUBLIC OF NAMIBIA
NATIONAL IDENTITY CARD
ID NO: 85010112345
SURNAME: SHIKONGO
FIRST NAMES: MARIA NDAPEWA
DATE OF BIRTH: 01/01/1985
SEX: F
NATIONALITY: NAMIBIAN
";

fn kyc() -> Command {
    let mut cmd = cargo_bin_cmd!("kyc");
    cmd.env_remove("ANTHROPIC_API_KEY");
    cmd
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    kyc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "KYC document verification and audit ledger tools",
        ));
}

#[test]
fn version_exits_0() {
    kyc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kyc"));
}

// ──────────────────────────────────────────────
// 2. detect
// ──────────────────────────────────────────────

#[test]
fn detect_namibian_text() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "id.txt", NAMIBIAN_ID);
    kyc()
        .arg("detect")
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains("NA (Namibia)"))
        .stdout(predicate::str::contains("via keyword"));
}

#[test]
fn detect_json_without_keywords_is_default_with_zero() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "blank.txt", "nothing to see here");
    let out = kyc()
        .args(["--output", "json", "detect"])
        .arg(&doc)
        .output()
        .unwrap();
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["country"], "NA");
    assert_eq!(json["confidence"], 0.0);
    assert_eq!(json["method"], "error");
}

#[test]
fn detect_missing_file_exits_1() {
    kyc()
        .args(["detect", "/nonexistent/id.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading file"));
}

// ──────────────────────────────────────────────
// 3. validate
// ──────────────────────────────────────────────

#[test]
fn validate_good_fields_exits_0() {
    let tmp = TempDir::new().unwrap();
    let fields = write(
        &tmp,
        "fields.json",
        r#"{"id_number": "85010112345", "full_name": "Maria Shikongo", "date_of_birth": "01/01/1985"}"#,
    );
    kyc()
        .args(["validate", "--country", "NA"])
        .arg(&fields)
        .assert()
        .success()
        .stdout(predicate::str::contains("score 1.00"));
}

#[test]
fn validate_bad_id_exits_1_with_failed_check() {
    let tmp = TempDir::new().unwrap();
    let fields = write(
        &tmp,
        "fields.json",
        r#"{"id_number": "123", "full_name": "Maria Shikongo", "date_of_birth": "01/01/1985"}"#,
    );
    let out = kyc()
        .args(["--output", "json", "validate", "--country", "NA"])
        .arg(&fields)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["failed_checks"], serde_json::json!(["id_number"]));
}

#[test]
fn validate_invalid_json_exits_1() {
    let tmp = TempDir::new().unwrap();
    let fields = write(&tmp, "fields.json", "{not json");
    kyc()
        .args(["validate", "--country", "ZA"])
        .arg(&fields)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error parsing JSON"));
}

// ──────────────────────────────────────────────
// 4. run and verify
// ──────────────────────────────────────────────

#[test]
fn run_completes_and_exported_trail_verifies() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "id.txt", NAMIBIAN_ID);
    let trail = tmp.path().join("trail.json");

    let out = kyc()
        .args(["--output", "json", "run", "--user", "user-1"])
        .arg(&doc)
        .arg("--export-trail")
        .arg(&trail)
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let workflow: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(workflow["current_state"], "completed");
    assert_eq!(workflow["detected_country"], "NA");
    assert_eq!(workflow["document_id"], "id.txt");
    assert_eq!(workflow["audit_trail"].as_array().unwrap().len(), 8);

    kyc()
        .arg("verify")
        .arg(&trail)
        .assert()
        .success()
        .stdout(predicate::str::contains("8 entries verified"));
}

#[test]
fn verify_detects_tampering() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "id.txt", NAMIBIAN_ID);
    let trail = tmp.path().join("trail.json");
    kyc()
        .args(["--quiet", "run", "--user", "user-1"])
        .arg(&doc)
        .arg("--export-trail")
        .arg(&trail)
        .assert()
        .success();

    let mut entries: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&trail).unwrap()).unwrap();
    entries[3]["event_data"]["tampered"] = serde_json::json!(true);
    fs::write(&trail, entries.to_string()).unwrap();

    kyc()
        .arg("verify")
        .arg(&trail)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("integrity violation"));
}

#[test]
fn run_text_output_and_hint() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "scan.txt", "ID NO: 123456789\nNAME: K MOGAE\n");
    kyc()
        .args(["run", "--user", "user-2", "--country-hint", "BW", "--document-id", "doc-9"])
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains("BW (Botswana)"))
        .stdout(predicate::str::contains("Rejected"));
}

#[test]
fn run_rejects_unknown_hint() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "id.txt", NAMIBIAN_ID);
    kyc()
        .args(["run", "--user", "u", "--country-hint", "KE"])
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a supported country code"));
}

#[test]
fn run_with_bad_config_exits_1() {
    let tmp = TempDir::new().unwrap();
    let doc = write(&tmp, "id.txt", NAMIBIAN_ID);
    let config = write(&tmp, "kyc.toml", "[policy]\nauto_approve_threshold = 2.0\n");
    kyc()
        .args(["run", "--user", "u", "--config"])
        .arg(&config)
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("auto_approve_threshold"));
}

// ──────────────────────────────────────────────
// 5. prune
// ──────────────────────────────────────────────

fn exported_trail(tmp: &TempDir, name: &str) -> PathBuf {
    let doc = write(tmp, "id.txt", NAMIBIAN_ID);
    let trail = tmp.path().join(name);
    kyc()
        .args(["--quiet", "run", "--user", "user-1"])
        .arg(&doc)
        .arg("--export-trail")
        .arg(&trail)
        .assert()
        .success();
    trail
}

#[test]
fn prune_keeps_trails_inside_the_window() {
    let tmp = TempDir::new().unwrap();
    let trail = exported_trail(&tmp, "trail.json");
    kyc()
        .args(["prune", "--days", "30"])
        .arg(&trail)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 of 1 trail(s) older than 30 day(s)"));
    assert!(trail.exists());
}

#[test]
fn prune_deletes_expired_trails() {
    let tmp = TempDir::new().unwrap();
    let first = exported_trail(&tmp, "a.json");
    let second = exported_trail(&tmp, "b.json");
    let out = kyc()
        .args(["--output", "json", "prune", "--days", "0", "--delete"])
        .arg(&first)
        .arg(&second)
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["expired"].as_array().unwrap().len(), 2);
    assert!(!first.exists());
    assert!(!second.exists());
}

#[test]
fn prune_reads_retention_from_config() {
    let tmp = TempDir::new().unwrap();
    let trail = exported_trail(&tmp, "trail.json");
    let config = write(&tmp, "kyc.toml", "[ledger]\nretention_days = 0\n");
    kyc()
        .args(["prune", "--config"])
        .arg(&config)
        .arg(&trail)
        .assert()
        .success()
        .stdout(predicate::str::contains("expired"))
        .stdout(predicate::str::contains("1 of 1 trail(s)"));
    assert!(trail.exists());
}

#[test]
fn prune_without_window_exits_1() {
    let tmp = TempDir::new().unwrap();
    let trail = exported_trail(&tmp, "trail.json");
    kyc()
        .arg("prune")
        .arg(&trail)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no retention window"));
}

#[test]
fn prune_rejects_a_broken_trail() {
    let tmp = TempDir::new().unwrap();
    let trail = exported_trail(&tmp, "trail.json");
    let mut entries: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&trail).unwrap()).unwrap();
    entries[2]["previous_hash"] = serde_json::json!("00");
    fs::write(&trail, entries.to_string()).unwrap();
    kyc()
        .args(["prune", "--days", "0"])
        .arg(&trail)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not link"));
    assert!(trail.exists());
}

#[test]
fn quiet_json_error_is_silent() {
    kyc()
        .args(["--quiet", "--output", "json", "verify", "/nonexistent/trail.json"])
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}
