use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::tempdir;

fn demo(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(rel)
}

fn qualify(cwd: &std::path::Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("qualify").unwrap();
    cmd.current_dir(cwd).env_remove("QUALIFY_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn demo_protocol_validates() {
    let tmp = tempdir().unwrap();
    qualify(tmp.path())
        .arg("validate")
        .arg(demo("protocols/uv-preconditioning.yaml"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Validation OK"))
        .stdout(predicate::str::contains("UV-PRE@1.0.0: 3 phases, 6 steps"));
}

#[test]
fn json_report_carries_digest() {
    let tmp = tempdir().unwrap();
    let out = qualify(tmp.path())
        .args(["validate", "--format", "json"])
        .arg(demo("protocols/uv-preconditioning.yaml"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    let v: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["exit_code"], 0);
    assert_eq!(v["diagnostics"].as_array().unwrap().len(), 0);
    assert_eq!(v["protocol"]["id"], "UV-PRE");
    let digest = v["protocol"]["digest"].as_str().unwrap();
    assert!(digest.starts_with("sha256:"), "{digest}");
    assert_eq!(digest.len(), "sha256:".len() + 64);
}

#[test]
fn duplicate_sequence_is_a_protocol_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("broken.yaml");
    std::fs::write(
        &path,
        r#"
id: BROKEN
version: 1.0.0
name: Broken
category: test
phases:
  - id: p1
    steps:
      - { id: a, sequence: 1, action: measure }
      - { id: b, sequence: 1, action: measure }
"#,
    )
    .unwrap();

    qualify(tmp.path())
        .arg("validate")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("E_PROTO_"))
        .stderr(predicate::str::contains("Validation failed"));
}

#[test]
fn missing_file_is_a_read_error() {
    let tmp = tempdir().unwrap();
    let out = qualify(tmp.path())
        .args(["validate", "--format", "json", "nope.yaml"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
    let v: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["diagnostics"][0]["code"], "E_PROTO_READ");
}

#[test]
fn warnings_do_not_fail_validation() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("lax.json");
    std::fs::write(
        &path,
        r#"{"id": "LAX", "version": "0.1.0", "name": "Lax", "category": "test",
            "phases": [{"id": "p1", "steps": [{"id": "s1", "sequence": 1, "action": "calibrate"}]}]}"#,
    )
    .unwrap();

    qualify(tmp.path())
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("W_PROTO_NO_CRITERIA"))
        .stderr(predicate::str::contains("W_PROTO_UNRESOLVED_ACTION"))
        .stderr(predicate::str::contains("passed with warnings (2 warnings)"));
}

#[test]
fn bad_config_exits_with_config_error() {
    let tmp = tempdir().unwrap();
    std::fs::write(tmp.path().join("qualify.yaml"), "version: 7\n").unwrap();
    qualify(tmp.path())
        .arg("validate")
        .arg(demo("protocols/uv-preconditioning.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("E_CFG_PARSE"));
}
