//! CLI smoke tests (no container runtime required)

use assert_cmd::Command;
use predicates::prelude::*;

fn bosun() -> Command {
    Command::cargo_bin("bosun").expect("binary builds")
}

#[test]
fn smoke_help_lists_subcommands() {
    bosun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("uninstall"))
        .stdout(predicate::str::contains("logs"));
}

#[test]
fn smoke_list_on_fresh_data_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    bosun()
        .args(["--data-dir"])
        .arg(dir.path())
        .args(["--json", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn smoke_status_of_unknown_app_fails_with_reason() {
    let dir = tempfile::tempdir().unwrap();
    bosun()
        .args(["--data-dir"])
        .arg(dir.path())
        .args(["status", "ghost"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown application"));
}

#[test]
fn smoke_invalid_lifecycle_target_fails() {
    let dir = tempfile::tempdir().unwrap();
    bosun()
        .args(["--data-dir"])
        .arg(dir.path())
        .args(["--json", "start", "app:ghost"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"error\":true"));
}

#[test]
fn smoke_missing_config_file_is_reported() {
    bosun()
        .args(["--config", "/nonexistent/bosun.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading config"));
}
