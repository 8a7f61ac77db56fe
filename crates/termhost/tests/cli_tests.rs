//! End-to-end tests for the termhost binary against a throwaway control directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn termhost(control_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("termhost").unwrap();
    cmd.arg("--control-dir")
        .arg(control_dir.path())
        .env_remove("TERMHOST_CONTROL_DIR")
        .env("RUST_LOG", "off");
    cmd
}

fn control_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("th")
        .tempdir_in("/tmp")
        .unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("termhost")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("cleanup"));
}

#[test]
fn test_list_empty_control_dir() {
    let dir = control_dir();
    termhost(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));
}

#[test]
fn test_list_json_empty() {
    let dir = control_dir();
    termhost(&dir)
        .args(["--json", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"sessions":[]}"#));
}

#[test]
fn test_kill_unknown_session_exits_unavailable() {
    let dir = control_dir();
    termhost(&dir)
        .args(["kill", "missing"])
        .assert()
        .code(69)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_invalid_session_id_exits_usage() {
    let dir = control_dir();
    termhost(&dir)
        .args(["send", "../etc", "hi"])
        .assert()
        .code(64);
}

#[test]
fn test_unsupported_signal_exits_usage() {
    let dir = control_dir();
    termhost(&dir)
        .args(["kill", "abc", "--signal", "WINCH"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("unsupported signal"));
}

#[test]
fn test_cleanup_with_nothing_to_remove() {
    let dir = control_dir();
    termhost(&dir)
        .arg("cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean up"));
}

#[test]
fn test_run_records_session_and_exit_code() {
    let dir = control_dir();
    termhost(&dir)
        .args(["run", "--name", "probe", "--", "/bin/sh", "-c", "echo hello-run; exit 4"])
        .write_stdin("")
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(4)
        .stdout(predicate::str::contains("hello-run"));

    termhost(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("exited"))
        .stdout(predicate::str::contains("probe"));
}
