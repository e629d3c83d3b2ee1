// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box CLI specs: invoke the built binary and check stdout,
//! stderr, and exit codes.

use assert_cmd::Command;

fn stagekit() -> Command {
    Command::cargo_bin("stagekit").expect("binary built")
}

#[test]
fn bare_invocation_lists_commands() {
    let assert = stagekit().assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for command in ["run", "log", "config"] {
        assert!(stdout.contains(command), "help lists `{command}`:\n{stdout}");
    }
    assert!(!stdout.contains("exec"), "runner subcommand stays hidden:\n{stdout}");
}

#[test]
fn log_reports_empty_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let assert = stagekit().current_dir(dir.path()).arg("log").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("no saved workflow"), "{stdout}");
}

#[test]
fn run_with_unknown_target_fails_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let assert = stagekit()
        .current_dir(dir.path())
        .args(["run", "nowhere:nothing"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("nowhere:nothing"), "{stderr}");
}

#[test]
fn run_without_target_or_cache_fails() {
    let dir = tempfile::tempdir().unwrap();
    stagekit().current_dir(dir.path()).arg("run").assert().failure();
}

#[test]
fn reset_flag_wipes_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join(".stagekit");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("stagekit.json"), b"[]").unwrap();

    // The run itself fails (nothing to resume), but the wipe happened.
    stagekit().current_dir(dir.path()).args(["run", "-r"]).assert().failure();
    assert!(!ws.exists());
}

#[test]
fn exec_with_bad_usage_fails() {
    stagekit().args(["exec", "/tmp/only-workspace"]).assert().failure();
}
