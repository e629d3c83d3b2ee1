// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Cursor;

#[test]
fn select_accepts_valid_choice() {
    let mut input = Cursor::new(b"2\n".to_vec());
    let mut output = Vec::new();
    let choice = select(&mut input, &mut output, "Pick:", &["a", "b"]).unwrap();
    assert_eq!(choice, Some(2));

    let rendered = String::from_utf8(output).unwrap();
    assert!(rendered.contains("1) a"));
    assert!(rendered.contains("3) Exit."));
}

#[test]
fn select_reprompts_on_garbage_then_exit() {
    let mut input = Cursor::new(b"nope\n9\n3\n".to_vec());
    let mut output = Vec::new();
    let choice = select(&mut input, &mut output, "Pick:", &["a", "b"]).unwrap();
    assert_eq!(choice, None);

    let rendered = String::from_utf8(output).unwrap();
    assert_eq!(rendered.matches("Please input a number").count(), 2);
}

#[test]
fn merge_creates_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stagekit.toml");

    merge_into_file(&path, "rerun_strategy = \"auto\"\n").unwrap();
    merge_into_file(&path, "[job]\njob = \"slurm\"\n").unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: toml::Table = toml::from_str(&content).unwrap();
    assert_eq!(parsed["rerun_strategy"].as_str(), Some("auto"));
    assert_eq!(parsed["job"]["job"].as_str(), Some("slurm"));
}

#[test]
fn invalid_fragment_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stagekit.toml");
    merge_into_file(&path, "main = \"workflow:main\"\n").unwrap();

    assert!(merge_into_file(&path, "not valid toml [").is_err());
    // A fragment that re-defines an existing key is rejected as a whole.
    assert!(merge_into_file(&path, "main = \"other:main\"\n").is_err());

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, "main = \"workflow:main\"\n");
}
