// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use stagekit_core::{args, FuncRef, Rerun};

fn record(name: &str, version: u64, parent_version: u64, done: bool) -> StageRecord {
    StageRecord {
        func: FuncRef::new("log_tests", name),
        args: Vec::new(),
        kwargs: Default::default(),
        cwd: None,
        history: Vec::new(),
        data: Default::default(),
        result: None,
        done,
        error: None,
        version,
        parent_version,
        rerun: Rerun::Never,
    }
}

#[test]
fn tree_renders_numbered_children() {
    let mut root = record("main", 2, 0, true);
    root.history.push(record("download", 2, 2, true));
    root.history.push(record("process", 2, 2, true));

    let rendered = render(&root, 0);
    assert_eq!(
        rendered,
        "log_tests:main\n1) log_tests:download\n2) log_tests:process\n"
    );
}

#[test]
fn stale_children_are_hidden() {
    let mut root = record("main", 2, 0, true);
    root.history.push(record("old", 2, 1, true));
    root.history.push(record("new", 2, 2, true));

    let rendered = render(&root, 0);
    assert!(!rendered.contains("old"));
    assert!(rendered.contains("new"));
}

#[test]
fn unfinished_stages_are_annotated() {
    let mut failed = record("solve", 1, 1, false);
    failed.error = Some(stagekit_core::ErrorInfo::new("body", "diverged"));
    let mut root = record("main", 1, 0, false);
    root.history.push(failed);

    let rendered = render(&root, 0);
    assert!(rendered.contains("log_tests:main  [incomplete]"), "{rendered}");
    assert!(rendered.contains("log_tests:solve  [failed]"), "{rendered}");
}

#[test]
fn nested_children_indent() {
    let mut leaf = record("leaf", 1, 1, true);
    leaf.args = args![1];
    let mut mid = record("mid", 1, 1, true);
    mid.history.push(leaf);
    let mut root = record("main", 1, 0, true);
    root.history.push(mid);

    let rendered = render(&root, 0);
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "log_tests:main");
    assert_eq!(lines[1], "1) log_tests:mid");
    assert_eq!(lines[2], "  1) log_tests:leaf");
}
