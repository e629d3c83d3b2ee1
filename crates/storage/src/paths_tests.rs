// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_hints(dir.path()).unwrap().is_empty());
}

#[test]
fn record_hint_appends_once() {
    let dir = tempfile::tempdir().unwrap();
    record_hint(dir.path(), Path::new("/opt/pipeline/bin")).unwrap();
    record_hint(dir.path(), Path::new("/opt/pipeline/bin")).unwrap();
    record_hint(dir.path(), Path::new("/usr/local/bin")).unwrap();

    let hints = load_hints(dir.path()).unwrap();
    assert_eq!(
        hints,
        vec![PathBuf::from("/opt/pipeline/bin"), PathBuf::from("/usr/local/bin")]
    );
}

#[test]
fn record_exe_dir_records_current_binary() {
    let dir = tempfile::tempdir().unwrap();
    record_exe_dir(dir.path()).unwrap();
    let hints = load_hints(dir.path()).unwrap();
    assert_eq!(hints.len(), 1);
    assert!(hints[0].is_absolute());
}
