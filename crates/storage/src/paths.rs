// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executable path hints for subprocess runners.
//!
//! `paths.json` records the directories of binaries that registered stage
//! functions into this workspace, so a subprocess runner (or a later run
//! launched elsewhere) can locate the right executable again.

use std::fs;
use std::path::{Path, PathBuf};

/// Hint file inside the workspace directory.
pub const PATHS_FILE: &str = "paths.json";

/// Load recorded hints; a missing file yields an empty list.
pub fn load_hints(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let path = dir.join(PATHS_FILE);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&content).map_err(std::io::Error::other)
}

/// Record a hint if not already present.
pub fn record_hint(dir: &Path, hint: &Path) -> std::io::Result<()> {
    let mut hints = load_hints(dir)?;
    if hints.iter().any(|h| h == hint) {
        return Ok(());
    }
    hints.push(hint.to_path_buf());
    fs::create_dir_all(dir)?;
    fs::write(
        dir.join(PATHS_FILE),
        serde_json::to_vec(&hints).map_err(std::io::Error::other)?,
    )
}

/// Record the directory of the running executable.
pub fn record_exe_dir(dir: &Path) -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    match exe.parent() {
        Some(parent) => record_hint(dir, parent),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
