// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the behavioral specs.

use stagekit_config::Config;
use stagekit_engine::Runtime;
use std::path::Path;

/// Engine over a tempdir workspace with default configuration.
pub fn runtime(dir: &Path) -> Runtime {
    Runtime::new(Config::default(), dir).expect("runtime bootstrap")
}

/// Workspace directory the engine writes under `dir`.
pub fn ws_dir(dir: &Path) -> std::path::PathBuf {
    dir.join(".stagekit")
}
