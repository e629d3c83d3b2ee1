// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable cache of root stage records.
//!
//! The cache is the commit point of every checkpoint: records are written
//! to a staging file, read back and verified against the in-memory tree,
//! and only then renamed over the authoritative file. A crash anywhere in
//! that sequence leaves the previous cache intact.

use stagekit_core::StageRecord;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Authoritative cache file, root records most-recently-used first.
pub const CACHE_FILE: &str = "stagekit.json";

/// Staging file used during an atomic save.
pub const CACHE_STAGING_FILE: &str = "_stagekit.json";

/// Errors from cache load/save.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("saved cache does not match the in-memory tree")]
    Verify,
}

/// Load the saved root records.
///
/// A missing file yields an empty list. A corrupt file is rotated to
/// `.bak` and the engine starts fresh rather than failing startup.
pub fn load_roots(dir: &Path) -> Result<Vec<StageRecord>, CacheError> {
    let path = dir.join(CACHE_FILE);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&content) {
        Ok(roots) => Ok(roots),
        Err(e) => {
            let bak = rotate_bak_path(&path);
            warn!(
                error = %e,
                path = %path.display(),
                bak = %bak.display(),
                "Corrupt stage cache, moving to .bak and starting fresh",
            );
            fs::rename(&path, &bak)?;
            Ok(Vec::new())
        }
    }
}

/// Atomically persist the root records.
///
/// Writes the staging file, fsyncs, re-reads it and asserts structural
/// equality with `roots`, then renames over the cache file and fsyncs the
/// directory. On a verification mismatch the swap is aborted and the
/// stale cache file remains authoritative.
pub fn save_roots(dir: &Path, roots: &[StageRecord]) -> Result<(), CacheError> {
    fs::create_dir_all(dir)?;
    let staging = dir.join(CACHE_STAGING_FILE);
    let target = dir.join(CACHE_FILE);

    {
        let mut file = File::create(&staging)?;
        file.write_all(&serde_json::to_vec(roots)?)?;
        file.sync_all()?;
    }

    // Verify the staged bytes decode back to the same tree.
    let reread: Vec<StageRecord> = serde_json::from_slice(&fs::read(&staging)?)?;
    if reread != roots {
        warn!(
            path = %staging.display(),
            "checkpoint verification failed, keeping previous cache",
        );
        return Err(CacheError::Verify);
    }

    fs::rename(&staging, &target)?;
    let dir_handle = File::open(dir)?;
    dir_handle.sync_all()?;
    Ok(())
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
