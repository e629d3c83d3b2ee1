// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory façade bound to a base directory.
//!
//! Stage bodies and the subprocess supervisor address files by paths
//! relative to either the run directory or the workspace directory; this
//! type owns the joining, normalization, and the small set of shell-like
//! file operations they need.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors from façade operations that involve serialization.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File operations rooted at a base directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a relative path against the base, lexically normalized.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        normalize(&self.base.join(rel.as_ref()))
    }

    pub fn has(&self, rel: impl AsRef<Path>) -> bool {
        self.path(rel).exists()
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> std::io::Result<String> {
        fs::read_to_string(self.path(rel))
    }

    pub fn write(&self, content: &str, rel: impl AsRef<Path>) -> std::io::Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    pub fn append(&self, content: &str, rel: impl AsRef<Path>) -> std::io::Result<()> {
        use std::io::Write;
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content.as_bytes())
    }

    pub fn load_json<T: DeserializeOwned>(&self, rel: impl AsRef<Path>) -> Result<T, WorkspaceError> {
        Ok(serde_json::from_slice(&fs::read(self.path(rel))?)?)
    }

    pub fn dump_json<T: Serialize>(&self, value: &T, rel: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::write(path, serde_json::to_vec(value)?)?)
    }

    /// Entry names under a directory; missing directories list empty.
    pub fn ls(&self, rel: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
        let entries = match fs::read_dir(self.path(rel)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names = Vec::new();
        for entry in entries {
            if let Ok(name) = entry?.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a file or directory tree; missing targets are not an error.
    pub fn rm(&self, rel: impl AsRef<Path>) -> std::io::Result<()> {
        let path = self.path(rel);
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Remove files whose name starts with `<stem>.` (the `stem.*` shell
    /// pattern used for per-subprocess artifacts).
    pub fn rm_stem(&self, stem: &str) -> std::io::Result<()> {
        let prefix = format!("{stem}.");
        for name in self.ls(".")? {
            if name.starts_with(&prefix) {
                self.rm(&name)?;
            }
        }
        Ok(())
    }

    pub fn cp(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> std::io::Result<()> {
        let to = self.path(to);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path(from), to).map(|_| ())
    }

    pub fn mv(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> std::io::Result<()> {
        let to = self.path(to);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.path(from), to)
    }

    #[cfg(unix)]
    pub fn ln(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> std::io::Result<()> {
        std::os::unix::fs::symlink(self.path(target), self.path(link))
    }

    pub fn mkdir(&self, rel: impl AsRef<Path>) -> std::io::Result<()> {
        fs::create_dir_all(self.path(rel))
    }
}

/// Lexical path normalization: resolves `.` and `..` components without
/// touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
