// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Layered TOML configuration for stagekit.
//!
//! Settings merge local-over-global: built-in defaults, then the global
//! file (`~/.stagekit.toml`), then the local file (`./stagekit.toml`).
//! Tables deep-merge, lists append, scalars replace. File locations and
//! the workspace directory can be overridden through
//! `STAGEKIT_CONFIG_{GLOBAL,LOCAL,WORKSPACE}`.

use serde::{Deserialize, Serialize};
use stagekit_core::{Rerun, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment override for the global config file path.
pub const ENV_GLOBAL: &str = "STAGEKIT_CONFIG_GLOBAL";
/// Environment override for the local config file path.
pub const ENV_LOCAL: &str = "STAGEKIT_CONFIG_LOCAL";
/// Environment override for the workspace directory.
pub const ENV_WORKSPACE: &str = "STAGEKIT_CONFIG_WORKSPACE";

const GLOBAL_FILE: &str = ".stagekit.toml";
const LOCAL_FILE: &str = "stagekit.toml";
const WORKSPACE_DIR: &str = ".stagekit";

/// Errors from config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialization failed: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Job adapter selection and cluster parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobParams {
    /// Adapter name (`local`, `slurm`, ...).
    pub job: String,
    /// Nodes available for MPI tasks.
    pub nnodes: u64,
    /// Requested walltime in minutes, when the session is time-limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walltime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus_per_node: Option<u64>,
    pub gpus_per_node: u64,
    /// Whether a node can be shared by multiple MPI calls.
    pub share_node: bool,
    /// Minutes reserved before the walltime limit to exit cleanly.
    pub gap: f64,
    /// Adapter-specific settings.
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            job: "local".to_string(),
            nnodes: 1,
            walltime: None,
            cpus_per_node: None,
            gpus_per_node: 0,
            share_node: true,
            gap: 2.0,
            extra: toml::Table::new(),
        }
    }
}

/// Merged stagekit configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Registration modules that must be present before execution.
    pub modules: Vec<String>,
    /// Default target as `module:function` for `stagekit run` without an
    /// argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// Default re-run policy for wrapped functions.
    pub rerun_strategy: Rerun,
    /// Payload chunk size in MB; absent disables chunking and keeps
    /// values in-tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_chunk_size: Option<f64>,
    pub job: JobParams,
    /// Defaults visible through `ctx.get` when no stage provides a key.
    pub data: BTreeMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            main: None,
            rerun_strategy: Rerun::Auto,
            data_chunk_size: None,
            job: JobParams::default(),
            data: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load and merge the global and local config files.
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from(Some(&global_path()), Some(&local_path()))
    }

    /// Merge defaults with explicit file paths; missing files are skipped.
    pub fn load_from(global: Option<&Path>, local: Option<&Path>) -> Result<Config, ConfigError> {
        let mut merged = toml::Value::try_from(Config::default())?;
        for path in [global, local].into_iter().flatten() {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let layer: toml::Value = toml::from_str(&content)?;
            merge_value(&mut merged, layer);
        }
        Ok(merged.try_into()?)
    }

    /// Context default for a data key, as a canonical value.
    pub fn data_value(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(toml_to_value)
    }

    /// Configured modules with no registration in the process.
    pub fn missing_modules(&self, registered: &[String]) -> Vec<String> {
        self.modules
            .iter()
            .filter(|m| !registered.contains(m))
            .cloned()
            .collect()
    }
}

/// Path of the global config file.
pub fn global_path() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_GLOBAL) {
        return PathBuf::from(path);
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(GLOBAL_FILE)
}

/// Path of the local (per-project) config file.
pub fn local_path() -> PathBuf {
    std::env::var(ENV_LOCAL).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(LOCAL_FILE))
}

/// Workspace directory holding the cache and subprocess artifacts.
pub fn workspace_dir() -> PathBuf {
    std::env::var(ENV_WORKSPACE)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(WORKSPACE_DIR))
}

/// Deep-merge `layer` into `base`: tables recurse, arrays append,
/// anything else replaces.
fn merge_value(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (toml::Value::Array(base), toml::Value::Array(layer)) => {
            base.extend(layer);
        }
        (base, layer) => *base = layer,
    }
}

fn toml_to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(n) => Value::Int(*n),
        toml::Value::Float(x) => Value::Float(*x),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
        toml::Value::Array(items) => Value::List(items.iter().map(toml_to_value).collect()),
        toml::Value::Table(table) => Value::Map(
            table.iter().map(|(k, v)| (k.clone(), toml_to_value(v))).collect(),
        ),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
