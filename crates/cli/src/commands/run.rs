// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `stagekit run [module:function] [-r]`

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use stagekit_config::Config;
use stagekit_core::{ArgBag, FuncRef, StageFn, Value};
use stagekit_engine::Runtime;
use std::sync::Arc;

#[derive(Args)]
pub struct RunArgs {
    /// Target stage function as `module:function`; defaults to the
    /// configured `main`, or the unique saved root of the workspace.
    pub target: Option<String>,

    /// Delete the saved workspace state and start a new workflow
    #[arg(short = 'r', long = "reset")]
    pub reset: bool,
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = Config::load()?;

    if args.reset {
        let ws = stagekit_config::workspace_dir();
        if ws.exists() {
            std::fs::remove_dir_all(&ws)
                .with_context(|| format!("removing workspace `{}`", ws.display()))?;
        }
    }

    let target = args.target.clone().or_else(|| config.main.clone());
    let func = target.as_deref().map(resolve_target).transpose()?;

    let runtime = Runtime::new(config, ".")?;
    let output = runtime.run_blocking(func, ArgBag::default())?;
    if let Some(value) = output {
        println!("{}", render_value(&value));
    }
    Ok(())
}

/// Resolve `module:function` against the registry.
fn resolve_target(spec: &str) -> Result<Arc<StageFn>> {
    let (module, name) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid function path `{spec}` (expected module:function)"))?;
    match FuncRef::new(module, name).resolve() {
        Some(func) => Ok(func),
        None => bail!(
            "invalid function path `{spec}`: no such registration; \
             make sure the target function is registered as a stage"
        ),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Str(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
