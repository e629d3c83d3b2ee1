// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage context accessor.
//!
//! `ctx` reads walk the stage chain from the current stage to the root
//! (per-stage `data` first, then call keyword arguments), falling back to
//! process-wide config defaults. Writes land on the current stage only.

use crate::call::{call, shell_stage};
use crate::runtime::{current_scope, current_stage};
use stagekit_core::{args, reason, ArgBag, ErrorInfo, Value};
use stagekit_storage::{normalize, Workspace};
use std::path::PathBuf;

/// Handle to the current stage context.
#[derive(Debug, Clone, Copy)]
pub struct Ctx;

/// The context of the currently running stage.
pub fn ctx() -> Ctx {
    Ctx
}

impl Ctx {
    /// Walk data → kwargs up the parent chain, then config defaults.
    pub fn get(&self, key: &str) -> Option<Value> {
        let scope = current_scope()?;
        let mut current = scope.stage.clone();
        while let Some(stage) = current {
            let node = stage.lock();
            if let Some(value) = node.data.get(key) {
                return Some(value.clone());
            }
            if let Some(value) = node.bag.kwargs.get(key) {
                return Some(value.clone());
            }
            current = node.parent.as_ref().and_then(|weak| weak.upgrade());
        }
        scope.rt.config.data_value(key)
    }

    /// Set a per-stage context value; an error outside a running stage.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ErrorInfo> {
        let Some(stage) = current_stage() else {
            return Err(ErrorInfo::new(
                reason::OUTSIDE_STAGE,
                "cannot set context values outside a running stage",
            ));
        };
        stage.lock().data.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Working directory composed from the fragments of every stage on
    /// the path from the root, with the `setwd` override appended last.
    pub fn cwd(&self) -> PathBuf {
        let Some(scope) = current_scope() else {
            return PathBuf::from(".");
        };
        let mut fragments: Vec<String> = Vec::new();
        if let Some(over) = scope.rt.chdir.lock().clone() {
            fragments.push(over);
        }
        let mut current = scope.stage.clone();
        while let Some(stage) = current {
            let node = stage.lock();
            if let Some(fragment) = &node.cwd {
                fragments.push(fragment.clone());
            }
            current = node.parent.as_ref().and_then(|weak| weak.upgrade());
        }
        fragments.push(".".to_string());
        fragments.reverse();
        normalize(&fragments.iter().collect::<PathBuf>())
    }

    /// Set the working-directory fragment for subsequent child calls.
    pub fn setwd(&self, cwd: Option<&str>) {
        if let Some(scope) = current_scope() {
            *scope.rt.chdir.lock() = cwd.map(String::from);
        }
    }

    /// Run a shell command as a child stage, in the context directory.
    pub async fn call(&self, cmd: &str) -> Result<(), ErrorInfo> {
        let cwd = self.cwd();
        let bag = ArgBag::positional(args![cmd, cwd.to_string_lossy().as_ref()]);
        call(shell_stage(), bag).await.map(|_| ())
    }

    /// Directory façade bound to the launch directory.
    pub fn root(&self) -> Option<Workspace> {
        current_scope().map(|scope| scope.rt.root_dir.clone())
    }

    /// Directory façade bound to the workspace directory.
    pub fn workspace(&self) -> Option<Workspace> {
        current_scope().map(|scope| scope.rt.ws.clone())
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
