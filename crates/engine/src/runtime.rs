// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine runtime: workspace bootstrap, cache revival, task-local scope,
//! and the root-matching entry point.
//!
//! Execution is single-threaded cooperative: `run_blocking` drives a
//! current-thread tokio runtime, so all tree state, dispatcher tables,
//! and the payload store are only ever touched from one thread.

use crate::dispatcher::Dispatcher;
use crate::error::RuntimeError;
use crate::{call, checkpoint, executor, mpiexec};
use parking_lot::Mutex;
use stagekit_adapters::{job_adapter, JobAdapter};
use stagekit_config::Config;
use stagekit_core::{payload, stage, ArgBag, Clock, StageFn, StageHandle, SystemClock, Value};
use stagekit_storage::{load_roots, FsChunkIo, Workspace};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use tracing::{error, warn};

/// Shared engine state behind every scope.
pub struct RuntimeInner {
    pub(crate) config: Config,
    /// Workspace directory (cache, chunks, subprocess artifacts).
    pub(crate) ws: Workspace,
    /// Directory the run was launched from.
    pub(crate) root_dir: Workspace,
    /// Root stages, most-recently-used first. The working root is renewed
    /// in place; new roots insert at the front.
    pub(crate) cache: Mutex<Vec<StageHandle>>,
    /// `ctx.setwd` override, consumed by the next child call.
    pub(crate) chdir: Mutex<Option<String>>,
    /// Single-flight checkpoint flag.
    pub(crate) saving: AtomicBool,
    pub(crate) job: OnceLock<Arc<dyn JobAdapter>>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) clock: Arc<dyn Clock>,
}

impl RuntimeInner {
    /// Adapter selected by the `job` config table, built on first use.
    pub(crate) fn job_adapter(&self) -> Result<Arc<dyn JobAdapter>, crate::ExecError> {
        if let Some(job) = self.job.get() {
            return Ok(job.clone());
        }
        let job = job_adapter(&self.config.job, self.clock.clone())?;
        let _ = self.job.set(job.clone());
        Ok(job)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.ws
    }

    pub fn root_dir(&self) -> &Workspace {
        &self.root_dir
    }
}

/// Task-local execution scope: the runtime plus the stage running in the
/// current task's frame.
#[derive(Clone)]
pub struct Scope {
    pub(crate) rt: Arc<RuntimeInner>,
    pub(crate) stage: Option<StageHandle>,
}

impl Scope {
    pub fn stage(&self) -> Option<&StageHandle> {
        self.stage.as_ref()
    }
}

tokio::task_local! {
    pub(crate) static SCOPE: Scope;
}

/// The scope of the current task, if inside a runtime.
pub fn current_scope() -> Option<Scope> {
    SCOPE.try_with(|scope| scope.clone()).ok()
}

/// The stage running in the current task's frame.
pub fn current_stage() -> Option<StageHandle> {
    current_scope().and_then(|scope| scope.stage)
}

pub(crate) async fn scoped<F: std::future::Future>(scope: Scope, fut: F) -> F::Output {
    SCOPE.scope(scope, fut).await
}

/// Spawn a helper task that inherits the creating stage's scope, so
/// `ctx` lookups keep working from nested tasks.
pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_scope() {
        Some(scope) => tokio::spawn(SCOPE.scope(scope, fut)),
        None => tokio::spawn(fut),
    }
}

/// One workflow engine bound to a workspace.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Bootstrap a runtime: configure the payload store, revive the saved
    /// cache, and register the builtin stages.
    pub fn new(config: Config, base_dir: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        Self::with_clock(config, base_dir, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        base_dir: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuntimeError> {
        let base = base_dir.as_ref();
        let ws = Workspace::new(base.join(stagekit_config::workspace_dir()));
        payload::configure(
            Some(Arc::new(FsChunkIo::new(ws.base()))),
            config.data_chunk_size,
        );

        let missing = config.missing_modules(&stagekit_core::func::registered_modules());
        // Builtins register lazily below, so only report user modules.
        for module in &missing {
            if module != "stagekit" {
                warn!(module = %module, "configured module has no registrations");
            }
        }
        call::shell_stage();
        mpiexec::exec_stage();

        let roots = load_roots(ws.base())?;
        let cache = roots.into_iter().map(|record| record.revive(None)).collect();

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                ws,
                root_dir: Workspace::new(base),
                cache: Mutex::new(cache),
                chdir: Mutex::new(None),
                saving: AtomicBool::new(false),
                job: OnceLock::new(),
                dispatcher: Dispatcher::new(),
                clock,
            }),
        })
    }

    pub fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }

    /// Execute a workflow: `target` is the main stage function, or `None`
    /// to resume the unique saved root.
    pub async fn run(
        &self,
        target: Option<Arc<StageFn>>,
        bag: ArgBag,
    ) -> Result<Option<Value>, RuntimeError> {
        let rt = self.inner.clone();
        scoped(Scope { rt: rt.clone(), stage: None }, run_root(rt, target, bag)).await
    }

    /// Synchronous entry used by the CLI: drives a current-thread tokio
    /// runtime to completion.
    pub fn run_blocking(
        &self,
        target: Option<Arc<StageFn>>,
        bag: ArgBag,
    ) -> Result<Option<Value>, RuntimeError> {
        let tokio_rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        tokio_rt.block_on(self.run(target, bag))
    }
}

/// Match the incoming main call against the saved roots and drive the
/// working root to completion.
pub(crate) async fn run_root(
    rt: Arc<RuntimeInner>,
    target: Option<Arc<StageFn>>,
    bag: ArgBag,
) -> Result<Option<Value>, RuntimeError> {
    let working = match target {
        Some(func) => {
            let rerun = func.rerun(rt.config.rerun_strategy);
            let live = stagekit_core::StageNode::new_live(func, bag, None, 0, rerun);
            let mut cache = rt.cache.lock();
            let found = cache.iter().find(|saved| stage::renew(saved, &live)).cloned();
            match found {
                Some(saved) => saved,
                None => {
                    cache.insert(0, live.clone());
                    live
                }
            }
        }
        None => adopt_saved_root(&rt)?,
    };

    if working.lock().done {
        return Ok(working.lock().result.clone());
    }

    let outcome = executor::execute(rt.clone(), working.clone()).await;

    // The partial tree is authoritative even after a failure.
    if !working.lock().flat {
        if let Err(e) = checkpoint::save_now(&rt) {
            warn!(error = %e, "final checkpoint failed");
        }
    }

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(info) => {
            error!(reason = %info.reason, "workflow failed\n{}", info.trace);
            Err(RuntimeError::Stage(info))
        }
    }
}

/// No main given: adopt the unique saved root with empty arguments.
fn adopt_saved_root(rt: &Arc<RuntimeInner>) -> Result<StageHandle, RuntimeError> {
    let cache = rt.cache.lock();
    let mut empties = cache.iter().filter(|root| root.lock().bag.is_empty());
    let (root, extra) = (empties.next(), empties.next());
    drop(empties);
    let root = match (root, extra) {
        (Some(root), None) => root.clone(),
        _ => return Err(RuntimeError::NoTarget),
    };
    drop(cache);

    let mut node = root.lock();
    let func_ref = node.flat_func();
    let func = func_ref
        .resolve()
        .ok_or_else(|| RuntimeError::Unresolved(func_ref.to_string()))?;
    node.rerun = func.rerun(rt.config.rerun_strategy);
    node.func = stagekit_core::StageFuncSlot::Live(func);
    node.flat = false;
    if node.done {
        let force = node.rerun == stagekit_core::Rerun::Always
            || (node.rerun == stagekit_core::Rerun::Auto && !node.history.is_empty());
        if force {
            node.done = false;
        }
    }
    drop(node);
    Ok(root)
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
