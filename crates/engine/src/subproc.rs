// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess runner: the program spawned by the supervisor.
//!
//! Invoked as `<exe> exec <workspace> <base> [-mp <n>]`. Loads the
//! externalized payload, resolves the function reference through this
//! binary's registry, and calls it once per rank: with `-mp` a pool of
//! worker threads, without it a single call whose rank and size come
//! from the MPI launcher's environment. Failures append to
//! `<base>.error`, the channel the supervisor raises from.

use serde::{Deserialize, Serialize};
use stagekit_core::{ArgBag, ErrorInfo, FuncRef, Value};
use stagekit_storage::Workspace;
use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Externalized launch payload (`<base>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PayloadFile {
    pub cmd: PayloadCmd,
    pub args: Vec<Value>,
    pub rank_chunks: Option<Vec<Vec<Value>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum PayloadCmd {
    Shell(String),
    Func(FuncRef),
}

static IN_SUBPROCESS: AtomicBool = AtomicBool::new(false);

/// Whether this process is a runner. Checkpointing is disabled here:
/// runners load engine code but must never write the parent's state.
pub fn in_subprocess() -> bool {
    IN_SUBPROCESS.load(Ordering::Relaxed)
}

fn set_in_subprocess() {
    IN_SUBPROCESS.store(true, Ordering::Relaxed);
}

#[cfg(test)]
pub(crate) fn set_in_subprocess_for_tests(value: bool) {
    IN_SUBPROCESS.store(value, Ordering::Relaxed);
}

thread_local! {
    static STAT: RefCell<Stat> = RefCell::new(Stat::default());
}

/// Rank-local state visible to payload code.
#[derive(Debug, Clone, Default)]
pub struct Stat {
    pub rank: usize,
    pub size: usize,
    /// This rank's slice of the per-rank arguments.
    pub rank_args: Vec<Value>,
}

/// The current rank's state.
pub fn stat() -> Stat {
    STAT.with(|stat| stat.borrow().clone())
}

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Workspace(#[from] stagekit_storage::WorkspaceError),
    #[error("function `{0}` is not registered in this binary")]
    Unresolved(String),
    #[error("{}", .0.trace)]
    Body(ErrorInfo),
    #[error("{command}\nexit code: {code}")]
    Shell { command: String, code: i32 },
    #[error("worker thread panicked")]
    WorkerPanic,
}

/// Runner entry point, called by the hidden `exec` CLI subcommand.
///
/// On failure the rendered error is appended to `<base>.error` and
/// echoed to stderr before returning, so the supervisor sees it either
/// way.
pub fn run_exec(workspace: &Path, base: &str, mp: Option<u64>) -> Result<(), RunnerError> {
    set_in_subprocess();
    let ws = Workspace::new(workspace);
    let result = run_inner(&ws, base, mp);
    if let Err(e) = &result {
        let trace = e.to_string();
        eprintln!("{trace}");
        let _ = ws.append(&trace, format!("{base}.error"));
    }
    result
}

fn run_inner(ws: &Workspace, base: &str, mp: Option<u64>) -> Result<(), RunnerError> {
    let payload: PayloadFile = ws.load_json(format!("{base}.json"))?;
    match mp {
        // Worker pool: one thread per rank.
        Some(n) if n > 1 => {
            let size = n as usize;
            std::thread::scope(|scope| {
                let handles: Vec<_> = (0..size)
                    .map(|rank| {
                        let payload = &payload;
                        scope.spawn(move || call_rank(payload, rank, size))
                    })
                    .collect();
                for handle in handles {
                    handle.join().map_err(|_| RunnerError::WorkerPanic)??;
                }
                Ok(())
            })
        }
        Some(_) => call_rank(&payload, 0, 1),
        // MPI: the launcher started one process per rank already.
        None => {
            let (rank, size) = mpi_rank_size();
            call_rank(&payload, rank, size)
        }
    }
}

fn call_rank(payload: &PayloadFile, rank: usize, size: usize) -> Result<(), RunnerError> {
    STAT.with(|stat| {
        *stat.borrow_mut() = Stat {
            rank,
            size,
            rank_args: payload
                .rank_chunks
                .as_ref()
                .and_then(|chunks| chunks.get(rank))
                .cloned()
                .unwrap_or_default(),
        };
    });

    match &payload.cmd {
        PayloadCmd::Shell(cmd) => {
            let status = std::process::Command::new("sh").arg("-c").arg(cmd).status()?;
            if !status.success() {
                return Err(RunnerError::Shell {
                    command: cmd.clone(),
                    code: status.code().unwrap_or(-1),
                });
            }
            Ok(())
        }
        PayloadCmd::Func(func_ref) => {
            let func = func_ref
                .resolve()
                .ok_or_else(|| RunnerError::Unresolved(func_ref.to_string()))?;
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            rt.block_on(func.invoke(ArgBag::positional(payload.args.clone())))
                .map(|_| ())
                .map_err(RunnerError::Body)
        }
    }
}

/// Rank and size from the MPI launcher's environment (OpenMPI, PMI,
/// Slurm), defaulting to a single-rank world.
fn mpi_rank_size() -> (usize, usize) {
    let get = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| std::env::var(key).ok())
            .and_then(|value| value.parse::<usize>().ok())
    };
    let rank = get(&["OMPI_COMM_WORLD_RANK", "PMI_RANK", "SLURM_PROCID"]).unwrap_or(0);
    let size = get(&["OMPI_COMM_WORLD_SIZE", "PMI_SIZE", "SLURM_NTASKS"]).unwrap_or(1);
    (rank, size)
}

#[cfg(test)]
#[path = "subproc_tests.rs"]
mod tests;
