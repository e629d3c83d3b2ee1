// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stagekit execution engine: runtime, tree executor, checkpointer,
//! dispatcher, and subprocess supervisor.

mod call;
mod checkpoint;
mod context;
mod dispatcher;
mod error;
mod executor;
mod mpiexec;
mod runtime;
pub mod subproc;

pub use call::{call, shell_stage, StageCall};
pub use context::{ctx, Ctx};
pub use dispatcher::{
    compute_size, CustomNodes, Dispatcher, GpuSpec, Limits, ResourceRequest, Size,
};
pub use error::{ExecError, RuntimeError};
pub use mpiexec::{Exec, ExecOutput, OutputCheck, TimeoutSpec};
pub use runtime::{current_scope, current_stage, spawn, Runtime, Scope};

// The data model and directory façade are the engine's public vocabulary.
pub use stagekit_core::{
    args, kwargs, ArgBag, ErrorInfo, FuncRef, Rerun, StageFn, StageHandle, Value,
};
pub use stagekit_storage::Workspace;
