// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types.

use stagekit_adapters::AdapterError;
use stagekit_config::ConfigError;
use stagekit_core::payload::PayloadError;
use stagekit_core::{reason, ErrorInfo};
use stagekit_storage::{CacheError, WorkspaceError};
use thiserror::Error;

/// Errors from the dispatcher and subprocess supervisor.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Bad resource request, rejected before any subprocess is launched.
    #[error("invalid resource request: {0}")]
    Validation(String),
    /// Walltime-driven auto timeout expired; top-level handlers may use
    /// this to trigger resubmission.
    #[error("insufficient walltime")]
    InsufficientWalltime,
    /// User-set timeout expired.
    #[error("subprocess timed out after {0} s")]
    Timeout(u64),
    /// Subprocess exited non-zero.
    #[error("{command}\nexit code: {code}")]
    ExitCode { command: String, code: i32 },
    /// The subprocess runner wrote a traceback file.
    #[error("{0}")]
    ErrorFile(String),
    #[error("output check failed: {0}")]
    CheckOutput(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl ExecError {
    /// Stable reason tag recorded on the failing stage.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            ExecError::Validation(_) | ExecError::Adapter(_) => reason::VALIDATION,
            ExecError::InsufficientWalltime => reason::INSUFFICIENT_WALLTIME,
            ExecError::Timeout(_) => reason::TIMEOUT,
            ExecError::ExitCode { .. } | ExecError::ErrorFile(_) | ExecError::CheckOutput(_) => {
                reason::SUBPROCESS
            }
            ExecError::Payload(_) => reason::PAYLOAD,
            ExecError::Io(_) | ExecError::Workspace(_) => reason::BODY,
        }
    }
}

impl From<ExecError> for ErrorInfo {
    fn from(e: ExecError) -> Self {
        ErrorInfo::from_error(e.reason_tag(), &e)
    }
}

/// Errors from runtime bootstrap and top-level execution.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("workflow failed: {0}")]
    Stage(ErrorInfo),
    #[error("function `{0}` is not registered")]
    Unresolved(String),
    #[error("no main stage specified and no unique saved root to resume")]
    NoTarget,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Flatten into the record stored on a stage.
    pub fn to_info(&self) -> ErrorInfo {
        match self {
            RuntimeError::Stage(info) => info.clone(),
            RuntimeError::Unresolved(_) => ErrorInfo::from_error(reason::UNRESOLVED, self),
            other => ErrorInfo::from_error(reason::BODY, other),
        }
    }
}
