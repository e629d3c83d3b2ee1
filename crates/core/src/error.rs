// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error record attached to stages.

use serde::{Deserialize, Serialize};

/// Stable reason tags carried by [`ErrorInfo`].
///
/// Stage bodies surface every failure as an `ErrorInfo`; the tag lets the
/// top-level loop (and resubmission hooks) distinguish failure kinds
/// without downcasting through the body boundary.
pub mod reason {
    /// Error raised by user code inside a stage body.
    pub const BODY: &str = "body";
    /// Subprocess wrote an error file or exited non-zero.
    pub const SUBPROCESS: &str = "subprocess";
    /// User-set timeout elapsed.
    pub const TIMEOUT: &str = "timeout";
    /// Walltime-driven auto timeout elapsed.
    pub const INSUFFICIENT_WALLTIME: &str = "insufficient_walltime";
    /// Bad resource request rejected before launch.
    pub const VALIDATION: &str = "validation";
    /// A function reference could not be resolved through the registry.
    pub const UNRESOLVED: &str = "unresolved";
    /// Attempted to execute a restored (flat) stage.
    pub const FLAT: &str = "flat";
    /// Stage invoked outside any runtime scope.
    pub const OUTSIDE_STAGE: &str = "outside_stage";
    /// Payload chunk could not be loaded or saved.
    pub const PAYLOAD: &str = "payload";
    /// The awaiting context was cancelled.
    pub const CANCELLED: &str = "cancelled";
}

/// Last error observed on a stage: reason tag, message, and trace string.
///
/// Persisted with the stage record so a resumed workspace still shows why
/// a subtree failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}: {message}")]
pub struct ErrorInfo {
    /// One of the tags in [`reason`].
    pub reason: String,
    pub message: String,
    /// Rendered source chain, one cause per line.
    #[serde(default)]
    pub trace: String,
}

impl ErrorInfo {
    pub fn new(reason: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { reason: reason.to_string(), trace: message.clone(), message }
    }

    /// Build from any error, rendering its source chain into `trace`.
    pub fn from_error(reason: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let message = err.to_string();
        let mut trace = message.clone();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        Self { reason: reason.to_string(), message, trace }
    }

    /// Whether this error carries the given reason tag.
    pub fn is(&self, reason: &str) -> bool {
        self.reason == reason
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
