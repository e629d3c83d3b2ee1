// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced checkpointing of the root cache.
//!
//! Every stage completion requests a checkpoint; a single-flight flag
//! plus a one-second delay coalesce bursts into one verified write. The
//! flag resets only after the save attempt finishes, success or logged
//! failure.

use crate::error::RuntimeError;
use crate::runtime::RuntimeInner;
use crate::subproc;
use stagekit_core::payload;
use stagekit_storage::{record_exe_dir, save_roots};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Delay before a requested checkpoint is written.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Request a debounced checkpoint of the root cache.
///
/// No-op inside subprocess runners and while a save is already pending.
pub(crate) fn schedule(rt: &Arc<RuntimeInner>) {
    if subproc::in_subprocess() {
        return;
    }
    if rt.saving.swap(true, Ordering::SeqCst) {
        return;
    }
    let rt = rt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(DEBOUNCE).await;
        if let Err(e) = save_now(&rt) {
            warn!(error = %e, "checkpoint failed");
        }
        rt.saving.store(false, Ordering::SeqCst);
    });
}

/// Flatten the root cache and persist it through the verified atomic
/// swap, flushing dirty payload chunks first.
pub(crate) fn save_now(rt: &RuntimeInner) -> Result<(), RuntimeError> {
    if subproc::in_subprocess() {
        return Ok(());
    }
    let records = {
        let cache = rt.cache.lock();
        let mut store = payload::store().lock();
        let records = cache
            .iter()
            .map(|root| root.lock().to_record(&mut store))
            .collect::<Result<Vec<_>, _>>()?;
        store.flush()?;
        records
    };
    save_roots(rt.ws.base(), &records)?;
    record_exe_dir(rt.ws.base())?;
    Ok(())
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
