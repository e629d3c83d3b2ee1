// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tree executor: drives stage bodies and matches child calls against
//! history.

use crate::runtime::{scoped, RuntimeInner, Scope};
use crate::checkpoint;
use stagekit_core::{reason, stage, BoxFuture, ErrorInfo, StageHandle, Value};
use std::sync::Arc;

/// Run a stage body to completion.
///
/// Setting `done` is the linearization point: it happens strictly after
/// the result is assigned and before the checkpoint is scheduled. A
/// failure records the error on the stage and still schedules a
/// checkpoint, so the partial tree survives a crash.
pub(crate) fn execute(
    rt: Arc<RuntimeInner>,
    stage: StageHandle,
) -> BoxFuture<Result<Value, ErrorInfo>> {
    Box::pin(async move {
        let (func, bag) = {
            let mut node = stage.lock();
            if node.flat {
                return Err(ErrorInfo::new(
                    reason::FLAT,
                    format!("cannot re-execute restored stage `{}`", node.flat_func()),
                ));
            }
            let func = match node.func.as_live() {
                Some(func) => func.clone(),
                None => {
                    return Err(ErrorInfo::new(
                        reason::UNRESOLVED,
                        format!("function `{}` is not registered", node.flat_func()),
                    ))
                }
            };
            node.version += 1;
            node.done = false;
            node.error = None;
            node.data.clear();
            (func, node.bag.clone())
        };

        // The setwd override belongs to the caller's frame.
        let caller_chdir = rt.chdir.lock().take();
        let scope = Scope { rt: rt.clone(), stage: Some(stage.clone()) };
        let outcome = scoped(scope, func.invoke(bag)).await;
        *rt.chdir.lock() = caller_chdir;

        match outcome {
            Ok(value) => {
                {
                    let mut node = stage.lock();
                    node.result = Some(value.clone());
                    node.prune_history();
                    node.done = true;
                }
                checkpoint::schedule(&rt);
                Ok(value)
            }
            Err(info) => {
                stage.lock().error = Some(info.clone());
                checkpoint::schedule(&rt);
                Err(info)
            }
        }
    })
}

/// Match a new child call against the parent's history; on a hit the
/// existing entry is renewed (and executed only if not done), otherwise
/// the child is appended and executed.
pub(crate) async fn progress(
    rt: Arc<RuntimeInner>,
    parent: StageHandle,
    child: StageHandle,
) -> Result<Value, ErrorInfo> {
    let history = parent.lock().history.clone();
    for existing in history {
        if stage::renew(&existing, &child) {
            if !existing.lock().done {
                execute(rt.clone(), existing.clone()).await?;
            }
            let mut node = existing.lock();
            node.parent_version = child.lock().parent_version;
            return Ok(node.result.clone().unwrap_or(Value::Null));
        }
    }

    child.lock().parent = Some(Arc::downgrade(&parent));
    parent.lock().history.push(child.clone());
    execute(rt, child.clone()).await?;
    let result = child.lock().result.clone().unwrap_or(Value::Null);
    Ok(result)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
