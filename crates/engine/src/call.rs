// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The stage wrapper: turns a registered function call into a tree node.

use crate::runtime::{current_scope, run_root};
use crate::executor;
use stagekit_core::{reason, ArgBag, BoxFuture, ErrorInfo, StageFn, StageNode, Value};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

/// Invoke a wrapped function.
///
/// Inside a running stage the call becomes a child and is matched against
/// the parent's history. At the top of a runtime scope it becomes the
/// root call. Outside any scope it is an error; the documented entry
/// points are `Runtime::run` and the CLI.
pub async fn call(func: Arc<StageFn>, bag: ArgBag) -> Result<Value, ErrorInfo> {
    let Some(scope) = current_scope() else {
        return Err(ErrorInfo::new(
            reason::OUTSIDE_STAGE,
            format!("stage `{}` invoked outside a runtime scope", func.func_ref()),
        ));
    };
    let rt = scope.rt;
    let rerun = func.rerun(rt.config.rerun_strategy);
    match scope.stage {
        Some(parent) => {
            let parent_version = parent.lock().version;
            let chdir = rt.chdir.lock().clone();
            let child = StageNode::new_live(func, bag, chdir, parent_version, rerun);
            child.lock().parent = Some(Arc::downgrade(&parent));
            executor::progress(rt, parent, child).await
        }
        None => match run_root(rt, Some(func), bag).await {
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(e) => Err(e.to_info()),
        },
    }
}

/// Ergonomic `.call(...)` on registered functions.
pub trait StageCall {
    fn call(&self, bag: ArgBag) -> BoxFuture<Result<Value, ErrorInfo>>;
}

impl StageCall for Arc<StageFn> {
    fn call(&self, bag: ArgBag) -> BoxFuture<Result<Value, ErrorInfo>> {
        let func = self.clone();
        Box::pin(call(func, bag))
    }
}

/// Builtin shell stage: `ctx.call` routes here so shell commands are
/// memoized like any other child stage.
pub fn shell_stage() -> Arc<StageFn> {
    static SHELL: OnceLock<Arc<StageFn>> = OnceLock::new();
    SHELL
        .get_or_init(|| {
            StageFn::builder("stagekit", "call")
                .params(["cmd", "cwd"])
                .display(|bag| {
                    bag.args
                        .first()
                        .and_then(|v| v.as_str())
                        .map(|cmd| format!("$ {cmd}"))
                        .unwrap_or_else(|| "$ <shell>".to_string())
                })
                .register(shell_body)
        })
        .clone()
}

async fn shell_body(bag: ArgBag) -> Result<Value, ErrorInfo> {
    let cmd = bag
        .args
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorInfo::new(reason::BODY, "shell stage requires a command string"))?
        .to_string();
    let cwd = bag.args.get(1).and_then(|v| v.as_str()).map(String::from);

    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg(&cmd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let status = command
        .status()
        .await
        .map_err(|e| ErrorInfo::from_error(reason::SUBPROCESS, &e))?;
    if !status.success() {
        return Err(ErrorInfo::new(
            reason::SUBPROCESS,
            format!("{cmd}\nexit code: {}", status.code().unwrap_or(-1)),
        ));
    }
    Ok(Value::Null)
}
