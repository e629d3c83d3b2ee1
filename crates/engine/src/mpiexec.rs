// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallel subprocess supervisor.
//!
//! `Exec` schedules an MPI or multiprocessing launch: it is itself a
//! stage (so completed launches are skipped on replay), waits for the
//! dispatcher to grant node resources, and supervises the subprocess
//! with deterministic artifact naming, timeout handling, and error
//! capture. Artifacts land in the workspace as
//! `mpiexec[_<name>][#<n>].{log,stdout,stderr,json,error}`.

use crate::call::call;
use crate::dispatcher::{compute_size, CustomNodes, GpuSpec, Limits, ResourceRequest};
use crate::error::ExecError;
use crate::runtime::{current_scope, RuntimeInner};
use crate::subproc::{PayloadCmd, PayloadFile};
use stagekit_core::{reason, ArgBag, ErrorInfo, FuncRef, StageFn, Value};
use stagekit_storage::Workspace;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::warn;

/// Timeout policy for a launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeoutSpec {
    /// Derive from the job adapter's remaining walltime, when limited.
    Auto,
    /// No timeout.
    Never,
    /// Fixed timeout in seconds.
    Secs(f64),
}

type PlainCheck = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;
type StdoutCheck = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;
type BothCheck = Arc<dyn Fn(&str, &str) -> Result<(), String> + Send + Sync>;

/// User hook validating subprocess output (0/1/2-argument arities).
#[derive(Clone)]
pub enum OutputCheck {
    Plain(PlainCheck),
    Stdout(StdoutCheck),
    Both(BothCheck),
}

/// Builder for one parallel subprocess launch.
pub struct Exec {
    payload: PayloadCmd,
    nprocs: u64,
    cpus_per_proc: u64,
    gpus_per_proc: GpuSpec,
    cwd: Option<String>,
    multiprocessing: bool,
    custom_launcher: Option<String>,
    custom_nnodes: Option<CustomNodes>,
    args: Vec<Value>,
    rank_args: Vec<Value>,
    fname: Option<String>,
    check: Option<OutputCheck>,
    timeout: TimeoutSpec,
    priority: i64,
}

impl Exec {
    /// Launch a shell command.
    pub fn command(cmd: impl Into<String>) -> Self {
        Self::with_payload(PayloadCmd::Shell(cmd.into()))
    }

    /// Launch a registered function once per rank.
    pub fn func(func: &Arc<StageFn>) -> Self {
        Self::with_payload(PayloadCmd::Func(func.func_ref()))
    }

    pub fn func_ref(func: FuncRef) -> Self {
        Self::with_payload(PayloadCmd::Func(func))
    }

    fn with_payload(payload: PayloadCmd) -> Self {
        Self {
            payload,
            nprocs: 1,
            cpus_per_proc: 1,
            gpus_per_proc: GpuSpec::default(),
            cwd: None,
            multiprocessing: false,
            custom_launcher: None,
            custom_nnodes: None,
            args: Vec::new(),
            rank_args: Vec::new(),
            fname: None,
            check: None,
            timeout: TimeoutSpec::Auto,
            priority: 0,
        }
    }

    pub fn nprocs(mut self, nprocs: u64) -> Self {
        self.nprocs = nprocs;
        self
    }

    pub fn cpus_per_proc(mut self, cpus: u64) -> Self {
        self.cpus_per_proc = cpus;
        self
    }

    pub fn gpus_per_proc(mut self, gpus: u64) -> Self {
        self.gpus_per_proc = GpuSpec::Count(gpus);
        self
    }

    /// One GPU shared by `mps` processes.
    pub fn gpus_mps(mut self, mps: u64) -> Self {
        self.gpus_per_proc = GpuSpec::Mps(mps);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn multiprocessing(mut self, mp: bool) -> Self {
        self.multiprocessing = mp;
        self
    }

    /// Prefix the command with a custom launcher instead of the
    /// adapter's MPI launch command.
    pub fn custom_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.custom_launcher = Some(launcher.into());
        self
    }

    pub fn custom_nnodes(mut self, nodes: CustomNodes) -> Self {
        self.custom_nnodes = Some(nodes);
        self
    }

    /// Arguments passed to the payload function on every rank.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Per-rank arguments: sorted, then split into `nprocs` contiguous
    /// chunks so rank *i* sees its slice.
    pub fn rank_args(mut self, rank_args: Vec<Value>) -> Self {
        self.rank_args = rank_args;
        self
    }

    /// Base name for the artifact files.
    pub fn fname(mut self, fname: impl Into<String>) -> Self {
        self.fname = Some(fname.into());
        self
    }

    pub fn check(mut self, f: impl Fn() -> Result<(), String> + Send + Sync + 'static) -> Self {
        self.check = Some(OutputCheck::Plain(Arc::new(f)));
        self
    }

    pub fn check_stdout(
        mut self,
        f: impl Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(OutputCheck::Stdout(Arc::new(f)));
        self
    }

    pub fn check_output(
        mut self,
        f: impl Fn(&str, &str) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(OutputCheck::Both(Arc::new(f)));
        self
    }

    pub fn timeout(mut self, timeout: TimeoutSpec) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Schedule the launch as a child stage and supervise it.
    pub async fn run(mut self) -> Result<ExecOutput, ErrorInfo> {
        let token = self.check.take().map(checks::store);
        let bag = self.encode(token);
        let result = call(exec_stage(), bag).await;
        if let Some(token) = token {
            checks::discard(token);
        }
        let value = result?;
        let ws = current_scope().map(|scope| scope.rt.ws.clone());
        Ok(ExecOutput::new(value.as_str().map(String::from), ws))
    }

    /// Flatten into the canonical kwargs of the builtin exec stage. The
    /// output-check hook travels out-of-band as an excluded token.
    fn encode(&self, token: Option<u64>) -> ArgBag {
        let mut bag = ArgBag::default();
        let kw = &mut bag.kwargs;
        kw.insert(
            "cmd".into(),
            match &self.payload {
                PayloadCmd::Shell(cmd) => Value::Str(cmd.clone()),
                PayloadCmd::Func(func) => Value::Func(func.clone()),
            },
        );
        kw.insert("nprocs".into(), Value::Int(self.nprocs as i64));
        kw.insert("cpus_per_proc".into(), Value::Int(self.cpus_per_proc as i64));
        kw.insert(
            "gpus_per_proc".into(),
            match self.gpus_per_proc {
                GpuSpec::Count(gpus) => Value::Int(gpus as i64),
                GpuSpec::Mps(mps) => Value::List(vec![Value::Int(1), Value::Int(mps as i64)]),
            },
        );
        kw.insert("cwd".into(), Value::from(self.cwd.clone()));
        kw.insert("multiprocessing".into(), Value::Bool(self.multiprocessing));
        kw.insert("custom_launcher".into(), Value::from(self.custom_launcher.clone()));
        kw.insert(
            "custom_nnodes".into(),
            match self.custom_nnodes {
                None => Value::Null,
                Some(CustomNodes::Whole(n)) => Value::Int(n as i64),
                Some(CustomNodes::Frac(n, d)) => {
                    Value::List(vec![Value::Int(n as i64), Value::Int(d as i64)])
                }
            },
        );
        kw.insert("args".into(), Value::List(self.args.clone()));
        kw.insert("rank_args".into(), Value::List(self.rank_args.clone()));
        kw.insert("fname".into(), Value::from(self.fname.clone()));
        kw.insert(
            "timeout".into(),
            match self.timeout {
                TimeoutSpec::Auto => Value::Str("auto".into()),
                TimeoutSpec::Never => Value::Null,
                TimeoutSpec::Secs(secs) => Value::Float(secs),
            },
        );
        kw.insert("priority".into(), Value::Int(self.priority));
        kw.insert(
            "check_output".into(),
            token.map(|t| Value::Int(t as i64)).unwrap_or(Value::Null),
        );
        bag
    }
}

/// Handle to a finished launch's artifacts, read lazily.
pub struct ExecOutput {
    fname: Option<String>,
    ws: Option<Workspace>,
    log: OnceLock<Option<String>>,
    stdout: OnceLock<Option<String>>,
    stderr: OnceLock<Option<String>>,
}

impl ExecOutput {
    fn new(fname: Option<String>, ws: Option<Workspace>) -> Self {
        Self {
            fname,
            ws,
            log: OnceLock::new(),
            stdout: OnceLock::new(),
            stderr: OnceLock::new(),
        }
    }

    pub fn fname(&self) -> Option<&str> {
        self.fname.as_deref()
    }

    pub fn log(&self) -> Option<&str> {
        self.read(&self.log, "log")
    }

    pub fn stdout(&self) -> Option<&str> {
        self.read(&self.stdout, "stdout")
    }

    pub fn stderr(&self) -> Option<&str> {
        self.read(&self.stderr, "stderr")
    }

    fn read<'a>(&'a self, cell: &'a OnceLock<Option<String>>, ext: &str) -> Option<&'a str> {
        cell.get_or_init(|| {
            let fname = self.fname.as_ref()?;
            let ws = self.ws.as_ref()?;
            ws.read(format!("{fname}.{ext}")).ok()
        })
        .as_deref()
    }
}

/// The builtin exec stage. Registered once; the `check_output` token is
/// excluded from identity so replay matching ignores the hook.
pub(crate) fn exec_stage() -> Arc<StageFn> {
    static EXEC: OnceLock<Arc<StageFn>> = OnceLock::new();
    EXEC.get_or_init(|| {
        StageFn::builder("stagekit", "mpiexec")
            .exclude("check_output")
            .display(|bag| {
                let cmd = match bag.kwargs.get("cmd") {
                    Some(Value::Str(cmd)) => cmd.clone(),
                    Some(Value::Func(func)) => func.to_string(),
                    _ => "<exec>".to_string(),
                };
                format!("mpiexec {cmd}")
            })
            .register(exec_body)
    })
    .clone()
}

async fn exec_body(bag: ArgBag) -> Result<Value, ErrorInfo> {
    let spec = ExecSpec::decode(&bag).map_err(ErrorInfo::from)?;
    let Some(scope) = current_scope() else {
        return Err(ErrorInfo::new(reason::OUTSIDE_STAGE, "exec invoked outside a runtime scope"));
    };
    let base = supervise(scope.rt, spec).await.map_err(ErrorInfo::from)?;
    Ok(Value::Str(base))
}

/// Decoded form of the exec stage's arguments.
struct ExecSpec {
    payload: PayloadCmd,
    nprocs: u64,
    cpus_per_proc: u64,
    gpus_per_proc: GpuSpec,
    cwd: Option<String>,
    multiprocessing: bool,
    custom_launcher: Option<String>,
    custom_nnodes: Option<CustomNodes>,
    args: Vec<Value>,
    rank_args: Vec<Value>,
    fname: Option<String>,
    timeout: TimeoutSpec,
    priority: i64,
    check_token: Option<u64>,
}

impl ExecSpec {
    fn decode(bag: &ArgBag) -> Result<Self, ExecError> {
        let kw = &bag.kwargs;
        let invalid = |what: &str| ExecError::Validation(format!("malformed exec argument `{what}`"));

        let payload = match kw.get("cmd") {
            Some(Value::Str(cmd)) => PayloadCmd::Shell(cmd.clone()),
            Some(Value::Func(func)) => PayloadCmd::Func(func.clone()),
            _ => return Err(invalid("cmd")),
        };
        let int = |key: &str, default: i64| {
            kw.get(key).and_then(Value::as_int).unwrap_or(default)
        };
        let opt_str = |key: &str| kw.get(key).and_then(Value::as_str).map(String::from);
        let list = |key: &str| {
            kw.get(key).and_then(Value::as_list).map(<[Value]>::to_vec).unwrap_or_default()
        };

        let gpus_per_proc = match kw.get("gpus_per_proc") {
            None | Some(Value::Null) => GpuSpec::Count(0),
            Some(Value::Int(gpus)) if *gpus >= 0 => GpuSpec::Count(*gpus as u64),
            Some(Value::List(pair)) => match (pair.first().and_then(Value::as_int), pair.get(1)) {
                (Some(1), Some(Value::Int(mps))) if pair.len() == 2 && *mps >= 0 => {
                    GpuSpec::Mps(*mps as u64)
                }
                _ => {
                    return Err(ExecError::Validation(format!(
                        "incorrect mps configuration `{pair:?}`"
                    )))
                }
            },
            _ => return Err(invalid("gpus_per_proc")),
        };
        let custom_nnodes = match kw.get("custom_nnodes") {
            None | Some(Value::Null) => None,
            Some(Value::Int(n)) if *n > 0 => Some(CustomNodes::Whole(*n as u64)),
            Some(Value::List(pair)) => {
                match (pair.first().and_then(Value::as_int), pair.get(1).and_then(Value::as_int)) {
                    (Some(n), Some(d)) if pair.len() == 2 && n > 0 && d > 0 => {
                        Some(CustomNodes::Frac(n as u64, d as u64))
                    }
                    _ => return Err(invalid("custom_nnodes")),
                }
            }
            _ => return Err(invalid("custom_nnodes")),
        };
        let timeout = match kw.get("timeout") {
            Some(Value::Str(s)) if s == "auto" => TimeoutSpec::Auto,
            None | Some(Value::Null) => TimeoutSpec::Never,
            Some(value) => match value.as_float() {
                Some(secs) => TimeoutSpec::Secs(secs),
                None => return Err(invalid("timeout")),
            },
        };

        Ok(Self {
            payload,
            nprocs: int("nprocs", 1).max(1) as u64,
            cpus_per_proc: int("cpus_per_proc", 1).max(1) as u64,
            gpus_per_proc,
            cwd: opt_str("cwd"),
            multiprocessing: kw.get("multiprocessing").and_then(Value::as_bool).unwrap_or(false),
            custom_launcher: opt_str("custom_launcher"),
            custom_nnodes,
            args: list("args"),
            rank_args: list("rank_args"),
            fname: opt_str("fname"),
            timeout,
            priority: int("priority", 0),
            check_token: kw.get("check_output").and_then(Value::as_int).map(|t| t as u64),
        })
    }
}

/// Drive one launch end to end. Dispatcher bookkeeping is released by
/// the permit guard whatever the outcome.
async fn supervise(rt: Arc<RuntimeInner>, mut spec: ExecSpec) -> Result<String, ExecError> {
    let job = rt.job_adapter()?;

    // Never request more ranks than there are per-rank arguments.
    if !spec.rank_args.is_empty() {
        spec.nprocs = spec.nprocs.min(spec.rank_args.len() as u64);
    }

    let size = compute_size(
        &ResourceRequest {
            nprocs: spec.nprocs,
            cpus_per_proc: spec.cpus_per_proc,
            gpus_per_proc: spec.gpus_per_proc,
            multiprocessing: spec.multiprocessing,
            custom_nnodes: spec.custom_nnodes,
        },
        job.as_ref(),
    )?;

    let _permit = rt
        .dispatcher
        .admit(
            size,
            spec.priority,
            Limits { nnodes: job.nnodes(), cpus_per_node: job.cpus_per_node() },
        )
        .await;

    let ws = rt.ws.clone();
    let multiprocessing = job.no_mpi() || spec.multiprocessing;

    let base = unique_base(&ws, &spec.fname.clone().unwrap_or_else(|| derive_base(&spec.payload)));

    if matches!(spec.payload, PayloadCmd::Shell(_))
        && (!spec.args.is_empty() || !spec.rank_args.is_empty())
    {
        warn!("args / rank_args are ignored for shell commands");
        spec.args.clear();
        spec.rank_args.clear();
    }

    // Externalize the payload whenever a runner process has to call back
    // into registered code.
    let (command, cwd) = if matches!(spec.payload, PayloadCmd::Func(_)) || multiprocessing {
        let rank_chunks = (!spec.rank_args.is_empty())
            .then(|| partition_rank_args(spec.rank_args.clone(), spec.nprocs));
        ws.rm_stem(&base)?;
        ws.dump_json(
            &PayloadFile { cmd: spec.payload.clone(), args: spec.args.clone(), rank_chunks },
            format!("{base}.json"),
        )?;
        let exe = std::env::current_exe()?;
        let command =
            format!("\"{}\" exec \"{}\" {}", exe.display(), ws.base().display(), base);
        (command, None)
    } else {
        let PayloadCmd::Shell(cmd) = &spec.payload else {
            return Err(ExecError::Validation("MPI launch requires a shell command".into()));
        };
        (cmd.clone(), spec.cwd.clone())
    };

    let command = if let Some(launcher) = &spec.custom_launcher {
        format!("{launcher} {command}")
    } else if multiprocessing {
        format!("{command} -mp {}", spec.nprocs)
    } else {
        let gpus = match spec.gpus_per_proc {
            GpuSpec::Count(gpus) => gpus,
            GpuSpec::Mps(_) => 1,
        };
        job.launch_command(&command, spec.nprocs, spec.cpus_per_proc, gpus)?
    };

    // The log records the effective command, then the elapsed time.
    ws.write(&format!("{command}\n"), format!("{base}.log"))?;
    let started = rt.clock.now();

    let stdout = std::fs::File::create(ws.path(format!("{base}.stdout")))?;
    let stderr = std::fs::File::create(ws.path(format!("{base}.stderr")))?;
    let mut child = {
        let mut builder = tokio::process::Command::new("sh");
        builder
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        if let Some(cwd) = &cwd {
            builder.current_dir(cwd);
        }
        builder.spawn()?
    };

    let (timeout, walltime_driven) = match spec.timeout {
        TimeoutSpec::Auto => match job.time_limited() {
            true => (Some(job.remaining_minutes().unwrap_or(0.0) * 60.0), true),
            false => (None, false),
        },
        TimeoutSpec::Never => (None, false),
        TimeoutSpec::Secs(secs) => (Some(secs), false),
    };

    let status = match timeout {
        Some(secs) => {
            let limit = Duration::from_secs_f64(secs.max(0.0));
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) if walltime_driven => return Err(ExecError::InsufficientWalltime),
                Err(_) => return Err(ExecError::Timeout(limit.as_secs())),
            }
        }
        None => child.wait().await?,
    };

    if let Some(check) = spec.check_token.and_then(checks::take) {
        let read = |ext: &str| ws.read(format!("{base}.{ext}")).unwrap_or_default();
        let verdict = match check {
            OutputCheck::Plain(f) => f(),
            OutputCheck::Stdout(f) => f(&read("stdout")),
            OutputCheck::Both(f) => f(&read("stdout"), &read("stderr")),
        };
        verdict.map_err(ExecError::CheckOutput)?;
    }

    let elapsed = (rt.clock.now() - started).as_secs();
    ws.append(&format!("\nelapsed: {}\n", format_elapsed(elapsed)), format!("{base}.log"))?;

    if ws.has(format!("{base}.error")) {
        return Err(ExecError::ErrorFile(ws.read(format!("{base}.error"))?));
    }
    if !status.success() {
        return Err(ExecError::ExitCode { command, code: status.code().unwrap_or(-1) });
    }
    Ok(base)
}

/// Base artifact name: `mpiexec_<stem>` from the command's first token or
/// the function name, bare `mpiexec` when nothing usable remains.
fn derive_base(payload: &PayloadCmd) -> String {
    let stem = match payload {
        PayloadCmd::Shell(cmd) => cmd
            .split_whitespace()
            .next()
            .and_then(|token| token.rsplit('/').next())
            .and_then(|name| name.split('.').next())
            .unwrap_or("")
            .to_string(),
        PayloadCmd::Func(func) => func.name.trim_start_matches('_').to_string(),
    };
    if stem.is_empty() {
        "mpiexec".to_string()
    } else {
        format!("mpiexec_{stem}")
    }
}

/// Append `#<n>` with the smallest unused `n` when the stem is taken.
fn unique_base(ws: &Workspace, base: &str) -> String {
    if !ws.has(format!("{base}.log")) {
        return base.to_string();
    }
    let mut i = 1;
    while ws.has(format!("{base}#{i}.log")) {
        i += 1;
    }
    format!("{base}#{i}")
}

/// Sort and split per-rank arguments into `nprocs` contiguous chunks;
/// the last chunk takes the remainder.
fn partition_rank_args(mut rank_args: Vec<Value>, nprocs: u64) -> Vec<Vec<Value>> {
    rank_args.sort_by(|a, b| a.total_cmp(b));
    let n = nprocs.max(1) as usize;
    let chunk = rank_args.len().div_ceil(n);
    let mut chunks: Vec<Vec<Value>> = Vec::with_capacity(n);
    let mut rest = rank_args;
    for _ in 0..n - 1 {
        let take = chunk.min(rest.len());
        let tail = rest.split_off(take);
        chunks.push(rest);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}

fn format_elapsed(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{hours}:{minutes:02}:{secs:02}")
}

/// Out-of-band slot for output-check hooks: closures cannot travel
/// through canonical stage arguments, so the stage carries an excluded
/// token instead.
mod checks {
    use super::OutputCheck;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::OnceLock;

    fn slots() -> &'static Mutex<HashMap<u64, OutputCheck>> {
        static SLOTS: OnceLock<Mutex<HashMap<u64, OutputCheck>>> = OnceLock::new();
        SLOTS.get_or_init(|| Mutex::new(HashMap::new()))
    }

    pub(super) fn store(check: OutputCheck) -> u64 {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let token = NEXT.fetch_add(1, Ordering::Relaxed);
        slots().lock().insert(token, check);
        token
    }

    pub(super) fn take(token: u64) -> Option<OutputCheck> {
        slots().lock().remove(&token)
    }

    pub(super) fn discard(token: u64) {
        slots().lock().remove(&token);
    }
}

#[cfg(test)]
#[path = "mpiexec_tests.rs"]
mod tests;
