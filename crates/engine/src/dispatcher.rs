// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource-bounded admission for parallel subprocess launches.
//!
//! Tasks request a `Size`: a rational node share for MPI launches or a
//! process count for multiprocessing pools. A single background loop
//! wakes once per second, sorts the pending table by a composite
//! priority key, and releases every task whose request fits. Entries are
//! removed through an RAII permit, so cancellation can never leak
//! bookkeeping.

use crate::error::ExecError;
use indexmap::IndexMap;
use num_rational::Ratio;
use parking_lot::Mutex;
use stagekit_adapters::JobAdapter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Poll interval of the admission loop.
const TICK: Duration = Duration::from_secs(1);

/// Resource request of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    /// Fractional node share (MPI).
    Nodes(Ratio<u64>),
    /// Process count (multiprocessing pool).
    Procs(u64),
}

impl Size {
    pub fn is_multiprocessing(&self) -> bool {
        matches!(self, Size::Procs(_))
    }

    fn as_signed(&self) -> Ratio<i64> {
        match self {
            Size::Nodes(r) => Ratio::new(*r.numer() as i64, *r.denom() as i64),
            Size::Procs(n) => Ratio::from_integer(*n as i64),
        }
    }
}

/// Pool bounds per task kind: nodes for MPI, CPU cores for
/// multiprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    pub nnodes: u64,
    pub cpus_per_node: u64,
}

/// GPU request per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuSpec {
    /// Whole GPUs per process (0 = none).
    Count(u64),
    /// One GPU shared by this many processes (multi-process service).
    Mps(u64),
}

impl Default for GpuSpec {
    fn default() -> Self {
        GpuSpec::Count(0)
    }
}

/// Explicit node-count override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomNodes {
    Whole(u64),
    Frac(u64, u64),
}

/// Inputs to the size computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    pub nprocs: u64,
    pub cpus_per_proc: u64,
    pub gpus_per_proc: GpuSpec,
    pub multiprocessing: bool,
    pub custom_nnodes: Option<CustomNodes>,
}

/// Compute a task's resource request against the job's pool shape.
///
/// Raises validation errors synchronously, before any subprocess exists.
pub fn compute_size(req: &ResourceRequest, job: &dyn JobAdapter) -> Result<Size, ExecError> {
    let multiprocessing = job.no_mpi() || req.multiprocessing;

    if let Some(custom) = req.custom_nnodes {
        return Ok(match (custom, multiprocessing) {
            (CustomNodes::Whole(n), true) => Size::Procs(n),
            (CustomNodes::Whole(n), false) => Size::Nodes(Ratio::from_integer(n)),
            (CustomNodes::Frac(_, 0), _) => {
                return Err(ExecError::Validation("custom_nnodes denominator is zero".into()))
            }
            (CustomNodes::Frac(n, d), true) => Size::Procs(n.div_ceil(d)),
            (CustomNodes::Frac(n, d), false) => Size::Nodes(Ratio::new(n, d)),
        });
    }

    if multiprocessing {
        return Ok(Size::Procs(req.nprocs));
    }

    let cpus_per_node = job.cpus_per_node();
    if cpus_per_node == 0 {
        return Err(ExecError::Validation("cpus_per_node must be positive".into()));
    }
    let mut nodes = Ratio::new(req.nprocs * req.cpus_per_proc, cpus_per_node);

    match req.gpus_per_proc {
        GpuSpec::Count(0) => {}
        GpuSpec::Count(gpus) => {
            if job.gpus_per_node() == 0 {
                return Err(ExecError::Validation("GPU is not enabled in current system".into()));
            }
            nodes = nodes.max(Ratio::new(req.nprocs * gpus, job.gpus_per_node()));
        }
        GpuSpec::Mps(mps) => {
            if job.gpus_per_node() == 0 {
                return Err(ExecError::Validation("GPU is not enabled in current system".into()));
            }
            if mps == 0 {
                return Err(ExecError::Validation(
                    "incorrect mps configuration `(1, 0)`".into(),
                ));
            }
            if req.nprocs % mps != 0 {
                return Err(ExecError::Validation(format!(
                    "nprocs must be a multiple of mps ({}, {})",
                    req.nprocs, mps
                )));
            }
            nodes = nodes.max(Ratio::new(req.nprocs / mps, job.gpus_per_node()));
        }
    }

    if !job.share_node() {
        nodes = nodes.ceil();
    }
    Ok(Size::Nodes(nodes))
}

struct Pending {
    size: Size,
    priority: i64,
    tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct State {
    pending: IndexMap<u64, Pending>,
    running: IndexMap<u64, Size>,
    limits: Limits,
    next_ticket: u64,
    loop_active: bool,
}

/// Admission controller shared by every subprocess launch of a runtime.
pub struct Dispatcher {
    state: Arc<Mutex<State>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(State::default())) }
    }

    /// Wait until the pool can take `size`, then hold it via the returned
    /// permit. Dropping the permit (normal exit or cancellation) releases
    /// the reservation.
    pub async fn admit(&self, size: Size, priority: i64, limits: Limits) -> Permit {
        let (tx, rx) = oneshot::channel();
        let (ticket, start_loop) = {
            let mut st = self.state.lock();
            st.limits = limits;
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            st.pending.insert(ticket, Pending { size, priority, tx: Some(tx) });
            let start_loop = !st.loop_active;
            if start_loop {
                st.loop_active = true;
            }
            (ticket, start_loop)
        };
        if start_loop {
            tokio::spawn(admission_loop(self.state.clone()));
        }
        let permit = Permit { state: self.state.clone(), ticket };
        let _ = rx.await;
        permit
    }

    /// Currently admitted sizes (test/introspection).
    pub fn running_sizes(&self) -> Vec<Size> {
        self.state.lock().running.values().copied().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Reservation held while a task runs.
pub struct Permit {
    state: Arc<Mutex<State>>,
    ticket: u64,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        st.pending.shift_remove(&self.ticket);
        st.running.shift_remove(&self.ticket);
    }
}

/// Activated when the pending table becomes non-empty; exits when it
/// drains.
async fn admission_loop(state: Arc<Mutex<State>>) {
    loop {
        {
            let mut st = state.lock();
            if st.pending.is_empty() {
                st.loop_active = false;
                return;
            }
            admit_fitting(&mut st);
        }
        tokio::time::sleep(TICK).await;
    }
}

/// Sort pending by `priority * max_size + size` descending (stable, so
/// equal keys keep insertion order) and admit everything that fits.
fn admit_fitting(st: &mut State) {
    let max_size = st
        .pending
        .values()
        .map(|p| p.size.as_signed())
        .max()
        .unwrap_or_else(|| Ratio::from_integer(0));
    let mut order: Vec<(u64, Ratio<i64>)> = st
        .pending
        .iter()
        .map(|(ticket, p)| {
            (*ticket, Ratio::from_integer(p.priority) * max_size + p.size.as_signed())
        })
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1));

    for (ticket, _) in order {
        let can_admit = match st.pending.get(&ticket) {
            Some(entry) => fits(&entry.size, &st.running, &st.limits),
            None => false,
        };
        if !can_admit {
            continue;
        }
        if let Some(mut entry) = st.pending.shift_remove(&ticket) {
            st.running.insert(ticket, entry.size);
            if let Some(tx) = entry.tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// A request fits when nothing of its kind runs (best-effort single-task
/// progress) or it fits in the remaining capacity of its kind.
fn fits(size: &Size, running: &IndexMap<u64, Size>, limits: &Limits) -> bool {
    match size {
        Size::Procs(n) => {
            let used: u64 = running
                .values()
                .filter_map(|s| match s {
                    Size::Procs(p) => Some(*p),
                    Size::Nodes(_) => None,
                })
                .sum();
            used == 0 || (used < limits.cpus_per_node && *n <= limits.cpus_per_node - used)
        }
        Size::Nodes(r) => {
            let used = running
                .values()
                .filter_map(|s| match s {
                    Size::Nodes(_) => Some(s.as_signed()),
                    Size::Procs(_) => None,
                })
                .fold(Ratio::from_integer(0), |acc, r| acc + r);
            used == Ratio::from_integer(0)
                || Size::Nodes(*r).as_signed() <= Ratio::from_integer(limits.nnodes as i64) - used
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
