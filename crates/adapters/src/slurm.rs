// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slurm adapter: `srun` launches inside a time-limited allocation.

use crate::{AdapterError, JobAdapter};
use stagekit_config::JobParams;
use stagekit_core::Clock;
use std::sync::Arc;
use std::time::Instant;

/// One Slurm allocation, sized from the `job` config table.
pub struct SlurmJob {
    nnodes: u64,
    cpus_per_node: u64,
    gpus_per_node: u64,
    share_node: bool,
    /// Requested walltime in minutes; absent means not time-limited.
    walltime: Option<f64>,
    /// Minutes reserved to exit before the hard limit.
    gap: f64,
    started: Instant,
    clock: Arc<dyn Clock>,
}

impl SlurmJob {
    pub fn new(params: &JobParams, clock: Arc<dyn Clock>) -> Result<Self, AdapterError> {
        let cpus_per_node =
            params.cpus_per_node.ok_or(AdapterError::MissingKey("cpus_per_node"))?;
        Ok(Self {
            nnodes: params.nnodes,
            cpus_per_node,
            gpus_per_node: params.gpus_per_node,
            share_node: params.share_node,
            walltime: params.walltime,
            gap: params.gap,
            started: clock.now(),
            clock,
        })
    }

    /// Slurm job ID of the surrounding allocation, when present.
    pub fn job_id(&self) -> Option<String> {
        std::env::var("SLURM_JOB_ID").ok()
    }
}

impl JobAdapter for SlurmJob {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn nnodes(&self) -> u64 {
        self.nnodes
    }

    fn cpus_per_node(&self) -> u64 {
        self.cpus_per_node
    }

    fn gpus_per_node(&self) -> u64 {
        self.gpus_per_node
    }

    fn share_node(&self) -> bool {
        self.share_node
    }

    fn time_limited(&self) -> bool {
        self.walltime.is_some()
    }

    fn remaining_minutes(&self) -> Option<f64> {
        let walltime = self.walltime?;
        let elapsed = (self.clock.now() - self.started).as_secs_f64() / 60.0;
        Some((walltime - self.gap - elapsed).max(0.0))
    }

    fn launch_command(
        &self,
        cmd: &str,
        nprocs: u64,
        cpus_per_proc: u64,
        gpus_per_proc: u64,
    ) -> Result<String, AdapterError> {
        Ok(format!(
            "srun -n {nprocs} --cpus-per-task {cpus_per_proc} --gpus-per-task {gpus_per_proc} {cmd}"
        ))
    }
}

#[cfg(test)]
#[path = "slurm_tests.rs"]
mod tests;
