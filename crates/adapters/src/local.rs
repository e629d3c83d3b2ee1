// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local adapter: run everything on this machine through multiprocessing.

use crate::{AdapterError, JobAdapter};
use stagekit_config::JobParams;

/// Workstation session without an MPI launcher or walltime limit.
#[derive(Debug, Clone)]
pub struct LocalJob {
    cpus: u64,
}

impl LocalJob {
    pub fn new(params: &JobParams) -> Self {
        let cpus = params.cpus_per_node.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get() as u64).unwrap_or(1)
        });
        Self { cpus }
    }
}

impl JobAdapter for LocalJob {
    fn name(&self) -> &'static str {
        "local"
    }

    fn nnodes(&self) -> u64 {
        self.cpus
    }

    fn cpus_per_node(&self) -> u64 {
        self.cpus
    }

    fn gpus_per_node(&self) -> u64 {
        0
    }

    fn no_mpi(&self) -> bool {
        true
    }

    fn launch_command(
        &self,
        _cmd: &str,
        _nprocs: u64,
        _cpus_per_proc: u64,
        _gpus_per_proc: u64,
    ) -> Result<String, AdapterError> {
        Err(AdapterError::NoMpi("local"))
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
