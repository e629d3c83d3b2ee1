// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Job-scheduler adapters.
//!
//! An adapter describes the compute session the engine runs inside: node
//! pool shape, walltime budget, and how to turn a command into an MPI
//! launch. Adapters register under a name and are selected through the
//! `job` config table.

mod local;
mod slurm;

pub use local::LocalJob;
pub use slurm::SlurmJob;

use parking_lot::RwLock;
use stagekit_config::JobParams;
use stagekit_core::Clock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Errors from adapter construction and command assembly.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown job adapter `{0}`")]
    Unknown(String),
    #[error("required job config `{0}` is missing")]
    MissingKey(&'static str),
    #[error("adapter `{0}` cannot launch MPI commands")]
    NoMpi(&'static str),
}

/// One compute session: pool shape, walltime, MPI launch syntax.
pub trait JobAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Nodes available to MPI tasks.
    fn nnodes(&self) -> u64;

    /// CPU cores per node; also the pool bound for multiprocessing tasks.
    fn cpus_per_node(&self) -> u64;

    fn gpus_per_node(&self) -> u64;

    /// Whether a node can be shared by multiple MPI calls.
    fn share_node(&self) -> bool {
        true
    }

    /// Adapter runs everything through multiprocessing (no MPI launcher).
    fn no_mpi(&self) -> bool {
        false
    }

    /// Whether the session is killed when walltime runs out.
    fn time_limited(&self) -> bool {
        false
    }

    /// Minutes left before the session must exit (gap already deducted).
    fn remaining_minutes(&self) -> Option<f64> {
        None
    }

    /// Wrap a command in the adapter's MPI launcher.
    fn launch_command(
        &self,
        cmd: &str,
        nprocs: u64,
        cpus_per_proc: u64,
        gpus_per_proc: u64,
    ) -> Result<String, AdapterError>;
}

type Constructor =
    Arc<dyn Fn(&JobParams, Arc<dyn Clock>) -> Result<Arc<dyn JobAdapter>, AdapterError> + Send + Sync>;

type Registry = RwLock<HashMap<String, Constructor>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        builtin(&mut map, "local", |params, _| Ok(Arc::new(LocalJob::new(params)) as _));
        builtin(&mut map, "slurm", |params, clock| {
            Ok(Arc::new(SlurmJob::new(params, clock)?) as _)
        });
        RwLock::new(map)
    })
}

fn builtin(
    map: &mut HashMap<String, Constructor>,
    name: &str,
    ctor: impl Fn(&JobParams, Arc<dyn Clock>) -> Result<Arc<dyn JobAdapter>, AdapterError>
        + Send
        + Sync
        + 'static,
) {
    map.insert(name.to_string(), Arc::new(ctor));
}

/// Register a job adapter under a name, replacing any previous entry.
pub fn define_job(
    name: impl Into<String>,
    ctor: impl Fn(&JobParams, Arc<dyn Clock>) -> Result<Arc<dyn JobAdapter>, AdapterError>
        + Send
        + Sync
        + 'static,
) {
    registry().write().insert(name.into(), Arc::new(ctor));
}

/// Build the adapter selected by the `job` config table.
pub fn job_adapter(
    params: &JobParams,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn JobAdapter>, AdapterError> {
    let ctor = registry()
        .read()
        .get(&params.job)
        .cloned()
        .ok_or_else(|| AdapterError::Unknown(params.job.clone()))?;
    ctor(params, clock)
}

#[cfg(any(test, feature = "test-support"))]
pub use test_support::FakeJob;

#[cfg(any(test, feature = "test-support"))]
mod test_support {
    use super::*;

    /// Fully scriptable adapter for engine tests.
    #[derive(Debug, Clone)]
    pub struct FakeJob {
        pub nnodes: u64,
        pub cpus_per_node: u64,
        pub gpus_per_node: u64,
        pub share_node: bool,
        pub no_mpi: bool,
        pub remaining_minutes: Option<f64>,
    }

    impl Default for FakeJob {
        fn default() -> Self {
            Self {
                nnodes: 1,
                cpus_per_node: 4,
                gpus_per_node: 0,
                share_node: true,
                no_mpi: false,
                remaining_minutes: None,
            }
        }
    }

    impl JobAdapter for FakeJob {
        fn name(&self) -> &'static str {
            "fake"
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

        fn no_mpi(&self) -> bool {
            self.no_mpi
        }

        fn time_limited(&self) -> bool {
            self.remaining_minutes.is_some()
        }

        fn remaining_minutes(&self) -> Option<f64> {
            self.remaining_minutes
        }

        fn launch_command(
            &self,
            cmd: &str,
            nprocs: u64,
            _cpus_per_proc: u64,
            _gpus_per_proc: u64,
        ) -> Result<String, AdapterError> {
            Ok(format!("fakerun -n {nprocs} {cmd}"))
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
