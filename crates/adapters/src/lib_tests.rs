// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use stagekit_core::FakeClock;

fn clock() -> Arc<dyn Clock> {
    Arc::new(FakeClock::new())
}

#[test]
fn selects_local_by_default() {
    let adapter = job_adapter(&JobParams::default(), clock()).unwrap();
    assert_eq!(adapter.name(), "local");
    assert!(adapter.no_mpi());
}

#[test]
fn selects_slurm_by_name() {
    let params = JobParams {
        job: "slurm".into(),
        cpus_per_node: Some(8),
        ..JobParams::default()
    };
    let adapter = job_adapter(&params, clock()).unwrap();
    assert_eq!(adapter.name(), "slurm");
}

#[test]
fn unknown_adapter_is_an_error() {
    let params = JobParams { job: "pbs".into(), ..JobParams::default() };
    assert!(matches!(job_adapter(&params, clock()), Err(AdapterError::Unknown(name)) if name == "pbs"));
}

#[test]
fn define_job_registers_custom_adapter() {
    define_job("lib_tests_custom", |params, _| {
        Ok(Arc::new(FakeJob { nnodes: params.nnodes, ..FakeJob::default() }) as _)
    });
    let params = JobParams { job: "lib_tests_custom".into(), nnodes: 9, ..JobParams::default() };
    let adapter = job_adapter(&params, clock()).unwrap();
    assert_eq!(adapter.nnodes(), 9);
}

#[test]
fn fake_job_walltime_flags() {
    let job = FakeJob { remaining_minutes: Some(5.0), ..FakeJob::default() };
    assert!(job.time_limited());
    assert_eq!(job.remaining_minutes(), Some(5.0));
    assert_eq!(job.launch_command("x", 2, 1, 0).unwrap(), "fakerun -n 2 x");
}
