// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher admission: priority, fractional node shares, pool bounds.

use num_rational::Ratio;
use stagekit_adapters::{FakeJob, JobAdapter};
use stagekit_engine::{compute_size, Dispatcher, GpuSpec, Limits, ResourceRequest, Size};
use std::sync::Arc;
use std::time::Duration;

fn nodes(n: u64, d: u64) -> Size {
    Size::Nodes(Ratio::new(n, d))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1100)).await;
}

#[tokio::test(start_paused = true)]
async fn priority_beats_arrival_order() {
    let dispatcher = Arc::new(Dispatcher::new());
    let limits = Limits { nnodes: 1, cpus_per_node: 4 };
    let order = Arc::new(order_log::Order::default());

    let submit = |priority: i64, label: &'static str| {
        let dispatcher = dispatcher.clone();
        let order = order.clone();
        tokio::spawn(async move {
            let permit = dispatcher.admit(nodes(1, 1), priority, limits).await;
            order.push(label);
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(permit);
        })
    };

    let low = submit(0, "low");
    let high = submit(1, "high");
    settle().await;
    assert_eq!(order.snapshot(), vec!["high"], "higher priority admitted first");

    high.await.unwrap();
    settle().await;
    low.await.unwrap();
    assert_eq!(order.snapshot(), vec!["high", "low"]);
}

#[tokio::test(start_paused = true)]
async fn fractional_admission_never_oversubscribes() {
    let dispatcher = Arc::new(Dispatcher::new());
    let limits = Limits { nnodes: 2, cpus_per_node: 8 };

    let mut halves = Vec::new();
    for _ in 0..3 {
        halves.push(dispatcher.admit(nodes(1, 2), 0, limits).await);
    }
    let whole = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let _permit = dispatcher.admit(nodes(1, 1), 0, limits).await;
        })
    };
    settle().await;

    // Three halves in flight, the whole node waits; never above 2 nodes.
    assert_eq!(dispatcher.running_sizes().len(), 3);
    assert_eq!(dispatcher.pending_len(), 1);
    assert_in_budget(&dispatcher, 2);

    drop(halves.pop());
    settle().await;
    assert_eq!(dispatcher.pending_len(), 0);
    assert_in_budget(&dispatcher, 2);
    whole.await.unwrap();
}

fn assert_in_budget(dispatcher: &Dispatcher, nnodes: i64) {
    let total = dispatcher
        .running_sizes()
        .iter()
        .filter(|size| !size.is_multiprocessing())
        .fold(Ratio::new(0i64, 1i64), |acc, size| {
            acc + match size {
                Size::Nodes(r) => Ratio::new(*r.numer() as i64, *r.denom() as i64),
                Size::Procs(_) => Ratio::new(0, 1),
            }
        });
    assert!(total <= Ratio::new(nnodes, 1), "in-flight {total} > {nnodes} nodes");
}

#[tokio::test(start_paused = true)]
async fn multiprocessing_pool_is_bounded_by_cores() {
    let dispatcher = Arc::new(Dispatcher::new());
    let limits = Limits { nnodes: 1, cpus_per_node: 4 };

    let first = dispatcher.admit(Size::Procs(3), 0, limits).await;
    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let _permit = dispatcher.admit(Size::Procs(2), 0, limits).await;
        })
    };
    settle().await;
    assert_eq!(dispatcher.pending_len(), 1, "3 + 2 > 4 cores");

    drop(first);
    settle().await;
    assert_eq!(dispatcher.pending_len(), 0);
    second.await.unwrap();
}

fn request(nprocs: u64, gpus: GpuSpec) -> ResourceRequest {
    ResourceRequest {
        nprocs,
        cpus_per_proc: 1,
        gpus_per_proc: gpus,
        multiprocessing: false,
        custom_nnodes: None,
    }
}

#[test]
fn bad_mps_configuration_is_rejected_before_launch() {
    let job = FakeJob { gpus_per_node: 4, ..FakeJob::default() };
    assert!(
        compute_size(&request(4, GpuSpec::Mps(3)), &job).is_err(),
        "nprocs % mps != 0 rejected synchronously",
    );
}

#[test]
fn local_jobs_dispatch_as_multiprocessing() {
    let job = FakeJob { no_mpi: true, cpus_per_node: 16, ..FakeJob::default() };
    assert_eq!(compute_size(&request(8, GpuSpec::Count(0)), &job).unwrap(), Size::Procs(8));
    assert_eq!(job.cpus_per_node(), 16);
}

/// Tiny ordered log used by the admission specs.
mod order_log {
    #[derive(Default)]
    pub struct Order(std::sync::Mutex<Vec<&'static str>>);

    impl Order {
        pub fn push(&self, label: &'static str) {
            self.0.lock().unwrap().push(label);
        }

        pub fn snapshot(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }
}
