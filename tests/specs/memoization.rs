// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structural replay: matching calls reuse cached results across runs.

use crate::prelude::{runtime, ws_dir};
use serial_test::serial;
use stagekit_core::{args, ArgBag, Rerun, StageFn, Value};
use stagekit_engine::{call, StageCall};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn simple_memoization_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let child_runs = Arc::new(AtomicUsize::new(0));

    let child = {
        let child_runs = child_runs.clone();
        StageFn::builder("spec_memo", "child").params(["x"]).register(move |_| {
            let child_runs = child_runs.clone();
            async move {
                child_runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(42))
            }
        })
    };
    let root = {
        let child = child.clone();
        StageFn::builder("spec_memo", "root").register(move |_| {
            let child = child.clone();
            async move { call(child, ArgBag::positional(args![1])).await }
        })
    };

    // First run executes both stages.
    let out = runtime(dir.path()).run(Some(root.clone()), ArgBag::default()).await.unwrap();
    assert_eq!(out, Some(Value::Int(42)));
    assert_eq!(child_runs.load(Ordering::SeqCst), 1);

    // Second run: the root body is entered again, but the child result
    // comes from the saved tree.
    let out = runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
    assert_eq!(out, Some(Value::Int(42)));
    assert_eq!(child_runs.load(Ordering::SeqCst), 1);

    let roots = stagekit_storage::load_roots(&ws_dir(dir.path())).unwrap();
    assert_eq!(roots.len(), 1);
    assert!(roots[0].done);
    assert!(roots[0].history[0].done);
}

#[tokio::test]
#[serial]
async fn auto_rerun_matches_unchanged_children_and_appends_new() {
    let dir = tempfile::tempdir().unwrap();
    let c1_runs = Arc::new(AtomicUsize::new(0));
    let c2_runs = Arc::new(AtomicUsize::new(0));
    let extended = Arc::new(AtomicBool::new(false));

    let c1 = {
        let c1_runs = c1_runs.clone();
        StageFn::builder("spec_auto", "c1").register(move |_| {
            let c1_runs = c1_runs.clone();
            async move {
                c1_runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
    };
    let c2 = {
        let c2_runs = c2_runs.clone();
        StageFn::builder("spec_auto", "c2").register(move |_| {
            let c2_runs = c2_runs.clone();
            async move {
                c2_runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
    };
    let p = {
        let (c1, c2, extended) = (c1.clone(), c2.clone(), extended.clone());
        StageFn::builder("spec_auto", "p").rerun(Rerun::Auto).register(move |_| {
            let (c1, c2, extended) = (c1.clone(), c2.clone(), extended.clone());
            async move {
                c1.call(ArgBag::default()).await?;
                if extended.load(Ordering::SeqCst) {
                    c2.call(ArgBag::default()).await?;
                }
                Ok(Value::Null)
            }
        })
    };

    runtime(dir.path()).run(Some(p.clone()), ArgBag::default()).await.unwrap();
    assert_eq!((c1_runs.load(Ordering::SeqCst), c2_runs.load(Ordering::SeqCst)), (1, 0));

    // The workflow grew a stage: the parent re-enters, c1 is skipped,
    // c2 is appended.
    extended.store(true, Ordering::SeqCst);
    runtime(dir.path()).run(Some(p), ArgBag::default()).await.unwrap();
    assert_eq!((c1_runs.load(Ordering::SeqCst), c2_runs.load(Ordering::SeqCst)), (1, 1));

    let roots = stagekit_storage::load_roots(&ws_dir(dir.path())).unwrap();
    assert_eq!(roots[0].history.len(), 2);
}

#[tokio::test]
#[serial]
async fn never_policy_performs_no_work_on_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let root = {
        let runs = runs.clone();
        StageFn::builder("spec_never", "root").rerun(Rerun::Never).register(move |_| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(1))
            }
        })
    };

    runtime(dir.path()).run(Some(root.clone()), ArgBag::default()).await.unwrap();
    let out = runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
    assert_eq!(out, Some(Value::Int(1)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[serial]
async fn failed_stage_retries_on_rerun_without_changes() {
    let dir = tempfile::tempdir().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let root = {
        let attempts = attempts.clone();
        StageFn::builder("spec_retry", "root").register(move |_| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(stagekit_core::ErrorInfo::new(
                        stagekit_core::reason::BODY,
                        "first attempt fails",
                    ))
                } else {
                    Ok(Value::Int(3))
                }
            }
        })
    };

    runtime(dir.path()).run(Some(root.clone()), ArgBag::default()).await.unwrap_err();
    let out = runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
    assert_eq!(out, Some(Value::Int(3)));
    assert_eq!(attempts.load(Ordering::SeqCst), 2, "done=false re-arms execution");
}
