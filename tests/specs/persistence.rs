// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint protocol: round-trips, payload chunks, crash recovery.

use crate::prelude::{runtime, ws_dir};
use serial_test::serial;
use stagekit_core::{args, ArgBag, BlobValue, StageFn, Value};
use stagekit_engine::call;
use stagekit_storage::{load_roots, save_roots, CACHE_FILE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn saved_tree_round_trips_under_canonical_equality() {
    let dir = tempfile::tempdir().unwrap();
    let child = StageFn::builder("spec_roundtrip", "child")
        .params(["n"])
        .register(|bag| async move {
            Ok(Value::Int(bag.args[0].as_int().unwrap_or(0) * 2))
        });
    let root = {
        let child = child.clone();
        StageFn::builder("spec_roundtrip", "root").register(move |_| {
            let child = child.clone();
            async move { call(child, ArgBag::positional(args![21])).await }
        })
    };

    runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();

    let saved = load_roots(&ws_dir(dir.path())).unwrap();
    let json = serde_json::to_vec(&saved).unwrap();
    let reloaded: Vec<stagekit_core::StageRecord> = serde_json::from_slice(&json).unwrap();
    assert_eq!(saved, reloaded, "serialize/deserialize is identity on records");

    // Revival reconstructs the same comparable tree.
    let revived = reloaded[0].clone().revive(None);
    let store = stagekit_core::payload::store();
    let re_flattened = revived.lock().to_record(&mut store.lock()).unwrap();
    assert_eq!(saved[0], re_flattened);
}

#[tokio::test]
#[serial]
async fn payload_chunks_hold_large_values_out_of_tree() {
    let dir = tempfile::tempdir().unwrap();
    let root = StageFn::builder("spec_payload", "root")
        .params(["field"])
        .register(|_| async { Ok(Value::Null) });

    let field = BlobValue::new(vec![7u8; 4096]);
    let mut config = stagekit_config::Config::default();
    config.data_chunk_size = Some(1.0);
    let rt = stagekit_engine::Runtime::new(config, dir.path()).unwrap();
    rt.run(Some(root), ArgBag::positional(vec![Value::Blob(field)])).await.unwrap();

    // The tree references the chunk instead of embedding bytes.
    let ws = ws_dir(dir.path());
    assert!(ws.join("data#0.bin").exists());
    let saved = load_roots(&ws).unwrap();
    match &saved[0].args[0] {
        Value::Blob(blob) => {
            assert_eq!(blob.location, Some((0, 0)));
            assert!(blob.data.is_none());
        }
        other => panic!("expected blob reference, got {other:?}"),
    }

    // A fresh engine resolves the reference back to the same bytes.
    let rt = runtime(dir.path());
    drop(rt);
    let blob = match &load_roots(&ws).unwrap()[0].args[0] {
        Value::Blob(blob) => blob.clone(),
        other => panic!("expected blob, got {other:?}"),
    };
    assert_eq!(blob.bytes().unwrap().as_slice(), &[7u8; 4096]);
}

#[tokio::test]
#[serial]
async fn disabled_chunking_keeps_values_in_tree() {
    let dir = tempfile::tempdir().unwrap();
    let root = StageFn::builder("spec_inline", "root")
        .params(["field"])
        .register(|_| async { Ok(Value::Null) });

    // Default config: data_chunk_size is absent.
    let rt = runtime(dir.path());
    rt.run(Some(root), ArgBag::positional(vec![Value::Blob(BlobValue::new(vec![1, 2, 3]))]))
        .await
        .unwrap();

    let ws = ws_dir(dir.path());
    assert!(!ws.join("data#0.bin").exists(), "no chunk files without a chunk size");
    match &load_roots(&ws).unwrap()[0].args[0] {
        Value::Blob(blob) => {
            assert_eq!(blob.location, None);
            assert_eq!(blob.bytes().unwrap().as_slice(), &[1, 2, 3]);
        }
        other => panic!("expected inline blob, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn crash_consistent_resume_reuses_finished_children() {
    let dir = tempfile::tempdir().unwrap();
    let c1_runs = Arc::new(AtomicUsize::new(0));
    let c2_runs = Arc::new(AtomicUsize::new(0));

    let c1 = {
        let c1_runs = c1_runs.clone();
        StageFn::builder("spec_crash", "c1").register(move |_| {
            let c1_runs = c1_runs.clone();
            async move {
                c1_runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(1))
            }
        })
    };
    let c2 = {
        let c2_runs = c2_runs.clone();
        StageFn::builder("spec_crash", "c2").register(move |_| {
            let c2_runs = c2_runs.clone();
            async move {
                c2_runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(2))
            }
        })
    };
    let root = {
        let (c1, c2) = (c1.clone(), c2.clone());
        StageFn::builder("spec_crash", "root").register(move |_| {
            let (c1, c2) = (c1.clone(), c2.clone());
            async move {
                call(c1, ArgBag::default()).await?;
                call(c2, ArgBag::default()).await
            }
        })
    };

    // Build the post-crash cache: c1 done, c2 interrupted mid-flight.
    runtime(dir.path()).run(Some(root.clone()), ArgBag::default()).await.unwrap();
    let mut saved = load_roots(&ws_dir(dir.path())).unwrap();
    saved[0].done = false;
    saved[0].history[1].done = false;
    saved[0].history[1].result = None;
    save_roots(&ws_dir(dir.path()), &saved).unwrap();

    let out = runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
    assert_eq!(out, Some(Value::Int(2)));
    assert_eq!(c1_runs.load(Ordering::SeqCst), 1, "finished child reused");
    assert_eq!(c2_runs.load(Ordering::SeqCst), 2, "interrupted child re-executed");

    let healed = load_roots(&ws_dir(dir.path())).unwrap();
    assert!(healed[0].done);
    assert!(healed[0].history.iter().all(|c| c.done));
}

#[tokio::test]
#[serial]
async fn verified_swap_leaves_no_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = StageFn::builder("spec_swap", "root").register(|_| async { Ok(Value::Null) });
    runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();

    let ws = ws_dir(dir.path());
    assert!(ws.join(CACHE_FILE).exists());
    assert!(!ws.join("_stagekit.json").exists());
    assert!(ws.join("paths.json").exists());
}
