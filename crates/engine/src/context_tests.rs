// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::call::call;
use crate::runtime::Runtime;
use serial_test::serial;
use stagekit_core::{args, kwargs, ArgBag, StageFn};

fn runtime(dir: &std::path::Path) -> Runtime {
    Runtime::new(stagekit_config::Config::default(), dir).expect("runtime")
}

fn runtime_with_config(dir: &std::path::Path, config: stagekit_config::Config) -> Runtime {
    Runtime::new(config, dir).expect("runtime")
}

#[tokio::test]
#[serial]
async fn lookup_walks_data_then_kwargs_then_config() {
    let dir = tempfile::tempdir().unwrap();

    let leaf = StageFn::builder("ctx_walk", "leaf").register(|_| async {
        // `period` set on the parent, `event` from root kwargs,
        // `catalog` from config defaults.
        assert_eq!(ctx().get("period"), Some(Value::Int(10)));
        assert_eq!(ctx().get("event"), Some(Value::Str("ev01".into())));
        assert_eq!(ctx().get("catalog"), Some(Value::Str("global".into())));
        assert_eq!(ctx().get("nope"), None);
        Ok(Value::Null)
    });
    let root = {
        let leaf = leaf.clone();
        StageFn::builder("ctx_walk", "root").register(move |_| {
            let leaf = leaf.clone();
            async move {
                ctx().set("period", 10)?;
                call(leaf, ArgBag::default()).await
            }
        })
    };

    let mut config = stagekit_config::Config::default();
    config.data.insert("catalog".to_string(), toml::Value::String("global".into()));
    runtime_with_config(dir.path(), config)
        .run(Some(root), ArgBag::new(vec![], kwargs! { "event" => "ev01" }))
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn own_data_shadows_parent_values() {
    let dir = tempfile::tempdir().unwrap();
    let leaf = StageFn::builder("ctx_shadow", "leaf").register(|_| async {
        ctx().set("period", 20)?;
        assert_eq!(ctx().get("period"), Some(Value::Int(20)));
        Ok(Value::Null)
    });
    let root = {
        let leaf = leaf.clone();
        StageFn::builder("ctx_shadow", "root").register(move |_| {
            let leaf = leaf.clone();
            async move {
                ctx().set("period", 10)?;
                call(leaf, ArgBag::default()).await?;
                // The child's write stayed on the child.
                assert_eq!(ctx().get("period"), Some(Value::Int(10)));
                Ok(Value::Null)
            }
        })
    };

    runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
}

#[test]
fn set_outside_stage_is_an_error() {
    let err = ctx().set("key", 1).unwrap_err();
    assert!(err.is(stagekit_core::reason::OUTSIDE_STAGE));
}

#[tokio::test]
#[serial]
async fn cwd_composes_fragments_root_to_leaf() {
    let dir = tempfile::tempdir().unwrap();

    let leaf = StageFn::builder("ctx_cwd", "leaf").register(|_| async {
        assert_eq!(ctx().cwd(), std::path::PathBuf::from("events/ev01"));
        // A pending setwd override is appended last.
        ctx().setwd(Some("wave"));
        assert_eq!(ctx().cwd(), std::path::PathBuf::from("events/ev01/wave"));
        ctx().setwd(None);
        Ok(Value::Null)
    });
    let mid = {
        let leaf = leaf.clone();
        StageFn::builder("ctx_cwd", "mid").register(move |_| {
            let leaf = leaf.clone();
            async move {
                // Children created while this override is set inherit it
                // as their directory fragment.
                ctx().setwd(Some("ev01"));
                call(leaf, ArgBag::default()).await
            }
        })
    };
    let root = {
        let mid = mid.clone();
        StageFn::builder("ctx_cwd", "root").register(move |_| {
            let mid = mid.clone();
            async move {
                ctx().setwd(Some("events"));
                call(mid, ArgBag::default()).await
            }
        })
    };

    runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
}

#[tokio::test]
#[serial]
async fn shell_call_runs_in_context_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();

    let base = dir.path().to_path_buf();
    let root = StageFn::builder("ctx_shell", "root").register(move |_| {
        let base = base.clone();
        async move {
            ctx().call(&format!("pwd > {}/cwd.txt", base.display())).await?;
            Ok(Value::Null)
        }
    });

    // Run from the workspace base directory so `.` resolves there.
    let rt = runtime(dir.path());
    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let outcome = rt.run(Some(root), ArgBag::default()).await;
    std::env::set_current_dir(prev).unwrap();
    outcome.unwrap();

    let recorded = std::fs::read_to_string(dir.path().join("cwd.txt")).unwrap();
    assert!(!recorded.trim().is_empty());
}

#[tokio::test]
#[serial]
async fn failed_shell_call_raises() {
    let dir = tempfile::tempdir().unwrap();
    let root = StageFn::builder("ctx_shell_fail", "root").register(|_| async {
        ctx().call("exit 9").await?;
        Ok(Value::Null)
    });

    let err = runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap_err();
    match err {
        crate::RuntimeError::Stage(info) => {
            assert!(info.is(stagekit_core::reason::SUBPROCESS));
            assert!(info.message.contains("exit code: 9"), "{}", info.message);
        }
        other => panic!("expected stage error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn facades_point_at_run_and_workspace_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    let root = StageFn::builder("ctx_facade", "root").register(move |_| {
        let base = base.clone();
        async move {
            let root_dir = ctx().root().expect("root facade");
            let ws = ctx().workspace().expect("workspace facade");
            assert_eq!(root_dir.base(), base.as_path());
            assert_eq!(ws.base(), base.join(".stagekit").as_path());
            Ok(Value::Null)
        }
    });

    runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
}

#[tokio::test]
#[serial]
async fn args_macro_values_flow_through_kwargs_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let leaf = StageFn::builder("ctx_kwargs", "leaf").register(|_| async {
        assert_eq!(ctx().get("band"), Some(Value::Int(2)));
        Ok(Value::Null)
    });
    let root = {
        let leaf = leaf.clone();
        StageFn::builder("ctx_kwargs", "root").register(move |_| {
            let leaf = leaf.clone();
            async move { call(leaf, ArgBag::new(args![], kwargs! { "band" => 2 })).await }
        })
    };

    runtime(dir.path()).run(Some(root), ArgBag::default()).await.unwrap();
}
