// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end function flows against the mock engine.

mod common;

use std::time::Duration;

use common::{TestContext, request};
use dockyard::Error;
use dockyard::engine::MockEngine;
use dockyard::model::{BuildStatus, RunRecordFilter, RunStatus};
use dockyard::storage::FileKind;

#[tokio::test]
async fn create_builds_image_and_stages_main_file() {
    let ctx = TestContext::new().await;
    let view = ctx.services.functions.create(request("hello")).await.unwrap();

    assert_eq!(view.function.name, "hello");
    assert_eq!(view.function.run_timeout, 30);
    assert!(view.pending_changes);

    assert_eq!(ctx.wait_for_build("hello").await, BuildStatus::Success);
    assert!(ctx.engine.has_image("dockyard/hello").await);

    let main = ctx.services.files.dir_path(FileKind::Resources, "hello").join("main.py");
    assert!(main.exists());

    let fetched = ctx.services.functions.get("hello").await.unwrap();
    assert_eq!(fetched.build_status, Some(BuildStatus::Success));
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.create_function("hello").await;

    let err = ctx.services.functions.create(request("hello")).await.unwrap_err();
    assert!(matches!(err, Error::FunctionAlreadyExists(name) if name == "hello"));
}

#[tokio::test]
async fn deploy_promotes_staged_files_once() {
    let ctx = TestContext::new().await;
    ctx.create_function("hello").await;

    let view = ctx.services.functions.deploy("hello").await.unwrap();
    assert!(view.function.deployment_details.last_deployed.is_some());
    assert!(!view.pending_changes);
    assert!(
        ctx.services
            .files
            .dir_path(FileKind::Volume, "hello")
            .join("main.py")
            .exists()
    );

    let err = ctx.services.functions.deploy("hello").await.unwrap_err();
    assert!(matches!(err, Error::FunctionAlreadyDeployed(_)));

    let stored = ctx.services.functions.get("hello").await.unwrap();
    assert!(stored.function.deployment_details.last_deployed.is_some());
}

#[tokio::test]
async fn trigger_records_a_successful_run() {
    let ctx = TestContext::new().await;
    ctx.create_function("hello").await;

    let started = ctx.services.functions.trigger("hello").await.unwrap();
    assert_eq!(started.status, RunStatus::InProgress);
    assert!(started.id.starts_with("hello_._"));

    let finished = ctx.wait_for_run(&started.id).await;
    assert_eq!(finished.status, RunStatus::Success);
    assert_eq!(finished.exit_code, Some(0));
    assert!(finished.end_time.is_some());

    let mut logs = String::new();
    for _ in 0..200 {
        logs = ctx.services.logs.get(&started.id).await.unwrap();
        if logs.contains("hello from dockyard") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(logs.contains(&format!("{}.log", started.id)));
    assert!(logs.contains("hello from dockyard"));
    assert!(logs.contains("with exit code: 0"));
}

#[tokio::test]
async fn nonzero_exit_code_is_still_a_success() {
    let mut engine = MockEngine::new();
    engine.exit_code = 3;
    let ctx = TestContext::with_engine(engine).await;
    ctx.create_function("hello").await;

    let started = ctx.services.functions.trigger("hello").await.unwrap();
    let finished = ctx.wait_for_run(&started.id).await;

    assert_eq!(finished.status, RunStatus::Success);
    assert_eq!(finished.exit_code, Some(3));
}

#[tokio::test]
async fn engine_failure_records_a_failed_run() {
    let ctx = TestContext::new().await;
    ctx.create_function("hello").await;
    ctx.wait_for_build("hello").await;
    ctx.engine.fail_next("start", 1).await;

    let started = ctx.services.functions.trigger("hello").await.unwrap();
    let finished = ctx.wait_for_run(&started.id).await;

    assert_eq!(finished.status, RunStatus::Failure);
    assert!(finished.exit_code.is_none());
    let message = finished.error_message.unwrap();
    assert!(message.contains("hello"), "{message}");
    assert!(message.contains("start"), "{message}");
}

#[tokio::test]
async fn trigger_of_unknown_function_fails_synchronously() {
    let ctx = TestContext::new().await;
    let err = ctx.services.functions.trigger("ghost").await.unwrap_err();
    assert!(matches!(err, Error::FunctionNotFound(_)));
    assert!(
        ctx.services
            .runs
            .list(&RunRecordFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn update_with_new_dependencies_rebuilds() {
    let ctx = TestContext::new().await;
    ctx.create_function("hello").await;
    ctx.wait_for_build("hello").await;
    assert_eq!(ctx.engine.call_count("build").await, 1);

    let mut update = request("hello");
    update.code_type_name = None;
    update.dependencies = Some(vec!["requests".to_string()]);
    let view = ctx.services.functions.update(update).await.unwrap();
    assert_eq!(view.function.dependencies, vec!["requests".to_string()]);
    assert_eq!(view.function.run_timeout, 30);

    for _ in 0..400 {
        if ctx.engine.call_count("build").await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(ctx.engine.call_count("build").await, 2);
}

#[tokio::test]
async fn update_of_unknown_function_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx.services.functions.update(request("ghost")).await.unwrap_err();
    assert!(matches!(err, Error::FunctionNotFound(_)));
}

#[tokio::test]
async fn delete_removes_everything_about_a_function() {
    let ctx = TestContext::new().await;
    ctx.create_function("hello").await;
    ctx.create_function("other").await;
    ctx.wait_for_build("hello").await;

    let started = ctx.services.functions.trigger("hello").await.unwrap();
    ctx.wait_for_run(&started.id).await;

    assert_eq!(ctx.services.functions.delete("hello").await.unwrap(), "hello");

    assert!(matches!(
        ctx.services.functions.get("hello").await,
        Err(Error::FunctionNotFound(_))
    ));
    assert!(matches!(
        ctx.services.runs.get(&started.id).await,
        Err(Error::RunRecordNotFound(_))
    ));
    assert!(ctx.services.builder.status("hello").is_none());
    for kind in [FileKind::Resources, FileKind::Dockerfile] {
        assert!(!ctx.services.files.dir_path(kind, "hello").exists());
    }
    assert!(ctx.services.functions.get("other").await.is_ok());

    let deleted = ctx.services.functions.delete_all().await.unwrap();
    assert_eq!(deleted, vec!["other".to_string()]);
    assert!(ctx.services.functions.list().await.unwrap().is_empty());
}
