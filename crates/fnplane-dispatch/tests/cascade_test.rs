// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cascade tests for fnplane-dispatch.

mod common;

use std::sync::Arc;

use fnplane_dispatch::backend::mock::{MockSandbox, MockTaskQueue};
use fnplane_dispatch::{DispatchConfig, Dispatcher};
use fnplane_store::metadata::ErrorHandling;
use fnplane_store::{CodeStorage, FunctionMetadata, FunctionRegistry, FunctionType};
use serde_json::json;

use common::{
    arithmetic_sandbox, deploy_cascade, deploy_code, memory_backends, step, step_with_fallback,
};

struct Fixture {
    registry: FunctionRegistry,
    sandbox: Arc<MockSandbox>,
    dispatcher: Dispatcher,
}

async fn fixture() -> Fixture {
    let (registry, storage) = memory_backends();
    deploy_arithmetic(&registry, &storage).await;

    let sandbox = Arc::new(arithmetic_sandbox());
    let dispatcher = Dispatcher::builder()
        .sandbox(sandbox.clone())
        .task_queue(Arc::new(MockTaskQueue::new()))
        .registry(registry.clone())
        .code_storage(storage)
        .build()
        .unwrap();

    Fixture {
        registry,
        sandbox,
        dispatcher,
    }
}

async fn deploy_arithmetic(registry: &FunctionRegistry, storage: &CodeStorage) {
    for (id, code) in [
        ("add-ten", "add-ten"),
        ("multiply-three", "multiply-three"),
        ("negate", "negate"),
        ("fail", "fail"),
        ("fail-too", "fail"),
    ] {
        deploy_code(registry, storage, id, code).await;
    }
}

#[tokio::test]
async fn test_steps_pipe_output_to_next_input() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "pipeline",
        vec![step("add-ten"), step("multiply-three")],
        ErrorHandling::FailFast,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 5}), None).await;

    assert_eq!(result.status, 200);
    assert_eq!(result.body, json!({"value": 45}));
    assert_eq!(result.meta.executor_type, "cascade");
    assert_eq!(result.meta.steps_executed, Some(2));
    assert_eq!(result.meta.tiers_attempted, Some(vec!["code".to_string()]));
    assert_eq!(result.meta.tier, 1);
}

#[tokio::test]
async fn test_pinned_step_version() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "pinned",
        vec![fnplane_store::metadata::CascadeStep {
            version: Some("1.0.0".into()),
            ..step("add-ten")
        }],
        ErrorHandling::FailFast,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 1}), None).await;
    assert_eq!(result.body, json!({"value": 11}));
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_failure() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "strict",
        vec![step("add-ten"), step("fail"), step("multiply-three")],
        ErrorHandling::FailFast,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 5}), None).await;

    assert_eq!(result.status, 500);
    assert_eq!(result.error_message(), Some("boom"));
    assert_eq!(result.meta.steps_executed, Some(1));
    assert_eq!(result.meta.tiers_attempted, Some(vec!["code".to_string()]));
    assert_eq!(f.sandbox.run_count(), 2);
}

#[tokio::test]
async fn test_fail_fast_missing_step_function() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "dangling",
        vec![step("ghost")],
        ErrorHandling::FailFast,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({}), None).await;

    assert_eq!(result.status, 404);
    assert_eq!(result.error_message(), Some("Function ghost not found"));
    assert_eq!(result.meta.tiers_attempted, Some(Vec::new()));
}

#[tokio::test]
async fn test_fallback_function_replaces_failed_step() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "lenient",
        vec![
            step("add-ten"),
            step_with_fallback("fail", "negate"),
            step("multiply-three"),
        ],
        ErrorHandling::Fallback,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 5}), None).await;

    assert_eq!(result.status, 200);
    assert_eq!(result.body, json!({"value": -45}));
    assert_eq!(result.meta.steps_executed, Some(3));
}

#[tokio::test]
async fn test_fallback_without_target_skips_step() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "skipping",
        vec![step("add-ten"), step("fail"), step("multiply-three")],
        ErrorHandling::Fallback,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 5}), None).await;

    assert_eq!(result.status, 200);
    assert_eq!(result.body, json!({"value": 45}));
    assert_eq!(result.meta.steps_executed, Some(2));
}

#[tokio::test]
async fn test_failed_fallback_is_surfaced() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "doomed",
        vec![step("add-ten"), step_with_fallback("fail", "fail-too")],
        ErrorHandling::Fallback,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 5}), None).await;

    assert_eq!(result.status, 500);
    assert_eq!(result.error_message(), Some("boom"));
    assert_eq!(result.meta.steps_executed, Some(1));
}

#[tokio::test]
async fn test_no_successful_steps_is_500() {
    let f = fixture().await;
    let cascade = deploy_cascade(
        &f.registry,
        "hopeless",
        vec![step("fail"), step("ghost")],
        ErrorHandling::Fallback,
    )
    .await;

    let result = f.dispatcher.dispatch(&cascade, json!({"value": 5}), None).await;

    assert_eq!(result.status, 500);
    assert_eq!(
        result.error_message(),
        Some("Cascade produced no successful steps")
    );
    assert_eq!(result.meta.steps_executed, Some(0));

    let empty = FunctionMetadata::cascade("empty", "1.0.0", Vec::new(), ErrorHandling::FailFast);
    let result = f.dispatcher.dispatch(&empty, json!({}), None).await;
    assert_eq!(result.status, 500);
}

#[tokio::test]
async fn test_nested_cascade_reports_inner_tiers() {
    let f = fixture().await;
    f.registry
        .deploy(FunctionMetadata::new("approve", "1.0.0", FunctionType::Human))
        .await
        .unwrap();
    deploy_cascade(
        &f.registry,
        "inner",
        vec![step("add-ten"), step("approve")],
        ErrorHandling::FailFast,
    )
    .await;
    let outer = deploy_cascade(
        &f.registry,
        "outer",
        vec![step("inner")],
        ErrorHandling::FailFast,
    )
    .await;

    let result = f.dispatcher.dispatch(&outer, json!({"value": 5}), None).await;

    assert_eq!(result.status, 202);
    assert_eq!(result.body["taskStatus"], "pending");
    assert!(result.body.get("_meta").is_none());
    assert_eq!(
        result.meta.tiers_attempted,
        Some(vec!["code".to_string(), "human".to_string()])
    );
    assert_eq!(result.meta.tier, 4);
    assert_eq!(result.meta.steps_executed, Some(1));
}

#[tokio::test]
async fn test_self_referencing_cascade_hits_depth_bound() {
    let (registry, storage) = memory_backends();
    let dispatcher = Dispatcher::builder()
        .sandbox(Arc::new(arithmetic_sandbox()))
        .registry(registry.clone())
        .code_storage(storage)
        .config(DispatchConfig {
            max_cascade_depth: 3,
            ..DispatchConfig::default()
        })
        .build()
        .unwrap();

    let cascade = deploy_cascade(
        &registry,
        "ouroboros",
        vec![step("ouroboros")],
        ErrorHandling::FailFast,
    )
    .await;

    let result = dispatcher.dispatch(&cascade, json!({}), None).await;

    assert_eq!(result.status, 500);
    assert_eq!(
        result.error_message(),
        Some("Maximum cascade depth of 3 exceeded")
    );
}

#[tokio::test]
async fn test_cascade_without_registry_is_unavailable() {
    let dispatcher = Dispatcher::builder()
        .sandbox(Arc::new(arithmetic_sandbox()))
        .build()
        .unwrap();
    let cascade = FunctionMetadata::cascade(
        "orphan",
        "1.0.0",
        vec![step("add-ten")],
        ErrorHandling::FailFast,
    );

    let result = dispatcher.dispatch(&cascade, json!({}), None).await;
    assert_eq!(result.status, 503);
    assert_eq!(result.meta.executor_type, "cascade");
}
