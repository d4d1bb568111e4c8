// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for fnplane-dispatch integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use fnplane_dispatch::backend::mock::MockSandbox;
use fnplane_store::metadata::{CascadeStep, ErrorHandling};
use fnplane_store::{CodeStorage, FunctionMetadata, FunctionRegistry, MemoryContentStore};
use serde_json::{Value, json};

/// Registry and code storage over one in-memory content store.
pub fn memory_backends() -> (FunctionRegistry, CodeStorage) {
    let store = Arc::new(MemoryContentStore::new());
    (FunctionRegistry::new(store.clone()), CodeStorage::new(store))
}

fn number(input: &Value, field: &str) -> Result<i64, String> {
    input[field]
        .as_i64()
        .ok_or_else(|| format!("{} must be a number", field))
}

/// Sandbox understanding a few arithmetic "programs", keyed by code.
pub fn arithmetic_sandbox() -> MockSandbox {
    MockSandbox::new()
        .with_handler("add", |input| {
            Ok(json!({"sum": number(input, "a")? + number(input, "b")?}))
        })
        .with_handler("add-ten", |input| {
            Ok(json!({"value": number(input, "value")? + 10}))
        })
        .with_handler("multiply-three", |input| {
            Ok(json!({"value": number(input, "value")? * 3}))
        })
        .with_handler("negate", |input| {
            Ok(json!({"value": -number(input, "value")?}))
        })
        .with_handler("fail", |_| Err("boom".to_string()))
}

/// Deploy a code function at 1.0.0 whose stored code is `code`.
pub async fn deploy_code(
    registry: &FunctionRegistry,
    storage: &CodeStorage,
    id: &str,
    code: &str,
) -> FunctionMetadata {
    let metadata = registry
        .deploy(FunctionMetadata::code(id, "1.0.0", "javascript"))
        .await
        .expect("Failed to deploy");
    storage
        .put(id, code.as_bytes(), Some("1.0.0"))
        .await
        .expect("Failed to store code");
    metadata
}

/// Deploy a cascade at 1.0.0 over the given function ids.
pub async fn deploy_cascade(
    registry: &FunctionRegistry,
    id: &str,
    steps: Vec<CascadeStep>,
    error_handling: ErrorHandling,
) -> FunctionMetadata {
    registry
        .deploy(FunctionMetadata::cascade(id, "1.0.0", steps, error_handling))
        .await
        .expect("Failed to deploy cascade")
}

/// Step dispatching the current version of `function_id`.
pub fn step(function_id: &str) -> CascadeStep {
    CascadeStep {
        function_id: function_id.to_string(),
        version: None,
        fallback_to: None,
    }
}

/// Step with a fallback function.
pub fn step_with_fallback(function_id: &str, fallback: &str) -> CascadeStep {
    CascadeStep {
        fallback_to: Some(fallback.to_string()),
        ..step(function_id)
    }
}
