// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function registry tests for fnplane-store.

use std::sync::Arc;

use fnplane_store::{
    DeploymentAction, FunctionMetadata, FunctionRegistry, FunctionType, MemoryContentStore,
    StoreError,
};

fn registry() -> FunctionRegistry {
    FunctionRegistry::new(Arc::new(MemoryContentStore::new()))
}

fn metadata(id: &str, version: &str) -> FunctionMetadata {
    FunctionMetadata::code(id, version, "javascript")
}

#[tokio::test]
async fn test_deploy_and_get() {
    let registry = registry();

    let deployed = registry
        .deploy(metadata("my-func", "1.0.0"))
        .await
        .expect("Failed to deploy");
    assert!(deployed.created_at.is_some());
    assert!(deployed.updated_at.is_some());

    let current = registry
        .get("my-func")
        .await
        .expect("Failed to get")
        .expect("Function not found");
    assert_eq!(current.version, "1.0.0");
    assert_eq!(current.function_type, FunctionType::Code);

    assert!(registry.get("other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_deploy_rollback_history() {
    let registry = registry();

    let v1 = registry.deploy(metadata("my-func", "1.0.0")).await.unwrap();
    registry.deploy(metadata("my-func", "2.0.0")).await.unwrap();

    let rolled_back = registry
        .rollback("my-func", "1.0.0")
        .await
        .expect("Failed to roll back");
    assert_eq!(rolled_back.version, "1.0.0");
    assert_eq!(rolled_back.created_at, v1.created_at);

    let current = registry.get("my-func").await.unwrap().unwrap();
    assert_eq!(current.version, "1.0.0");

    let history = registry.get_deployment_history("my-func").await.unwrap();
    assert_eq!(history.len(), 3);
    // Newest first
    assert_eq!(history[0].action, DeploymentAction::Rollback);
    assert_eq!(history[0].version, "1.0.0");
    assert_eq!(history[1].version, "2.0.0");
    assert_eq!(history[2].version, "1.0.0");
    assert_eq!(history[2].action, DeploymentAction::Deploy);
}

#[tokio::test]
async fn test_rollback_to_unknown_version_fails() {
    let registry = registry();
    registry.deploy(metadata("my-func", "1.0.0")).await.unwrap();

    let err = registry.rollback("my-func", "9.9.9").await.unwrap_err();
    assert!(matches!(err, StoreError::VersionNotFound { .. }));
    let message = err.to_string();
    assert!(message.contains("9.9.9"));
    assert!(message.contains("my-func"));

    // Current pointer untouched
    let current = registry.get("my-func").await.unwrap().unwrap();
    assert_eq!(current.version, "1.0.0");
    assert_eq!(
        registry.get_deployment_history("my-func").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_rollback_after_delete_fails() {
    let registry = registry();
    registry.deploy(metadata("my-func", "1.0.0")).await.unwrap();

    assert!(registry.delete("my-func").await.unwrap());
    assert!(!registry.delete("my-func").await.unwrap());
    assert!(registry.get("my-func").await.unwrap().is_none());

    let err = registry.rollback("my-func", "1.0.0").await.unwrap_err();
    assert!(matches!(err, StoreError::VersionNotFound { .. }));

    // Snapshots survive deletion
    assert!(
        registry
            .get_version("my-func", "1.0.0")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_versions_newest_first_without_duplicates() {
    let registry = registry();
    for version in ["1.0.0", "10.0.0", "2.0.0", "2.0.0", "1.1.0-beta.1", "1.1.0"] {
        registry.deploy(metadata("my-func", version)).await.unwrap();
    }

    let versions = registry.get_versions("my-func").await.unwrap();
    assert_eq!(
        versions,
        vec!["10.0.0", "2.0.0", "1.1.0", "1.1.0-beta.1", "1.0.0"]
    );
}

#[tokio::test]
async fn test_redeploy_keeps_created_at() {
    let registry = registry();
    let first = registry.deploy(metadata("my-func", "1.0.0")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = registry.deploy(metadata("my-func", "1.0.0")).await.unwrap();

    assert_eq!(first.created_at, second.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(registry.get_versions("my-func").await.unwrap(), vec!["1.0.0"]);
}

#[tokio::test]
async fn test_deploy_rejects_invalid_input() {
    let registry = registry();

    let too_long = "x".repeat(65);
    for id in ["", "1abc", "has space", "trailing-", "a/b", too_long.as_str()] {
        let err = registry.deploy(metadata(id, "1.0.0")).await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidId { .. }),
            "expected invalid id for {:?}",
            id
        );
    }

    for version in ["1.0", "v1.0.0", "01.0.0", ""] {
        let err = registry
            .deploy(metadata("my-func", version))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidVersion { .. }),
            "expected invalid version for {:?}",
            version
        );
    }

    assert!(registry.list_functions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_functions() {
    let registry = registry();
    registry.deploy(metadata("beta", "1.0.0")).await.unwrap();
    registry.deploy(metadata("alpha", "1.0.0")).await.unwrap();
    registry.deploy(metadata("alpha", "1.1.0")).await.unwrap();
    registry.deploy(metadata("gone", "1.0.0")).await.unwrap();
    registry.delete("gone").await.unwrap();

    assert_eq!(registry.list_functions().await.unwrap(), vec!["alpha", "beta"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deploys_keep_every_history_record() {
    let registry = registry();

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .deploy(metadata("busy", &format!("1.0.{}", i)))
                    .await
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.get_versions("busy").await.unwrap().len(), 50);
    let history = registry.get_deployment_history("busy").await.unwrap();
    assert_eq!(history.len(), 50);
    assert!(history.iter().all(|r| r.action == DeploymentAction::Deploy));
    let mut versions: Vec<&str> = history.iter().map(|r| r.version.as_str()).collect();
    versions.sort();
    versions.dedup();
    assert_eq!(versions.len(), 50);
}
