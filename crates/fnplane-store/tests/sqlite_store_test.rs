// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite content store tests for fnplane-store.

use std::sync::Arc;

use fnplane_store::content::{ListOptions, PutOptions, list_all};
use fnplane_store::{
    CodeStorage, CodeStorageConfig, ContentStore, FunctionMetadata, FunctionRegistry,
    SqliteContentStore,
};

async fn memory_store() -> SqliteContentStore {
    SqliteContentStore::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database")
}

#[tokio::test]
async fn test_put_get_overwrite_delete() {
    let store = memory_store().await;
    assert_eq!(store.backend_name(), "sqlite");

    store
        .put("k", b"one".to_vec(), PutOptions::content_type("text/plain"))
        .await
        .unwrap();
    store
        .put("k", b"two".to_vec(), PutOptions::default())
        .await
        .unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));

    let options = store.get_options("k").await.unwrap().unwrap();
    assert_eq!(options.content_type, None);

    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_custom_metadata_round_trip() {
    let store = memory_store().await;
    let mut options = PutOptions::content_type("application/javascript");
    options
        .custom_metadata
        .insert("language".into(), "javascript".into());

    store.put("k", vec![1, 2, 3], options.clone()).await.unwrap();
    assert_eq!(store.get_options("k").await.unwrap(), Some(options));
}

#[tokio::test]
async fn test_list_pages_by_prefix() {
    let store = memory_store().await;
    for i in 0..5 {
        store
            .put(&format!("code/foo/slots/{}.0.0", i), vec![i], PutOptions::default())
            .await
            .unwrap();
    }
    store
        .put("code/foo-bar/slots/latest", vec![0], PutOptions::default())
        .await
        .unwrap();

    let page = store
        .list(ListOptions {
            prefix: "code/foo/".into(),
            limit: Some(2),
            cursor: None,
        })
        .await
        .unwrap();
    assert_eq!(page.keys.len(), 2);
    assert!(page.truncated);

    let all = list_all(&store, "code/foo/").await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_registry_and_code_storage_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("fnplane.db");

    {
        let store: Arc<dyn ContentStore> =
            Arc::new(SqliteContentStore::from_path(&path).await.unwrap());
        let registry = FunctionRegistry::new(store.clone());
        let storage = CodeStorage::with_config(store, CodeStorageConfig::with_threshold(16));

        registry
            .deploy(FunctionMetadata::code("my-func", "1.0.0", "javascript"))
            .await
            .unwrap();
        storage
            .put_large("my-func", &[42u8; 40], Some("1.0.0"))
            .await
            .unwrap();
    }

    // Reopen and read back
    let store: Arc<dyn ContentStore> =
        Arc::new(SqliteContentStore::from_path(&path).await.unwrap());
    let registry = FunctionRegistry::new(store.clone());
    let storage = CodeStorage::with_config(store, CodeStorageConfig::with_threshold(16));

    let current = registry.get("my-func").await.unwrap().unwrap();
    assert_eq!(current.version, "1.0.0");
    assert_eq!(
        storage.get_large("my-func", Some("1.0.0")).await.unwrap(),
        Some(vec![42u8; 40])
    );
    assert_eq!(storage.list_versions("my-func").await.unwrap(), vec!["1.0.0"]);
    assert_eq!(
        registry.get_deployment_history("my-func").await.unwrap().len(),
        1
    );
}
