// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory content store.
//!
//! Keeps objects in a sorted map so prefix listings come back in key order.
//! Used by tests and single-process deployments.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ContentStore, DEFAULT_LIST_LIMIT, ListOptions, ListPage, PutOptions};
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredObject {
    value: Vec<u8>,
    options: PutOptions,
}

/// In-memory content store.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl MemoryContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Read the put options stored alongside a key.
    pub async fn get_options(&self, key: &str) -> Option<PutOptions> {
        let objects = self.objects.lock().await;
        objects.get(key).map(|o| o.options.clone())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.lock().await;
        Ok(objects.get(key).map(|o| o.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()> {
        let mut objects = self.objects.lock().await;
        objects.insert(key.to_string(), StoredObject { value, options });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self.objects.lock().await;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListPage> {
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
        let objects = self.objects.lock().await;

        let lower = match &options.cursor {
            Some(cursor) if cursor.as_str() >= options.prefix.as_str() => {
                Bound::Excluded(cursor.clone())
            }
            _ => Bound::Included(options.prefix.clone()),
        };

        let mut keys: Vec<String> = objects
            .range((lower, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(&options.prefix))
            .take(limit + 1)
            .cloned()
            .collect();

        let truncated = keys.len() > limit;
        if truncated {
            keys.truncate(limit);
        }
        let cursor = if truncated { keys.last().cloned() } else { None };

        Ok(ListPage {
            keys,
            cursor,
            truncated,
        })
    }
}
