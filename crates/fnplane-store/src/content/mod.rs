// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content store interface and backends.
//!
//! A content store is durable key -> bytes storage with prefix listing.
//! It offers no transactions and may be eventually consistent across
//! readers; the registry and code storage are written with that in mind.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryContentStore;
pub use self::sqlite::SqliteContentStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// Options attached to a `put`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// MIME type of the stored bytes.
    pub content_type: Option<String>,
    /// Arbitrary string metadata stored alongside the object.
    pub custom_metadata: HashMap<String, String>,
}

impl PutOptions {
    /// Options carrying only a content type.
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            custom_metadata: HashMap::new(),
        }
    }
}

/// Options for a paginated `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Maximum number of keys in one page (`None` means backend default).
    pub limit: Option<usize>,
    /// Resume after this cursor from a previous page.
    pub cursor: Option<String>,
}

impl ListOptions {
    /// List everything under `prefix`, first page.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// One page of listed keys, in ascending key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys on this page.
    pub keys: Vec<String>,
    /// Cursor for the next page, if `truncated`.
    pub cursor: Option<String>,
    /// Whether more keys remain.
    pub truncated: bool,
}

/// Default page size used when `ListOptions::limit` is unset.
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Durable key/value storage with prefix listing.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Backend identifier (e.g., "memory", "sqlite").
    fn backend_name(&self) -> &'static str;

    /// Read the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys by prefix, one page at a time.
    async fn list(&self, options: ListOptions) -> Result<ListPage>;
}

/// Drain every page of a prefix listing.
pub async fn list_all(store: &dyn ContentStore, prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = None;

    loop {
        let page = store
            .list(ListOptions {
                prefix: prefix.to_string(),
                limit: None,
                cursor,
            })
            .await?;
        keys.extend(page.keys);
        if !page.truncated {
            break;
        }
        cursor = page.cursor;
        if cursor.is_none() {
            break;
        }
    }

    Ok(keys)
}

/// Read a key and decode it as JSON.
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn ContentStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it.
pub(crate) async fn put_json<T: serde::Serialize>(
    store: &dyn ContentStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store
        .put(key, bytes, PutOptions::content_type("application/json"))
        .await
}
