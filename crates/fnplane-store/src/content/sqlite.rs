// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed content store.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{ContentStore, DEFAULT_LIST_LIMIT, ListOptions, ListPage, PutOptions};
use crate::error::Result;

/// SQLite migrator with the content store schema embedded.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed content store.
#[derive(Clone)]
pub struct SqliteContentStore {
    pool: SqlitePool,
}

impl SqliteContentStore {
    /// Create a store from an existing pool. The schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL and run migrations.
    ///
    /// `sqlite::memory:` is supported; the pool is then limited to a single
    /// connection so every query sees the same in-memory database.
    pub async fn connect(url: &str) -> Result<Self> {
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file if needed, then
    /// runs migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM content_objects WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()> {
        let custom_metadata: Option<String> = if options.custom_metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&options.custom_metadata)?)
        };

        sqlx::query(
            r#"
            INSERT INTO content_objects (key, value, content_type, custom_metadata, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                content_type = excluded.content_type,
                custom_metadata = excluded.custom_metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(options.content_type)
        .bind(custom_metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(key = %key, "Stored content object");

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM content_objects WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListPage> {
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
        // Keyset pagination: the cursor is the last key of the previous page.
        let after = options.cursor.unwrap_or_default();

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT key FROM content_objects
            WHERE substr(key, 1, length(?)) = ?
              AND key > ?
            ORDER BY key ASC
            LIMIT ?
            "#,
        )
        .bind(&options.prefix)
        .bind(&options.prefix)
        .bind(&after)
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut keys: Vec<String> = rows.into_iter().map(|(k,)| k).collect();
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

impl SqliteContentStore {
    /// Read the put options stored alongside a key.
    pub async fn get_options(&self, key: &str) -> Result<Option<PutOptions>> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT content_type, custom_metadata FROM content_objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((content_type, custom_metadata)) => {
                let custom_metadata: HashMap<String, String> = match custom_metadata {
                    Some(raw) => serde_json::from_str(&raw)?,
                    None => HashMap::new(),
                };
                Ok(Some(PutOptions {
                    content_type,
                    custom_metadata,
                }))
            }
            None => Ok(None),
        }
    }
}
