// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function Registry
//!
//! Manages versioned function metadata: the always-current pointer, one
//! snapshot per deployed version, and an append-only deployment history.
//!
//! Writes are ordered snapshot -> current -> history. The content store has
//! no transactions, so a reader may briefly see a new snapshot before the
//! current pointer moves.
//!
//! Each history record lives under its own key, named by a timestamp that
//! increases per registry plus a random suffix, so overlapping deploys never
//! overwrite each other's records.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::content::{ContentStore, get_json, list_all, put_json};
use crate::error::{Result, StoreError};
use crate::metadata::{DeploymentAction, DeploymentRecord, FunctionMetadata};
use crate::validation::{validate_function_id, validate_semver, validate_slot, validate_storage_id};
use crate::version::compare_version_strings;

const ROOT: &str = "functions/";

fn current_key(id: &str) -> String {
    format!("{}{}/current", ROOT, id)
}

fn versions_prefix(id: &str) -> String {
    format!("{}{}/versions/", ROOT, id)
}

fn version_key(id: &str, version: &str) -> String {
    format!("{}{}/versions/{}", ROOT, id, version)
}

fn history_prefix(id: &str) -> String {
    format!("{}{}/history/", ROOT, id)
}

fn history_key(id: &str, stamp: i64) -> String {
    format!("{}{:020}-{}", history_prefix(id), stamp, Uuid::new_v4().simple())
}

/// Function registry backed by a content store.
#[derive(Clone)]
pub struct FunctionRegistry {
    store: Arc<dyn ContentStore>,
    last_stamp: Arc<AtomicI64>,
}

impl FunctionRegistry {
    /// Create a registry over the given content store.
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            last_stamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Nanosecond stamp for a history key, strictly increasing within this
    /// registry even when the clock does not advance.
    fn next_stamp(&self, at: DateTime<Utc>) -> i64 {
        let now = at.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }

    /// Deploy a function version and make it current.
    ///
    /// Re-deploying an existing version overwrites its snapshot and keeps
    /// the `createdAt` of the first deployment.
    pub async fn deploy(&self, metadata: FunctionMetadata) -> Result<FunctionMetadata> {
        validate_function_id(&metadata.id)?;
        validate_semver(&metadata.version)?;

        let id = metadata.id.clone();
        let version = metadata.version.clone();
        let now = Utc::now();

        let previous: Option<FunctionMetadata> =
            get_json(self.store.as_ref(), &version_key(&id, &version)).await?;
        let created_at = previous
            .and_then(|p| p.created_at)
            .or(metadata.created_at)
            .unwrap_or(now);

        let metadata = FunctionMetadata {
            created_at: Some(created_at),
            updated_at: Some(now),
            ..metadata
        };

        put_json(self.store.as_ref(), &version_key(&id, &version), &metadata).await?;
        put_json(self.store.as_ref(), &current_key(&id), &metadata).await?;
        self.append_history(&id, &metadata, DeploymentAction::Deploy)
            .await?;

        tracing::info!(
            function_id = %id,
            version = %version,
            function_type = %metadata.function_type,
            "Deployed function"
        );

        Ok(metadata)
    }

    /// Get the current metadata of a function.
    pub async fn get(&self, id: &str) -> Result<Option<FunctionMetadata>> {
        validate_storage_id(id)?;
        get_json(self.store.as_ref(), &current_key(id)).await
    }

    /// Get the metadata of one specific version, current or not.
    pub async fn get_version(&self, id: &str, version: &str) -> Result<Option<FunctionMetadata>> {
        validate_storage_id(id)?;
        validate_slot(version)?;
        get_json(self.store.as_ref(), &version_key(id, version)).await
    }

    /// All deployed versions, newest first, without duplicates.
    pub async fn get_versions(&self, id: &str) -> Result<Vec<String>> {
        validate_storage_id(id)?;
        let prefix = versions_prefix(id);
        let mut versions: Vec<String> = list_all(self.store.as_ref(), &prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .filter(|v| !v.is_empty() && !v.contains('/'))
            .collect();

        versions.sort_by(|a, b| compare_version_strings(b, a));
        versions.dedup();
        Ok(versions)
    }

    /// Make an earlier version current again.
    ///
    /// Fails unless the function is currently deployed and `target_version`
    /// was deployed at some point. Rolling back to the current version is
    /// allowed and recorded.
    pub async fn rollback(&self, id: &str, target_version: &str) -> Result<FunctionMetadata> {
        let not_found = || StoreError::VersionNotFound {
            id: id.to_string(),
            version: target_version.to_string(),
        };

        if validate_storage_id(id).is_err() || validate_slot(target_version).is_err() {
            return Err(not_found());
        }
        if self.get(id).await?.is_none() {
            return Err(not_found());
        }

        let snapshot = self
            .get_version(id, target_version)
            .await?
            .ok_or_else(not_found)?;

        let metadata = FunctionMetadata {
            updated_at: Some(Utc::now()),
            ..snapshot
        };

        put_json(self.store.as_ref(), &current_key(id), &metadata).await?;
        self.append_history(id, &metadata, DeploymentAction::Rollback)
            .await?;

        tracing::info!(
            function_id = %id,
            version = %target_version,
            "Rolled back function"
        );

        Ok(metadata)
    }

    /// Full deployment history, newest first.
    pub async fn get_deployment_history(&self, id: &str) -> Result<Vec<DeploymentRecord>> {
        validate_storage_id(id)?;
        let mut history = self.load_history(id).await?;
        history.reverse();
        Ok(history)
    }

    /// Remove the current pointer. Snapshots and history are kept.
    ///
    /// Returns whether the function was deployed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        validate_storage_id(id)?;
        let key = current_key(id);
        let existed = self.store.get(&key).await?.is_some();
        self.store.delete(&key).await?;

        if existed {
            tracing::info!(function_id = %id, "Deleted function");
        }

        Ok(existed)
    }

    /// Ids of all currently deployed functions, sorted.
    pub async fn list_functions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = list_all(self.store.as_ref(), ROOT)
            .await?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(ROOT)
                    .and_then(|rest| rest.strip_suffix("/current"))
                    .filter(|id| !id.contains('/'))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// History records, oldest first.
    async fn load_history(&self, id: &str) -> Result<Vec<DeploymentRecord>> {
        let keys = list_all(self.store.as_ref(), &history_prefix(id)).await?;
        let mut history = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = get_json(self.store.as_ref(), &key).await? {
                history.push(record);
            }
        }
        Ok(history)
    }

    async fn append_history(
        &self,
        id: &str,
        metadata: &FunctionMetadata,
        action: DeploymentAction,
    ) -> Result<()> {
        let deployed_at = metadata.updated_at.unwrap_or_else(Utc::now);
        let record = DeploymentRecord {
            version: metadata.version.clone(),
            metadata: metadata.clone(),
            deployed_at,
            action,
        };
        let key = history_key(id, self.next_stamp(deployed_at));
        put_json(self.store.as_ref(), &key, &record).await
    }
}
