// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Code Storage
//!
//! Stores compiled function bodies per `(function_id, version)` slot. A slot
//! is either an explicit version or `latest` (no version given); the two
//! never affect each other.
//!
//! Bodies larger than the configured threshold can be stored with
//! [`CodeStorage::put_large`], which splits them into fixed-size chunks
//! keyed by index plus a small metadata record. Reassembly reads chunks
//! `0..totalChunks` by key, never relying on listing order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CodeStorageConfig;
use crate::content::{ContentStore, PutOptions, get_json, list_all, put_json};
use crate::error::{Result, StoreError};
use crate::validation::{validate_slot, validate_storage_id};
use crate::version::compare_version_strings;

/// Slot name used when no version is given.
pub const LATEST: &str = "latest";

const CODE_CONTENT_TYPE: &str = "application/javascript";
const SOURCE_MAP_CONTENT_TYPE: &str = "application/json";

fn function_prefix(id: &str) -> String {
    format!("code/{}/", id)
}

fn slots_prefix(id: &str) -> String {
    format!("code/{}/slots/", id)
}

fn chunks_prefix(id: &str) -> String {
    format!("code/{}/chunks/", id)
}

fn slot_key(id: &str, slot: &str) -> String {
    format!("code/{}/slots/{}", id, slot)
}

fn map_key(id: &str, slot: &str) -> String {
    format!("code/{}/maps/{}", id, slot)
}

fn chunk_meta_key(id: &str, slot: &str) -> String {
    format!("code/{}/chunks/{}/meta", id, slot)
}

fn chunk_key(id: &str, slot: &str, index: usize) -> String {
    format!("code/{}/chunks/{}/{:08}", id, slot, index)
}

/// Metadata describing a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Always true for chunked storage.
    pub chunked: bool,
    /// Number of chunks.
    pub total_chunks: usize,
    /// Size of the reassembled body in bytes.
    pub total_size: usize,
    /// Size of every chunk but possibly the last.
    pub chunk_size: usize,
}

/// Ordered list of slots tried after the requested version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackChain {
    /// A single fallback slot.
    Single(String),
    /// Several fallback slots, tried in order.
    List(Vec<String>),
}

impl Default for FallbackChain {
    fn default() -> Self {
        FallbackChain::Single(LATEST.to_string())
    }
}

impl FallbackChain {
    fn entries(&self) -> Vec<&str> {
        match self {
            FallbackChain::Single(v) => vec![v.as_str()],
            FallbackChain::List(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for FallbackChain {
    fn from(v: &str) -> Self {
        FallbackChain::Single(v.to_string())
    }
}

impl From<Vec<String>> for FallbackChain {
    fn from(vs: Vec<String>) -> Self {
        FallbackChain::List(vs)
    }
}

/// Code resolved through a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCode {
    /// The body.
    pub code: Vec<u8>,
    /// Slot it came from (`latest` for the unversioned slot).
    pub version: String,
    /// Whether a fallback entry was used instead of the requested version.
    pub fallback: bool,
}

/// Pagination request for version listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum versions per page.
    pub limit: usize,
    /// Resume after this version.
    pub cursor: Option<String>,
}

/// One page of versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionPage {
    /// Versions on this page, in ascending semantic-version order.
    pub versions: Vec<String>,
    /// Cursor for the next page, `None` on the last page.
    pub cursor: Option<String>,
}

/// Code storage backed by a content store.
#[derive(Clone)]
pub struct CodeStorage {
    store: Arc<dyn ContentStore>,
    config: CodeStorageConfig,
}

impl CodeStorage {
    /// Create code storage with default configuration.
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self::with_config(store, CodeStorageConfig::default())
    }

    /// Create code storage with explicit configuration.
    pub fn with_config(store: Arc<dyn ContentStore>, config: CodeStorageConfig) -> Self {
        Self { store, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &CodeStorageConfig {
        &self.config
    }

    /// Slot name for `version`. `latest` is reserved for the unversioned
    /// slot and is rejected as an explicit version.
    fn slot(id: &str, version: Option<&str>) -> Result<String> {
        validate_storage_id(id)?;
        match version {
            Some(LATEST) => Err(StoreError::InvalidVersion {
                version: LATEST.to_string(),
                reason: "'latest' names the unversioned slot; pass no version instead".into(),
            }),
            Some(v) => {
                validate_slot(v)?;
                Ok(v.to_string())
            }
            None => Ok(LATEST.to_string()),
        }
    }

    /// Store code in a slot, replacing any chunked body stored there.
    pub async fn put(&self, id: &str, code: &[u8], version: Option<&str>) -> Result<()> {
        let slot = Self::slot(id, version)?;
        self.delete_chunks(id, &slot).await?;
        self.put_plain(id, &slot, code).await
    }

    async fn put_plain(&self, id: &str, slot: &str, code: &[u8]) -> Result<()> {
        self.store
            .put(
                &slot_key(id, slot),
                code.to_vec(),
                PutOptions::content_type(CODE_CONTENT_TYPE),
            )
            .await?;

        tracing::debug!(function_id = %id, slot = %slot, size = code.len(), "Stored code");
        Ok(())
    }

    /// Read code from a slot.
    pub async fn get(&self, id: &str, version: Option<&str>) -> Result<Option<Vec<u8>>> {
        let slot = Self::slot(id, version)?;
        self.store.get(&slot_key(id, &slot)).await
    }

    /// Remove one slot, plain or chunked.
    pub async fn delete(&self, id: &str, version: Option<&str>) -> Result<()> {
        let slot = Self::slot(id, version)?;
        self.store.delete(&slot_key(id, &slot)).await?;
        self.delete_chunks(id, &slot).await
    }

    /// Store a source map for a slot.
    pub async fn put_source_map(
        &self,
        id: &str,
        source_map: &[u8],
        version: Option<&str>,
    ) -> Result<()> {
        let slot = Self::slot(id, version)?;
        self.store
            .put(
                &map_key(id, &slot),
                source_map.to_vec(),
                PutOptions::content_type(SOURCE_MAP_CONTENT_TYPE),
            )
            .await
    }

    /// Read the source map of a slot.
    pub async fn get_source_map(&self, id: &str, version: Option<&str>) -> Result<Option<Vec<u8>>> {
        let slot = Self::slot(id, version)?;
        self.store.get(&map_key(id, &slot)).await
    }

    /// Remove a slot together with its source map.
    pub async fn delete_with_source_map(&self, id: &str, version: Option<&str>) -> Result<()> {
        let slot = Self::slot(id, version)?;
        self.store.delete(&slot_key(id, &slot)).await?;
        self.delete_chunks(id, &slot).await?;
        self.store.delete(&map_key(id, &slot)).await
    }

    /// Store code that may exceed the chunk threshold.
    ///
    /// Bodies up to the threshold go into the plain slot; larger bodies are
    /// chunked. Any chunk set previously stored for the slot is removed
    /// first so a shorter body never inherits stale chunks, and a chunked
    /// body replaces a plain one.
    pub async fn put_large(&self, id: &str, code: &[u8], version: Option<&str>) -> Result<()> {
        let slot = Self::slot(id, version)?;
        self.delete_chunks(id, &slot).await?;

        if code.len() <= self.config.chunk_threshold {
            return self.put_plain(id, &slot, code).await;
        }
        self.store.delete(&slot_key(id, &slot)).await?;

        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = code.len().div_ceil(chunk_size);

        for (index, chunk) in code.chunks(chunk_size).enumerate() {
            self.store
                .put(
                    &chunk_key(id, &slot, index),
                    chunk.to_vec(),
                    PutOptions::content_type("application/octet-stream"),
                )
                .await?;
        }

        // Metadata last: readers never see a chunk set without all chunks.
        let metadata = ChunkMetadata {
            chunked: true,
            total_chunks,
            total_size: code.len(),
            chunk_size,
        };
        put_json(self.store.as_ref(), &chunk_meta_key(id, &slot), &metadata).await?;

        tracing::debug!(
            function_id = %id,
            slot = %slot,
            total_size = code.len(),
            total_chunks,
            "Stored chunked code"
        );

        Ok(())
    }

    /// Read code stored with [`put_large`](Self::put_large).
    ///
    /// Falls back to the plain slot when the slot is not chunked.
    pub async fn get_large(&self, id: &str, version: Option<&str>) -> Result<Option<Vec<u8>>> {
        let slot = Self::slot(id, version)?;
        let meta_key = chunk_meta_key(id, &slot);

        let Some(metadata) = get_json::<ChunkMetadata>(self.store.as_ref(), &meta_key).await?
        else {
            return self.store.get(&slot_key(id, &slot)).await;
        };

        let mut code = Vec::with_capacity(metadata.total_size);
        for index in 0..metadata.total_chunks {
            let chunk = self
                .store
                .get(&chunk_key(id, &slot, index))
                .await?
                .ok_or_else(|| StoreError::CorruptChunks {
                    key: meta_key.clone(),
                    reason: format!("chunk {} of {} is missing", index, metadata.total_chunks),
                })?;
            code.extend_from_slice(&chunk);
        }

        if code.len() != metadata.total_size {
            return Err(StoreError::CorruptChunks {
                key: meta_key,
                reason: format!(
                    "reassembled {} bytes, expected {}",
                    code.len(),
                    metadata.total_size
                ),
            });
        }

        Ok(Some(code))
    }

    /// Remove chunked storage (metadata and every chunk) for a slot.
    pub async fn delete_large(&self, id: &str, version: Option<&str>) -> Result<()> {
        let slot = Self::slot(id, version)?;
        self.delete_chunks(id, &slot).await
    }

    async fn delete_chunks(&self, id: &str, slot: &str) -> Result<()> {
        let meta_key = chunk_meta_key(id, slot);
        let metadata = get_json::<ChunkMetadata>(self.store.as_ref(), &meta_key).await?;

        self.store.delete(&meta_key).await?;
        if let Some(metadata) = metadata {
            for index in 0..metadata.total_chunks {
                self.store.delete(&chunk_key(id, slot, index)).await?;
            }
        }

        // Orphans from an interrupted write have no metadata to enumerate them.
        let prefix = format!("{}{}/", chunks_prefix(id), slot);
        for key in list_all(self.store.as_ref(), &prefix).await? {
            self.store.delete(&key).await?;
        }

        Ok(())
    }

    /// Resolve code through a fallback chain.
    ///
    /// Tries `requested` first (when given), then every entry of `chain` in
    /// order. The entry `latest` names the unversioned slot. Chunked slots
    /// are reassembled transparently.
    pub async fn get_with_fallback(
        &self,
        id: &str,
        requested: Option<&str>,
        chain: &FallbackChain,
    ) -> Result<Option<ResolvedCode>> {
        validate_storage_id(id)?;

        if let Some(version) = requested
            && let Some(code) = self.get_large(id, slot_version(version)).await?
        {
            return Ok(Some(ResolvedCode {
                code,
                version: version.to_string(),
                fallback: false,
            }));
        }

        for entry in chain.entries() {
            if requested == Some(entry) {
                continue;
            }
            if let Some(code) = self.get_large(id, slot_version(entry)).await? {
                tracing::debug!(
                    function_id = %id,
                    requested = ?requested,
                    resolved = %entry,
                    "Resolved code through fallback chain"
                );
                return Ok(Some(ResolvedCode {
                    code,
                    version: entry.to_string(),
                    fallback: requested.is_some(),
                }));
            }
        }

        Ok(None)
    }

    /// Stored version slots, plain ones in storage order followed by
    /// chunked ones, excluding `latest`.
    pub async fn list_versions(&self, id: &str) -> Result<Vec<String>> {
        validate_storage_id(id)?;
        let prefix = slots_prefix(id);
        let mut versions: Vec<String> = list_all(self.store.as_ref(), &prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .filter(|slot| slot != LATEST && !slot.is_empty())
            .collect();

        // Chunked slots are identified by their metadata key only.
        let prefix = chunks_prefix(id);
        for key in list_all(self.store.as_ref(), &prefix).await? {
            let Some(slot) = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix("/meta"))
            else {
                continue;
            };
            if slot != LATEST && !slot.is_empty() && !versions.iter().any(|v| v == slot) {
                versions.push(slot.to_string());
            }
        }

        Ok(versions)
    }

    /// Stored version slots in ascending semantic-version order.
    pub async fn list_versions_sorted(&self, id: &str) -> Result<Vec<String>> {
        let mut versions = self.list_versions(id).await?;
        versions.sort_by(|a, b| compare_version_strings(a, b));
        Ok(versions)
    }

    /// One page of the sorted version listing.
    pub async fn list_versions_paginated(
        &self,
        id: &str,
        request: PageRequest,
    ) -> Result<VersionPage> {
        let sorted = self.list_versions_sorted(id).await?;
        let limit = request.limit.max(1);

        let start = match &request.cursor {
            Some(cursor) => sorted
                .iter()
                .position(|v| compare_version_strings(v, cursor).is_gt())
                .unwrap_or(sorted.len()),
            None => 0,
        };

        let versions: Vec<String> = sorted.iter().skip(start).take(limit).cloned().collect();
        let cursor = if start + versions.len() < sorted.len() {
            versions.last().cloned()
        } else {
            None
        };

        Ok(VersionPage { versions, cursor })
    }

    /// Remove every slot, source map and chunk set of a function.
    ///
    /// Other functions are unaffected, including ids sharing a prefix.
    pub async fn delete_all(&self, id: &str) -> Result<usize> {
        validate_storage_id(id)?;
        let keys = list_all(self.store.as_ref(), &function_prefix(id)).await?;
        for key in &keys {
            self.store.delete(key).await?;
        }

        tracing::debug!(function_id = %id, deleted = keys.len(), "Deleted all code");
        Ok(keys.len())
    }
}

fn slot_version(entry: &str) -> Option<&str> {
    if entry == LATEST { None } else { Some(entry) }
}
