// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fnplane-store.

use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Function identifier failed validation.
    #[error("Invalid function id '{id}': {reason}")]
    InvalidId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Version string failed validation.
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion {
        /// The rejected version.
        version: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Requested version was never deployed (or the function is gone).
    #[error("Version {version} not found for function {id}")]
    VersionNotFound {
        /// Function identifier.
        id: String,
        /// Requested version.
        version: String,
    },

    /// Chunked storage is incomplete or inconsistent with its metadata.
    #[error("Corrupt chunked storage for {key}: {reason}")]
    CorruptChunks {
        /// Metadata key of the chunk set.
        key: String,
        /// What was wrong.
        reason: String,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Content store backend reported an error.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;
