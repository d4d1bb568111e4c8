// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fnplane-store.

/// Default size above which `put_large` splits code into chunks (25 MiB).
pub const DEFAULT_CHUNK_THRESHOLD: usize = 25 * 1024 * 1024;

/// Code storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeStorageConfig {
    /// Payloads strictly larger than this are chunked.
    pub chunk_threshold: usize,
    /// Size of each chunk.
    pub chunk_size: usize,
}

impl Default for CodeStorageConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

impl CodeStorageConfig {
    /// Configuration with the given threshold, chunking at the same size.
    pub fn with_threshold(chunk_threshold: usize) -> Self {
        Self {
            chunk_threshold,
            chunk_size: chunk_threshold,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `FNPLANE_CHUNK_THRESHOLD_BYTES` (default: 26214400)
    /// - `FNPLANE_CHUNK_SIZE_BYTES` (default: the threshold)
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_threshold = parse_size("FNPLANE_CHUNK_THRESHOLD_BYTES")?
            .unwrap_or(DEFAULT_CHUNK_THRESHOLD);
        let chunk_size = parse_size("FNPLANE_CHUNK_SIZE_BYTES")?.unwrap_or(chunk_threshold);

        Ok(Self {
            chunk_threshold,
            chunk_size,
        })
    }
}

fn parse_size(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.parse::<usize>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue { var, value }),
            Ok(size) => Ok(Some(size)),
        },
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unusable value.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}
