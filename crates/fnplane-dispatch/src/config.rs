// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fnplane-dispatch.

use std::time::Duration;

use crate::tier::TierTimeouts;

/// Default SQLite database used by the CLI.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:.data/fnplane.db?mode=rwc";

/// Dispatcher configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Deadline per tier.
    pub timeouts: TierTimeouts,
    /// Maximum nesting of cascades and function tools.
    pub max_cascade_depth: usize,
    /// Lifetime of an in-flight deduplication entry.
    pub dedup_ttl: Duration,
    /// Agent loop bound when metadata omits `maxIterations`.
    pub default_max_iterations: u32,
    /// Content store database URL.
    pub database_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeouts: TierTimeouts::default(),
            max_cascade_depth: 4,
            dedup_ttl: Duration::from_millis(1000),
            default_max_iterations: 10,
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults. Tier timeouts must strictly
    /// increase from tier 1 to tier 4.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeouts = TierTimeouts {
            code: env_millis("FNPLANE_CODE_TIMEOUT_MS")?.unwrap_or(defaults.timeouts.code),
            generative: env_millis("FNPLANE_GENERATIVE_TIMEOUT_MS")?
                .unwrap_or(defaults.timeouts.generative),
            agentic: env_millis("FNPLANE_AGENTIC_TIMEOUT_MS")?
                .unwrap_or(defaults.timeouts.agentic),
            human: env_millis("FNPLANE_HUMAN_TIMEOUT_MS")?.unwrap_or(defaults.timeouts.human),
        };
        timeouts.validate()?;

        let max_cascade_depth = env_number::<usize>("FNPLANE_MAX_CASCADE_DEPTH")?
            .unwrap_or(defaults.max_cascade_depth);
        let dedup_ttl = env_millis("FNPLANE_DEDUP_TTL_MS")?.unwrap_or(defaults.dedup_ttl);
        let default_max_iterations = env_number::<u32>("FNPLANE_DEFAULT_MAX_ITERATIONS")?
            .unwrap_or(defaults.default_max_iterations);

        let database_url =
            std::env::var("FNPLANE_DATABASE_URL").unwrap_or(defaults.database_url);

        Ok(Self {
            timeouts,
            max_cascade_depth,
            dedup_ttl,
            default_max_iterations,
            database_url,
        })
    }
}

fn env_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

fn env_millis(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env_number::<u64>(var)? {
        Some(0) => Err(ConfigError::InvalidValue {
            var,
            value: "0".to_string(),
        }),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
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
    /// Tier timeouts are not strictly increasing.
    #[error("Invalid tier timeouts: {0}")]
    TimeoutOrder(String),
}
