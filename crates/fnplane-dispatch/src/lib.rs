// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fnplane Dispatch - Tiered Function Execution
//!
//! This crate routes deployed functions to one of four execution tiers,
//! enforces per-tier deadlines, and chains functions into cascades. It is
//! the runtime half of the fnplane control plane; metadata and code live in
//! `fnplane-store`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 FunctionTarget (invoke by id, dedup)                │
//! └─────────────────────────────────┬───────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Dispatcher                               │
//! │    tier selection · deadlines · cascades · depth bound              │
//! │  ┌──────────┐  ┌──────────────┐  ┌───────────┐  ┌──────────┐        │
//! │  │  Code    │  │  Generative  │  │  Agentic  │  │  Human   │        │
//! │  │ (tier 1) │  │   (tier 2)   │  │ (tier 3)  │  │ (tier 4) │        │
//! │  └────┬─────┘  └──────┬───────┘  └─────┬─────┘  └────┬─────┘        │
//! └───────┼───────────────┼────────────────┼─────────────┼──────────────┘
//!         ▼               ▼                ▼             ▼
//!      Sandbox    CompletionClient    ChatClient     TaskQueue
//!                                      + tools
//! ```
//!
//! # Tiers
//!
//! | Tier | Type | Default deadline | Backend |
//! |------|------|------------------|---------|
//! | 1 | `code` | 5 s | [`Sandbox`](backend::Sandbox) |
//! | 2 | `generative` | 30 s | [`CompletionClient`](backend::CompletionClient) |
//! | 3 | `agentic` | 5 min | [`ChatClient`](backend::ChatClient) |
//! | 4 | `human` | 24 h | [`TaskQueue`](backend::TaskQueue) |
//!
//! A missing backend makes its tier answer 503; the other tiers keep
//! working.
//!
//! # Results
//!
//! Dispatch never fails. Every outcome is a [`DispatchResult`] with an
//! HTTP-like status, a body and [`DispatchMeta`]. Successful object bodies
//! also carry the tier record under `_meta`.
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 200 | Success |
//! | 202 | Human task created |
//! | 400 | Unusable metadata or input |
//! | 403 | Rejected by a security rule |
//! | 404 | Function, version or code not found |
//! | 408 | Tier deadline elapsed |
//! | 500 | Execution failed |
//! | 501 | Unknown function type |
//! | 503 | Backend not configured |
//!
//! # Configuration
//!
//! [`DispatchConfig::from_env`] reads:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FNPLANE_CODE_TIMEOUT_MS` | 5000 |
//! | `FNPLANE_GENERATIVE_TIMEOUT_MS` | 30000 |
//! | `FNPLANE_AGENTIC_TIMEOUT_MS` | 300000 |
//! | `FNPLANE_HUMAN_TIMEOUT_MS` | 86400000 |
//! | `FNPLANE_MAX_CASCADE_DEPTH` | 4 |
//! | `FNPLANE_DEDUP_TTL_MS` | 1000 |
//! | `FNPLANE_DEFAULT_MAX_ITERATIONS` | 10 |
//! | `FNPLANE_DATABASE_URL` | `sqlite:.data/fnplane.db?mode=rwc` |

#![deny(missing_docs)]

/// Backend interfaces (sandbox, AI, task queue) and their implementations.
pub mod backend;

/// Dispatcher configuration loaded from environment variables.
pub mod config;

/// Tiered dispatcher and cascade runner.
pub mod dispatcher;

/// Error types for dispatch, backends and tools.
pub mod error;

/// One executor per tier.
pub mod executors;

/// Deduplication of identical concurrent calls.
pub mod inflight;

/// Dispatch results and execution records.
pub mod result;

/// Invoke-by-id entry point.
pub mod target;

/// Execution tiers and deadlines.
pub mod tier;

/// Agent tool handlers.
pub mod tools;

pub use config::{ConfigError, DispatchConfig};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{BackendError, DispatchError, ToolError};
pub use inflight::InFlightMap;
pub use result::{DispatchMeta, DispatchResult, ExecutionRecord};
pub use target::FunctionTarget;
pub use tier::{Tier, TierTimeouts};
