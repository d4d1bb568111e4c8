// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fnplane Store - Function Metadata and Code Storage
//!
//! This crate provides the persistent half of the fnplane control plane:
//! versioned function metadata with deployment history, and compiled code
//! blobs with source maps and chunking. Both are layered on a plain
//! key/value [`ContentStore`](content::ContentStore).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │      FunctionRegistry        │   │         CodeStorage          │
//! │  current pointer, versions,  │   │  slots, source maps, chunks, │
//! │  deployment history          │   │  fallback resolution         │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                │                                  │
//!                ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ContentStore (trait)                        │
//! │        MemoryContentStore  │  SqliteContentStore                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Layout
//!
//! | Key | Owner | Contents |
//! |-----|-------|----------|
//! | `functions/{id}/current` | Registry | current metadata |
//! | `functions/{id}/versions/{version}` | Registry | metadata snapshot |
//! | `functions/{id}/history/{stamp}-{uuid}` | Registry | one deployment record |
//! | `code/{id}/slots/{slot}` | CodeStorage | code bytes |
//! | `code/{id}/maps/{slot}` | CodeStorage | source map |
//! | `code/{id}/chunks/{slot}/meta` | CodeStorage | chunk metadata |
//! | `code/{id}/chunks/{slot}/{index}` | CodeStorage | chunk bytes |
//!
//! The content store offers no cross-key transactions. A deploy that
//! updates metadata and a put that updates code are independent writes.
//!
//! # Function State Machine
//!
//! ```text
//!   ┌────────┐  deploy(v1)  ┌──────────────┐  deploy(v2)  ┌──────────────┐
//!   │ ABSENT │─────────────►│ DEPLOYED(v1) │─────────────►│ DEPLOYED(v2) │
//!   └────────┘              └──────────────┘◄─────────────└──────────────┘
//!       ▲                                    rollback(v1)         │
//!       │                         delete                          │
//!       └─────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

/// Key/value content store abstraction and backends.
pub mod content;

/// Compiled code storage with source maps and chunking.
pub mod code_storage;

/// Storage configuration loaded from environment variables.
pub mod config;

/// Error types for store operations.
pub mod error;

/// Function metadata and deployment records.
pub mod metadata;

/// Versioned function registry.
pub mod registry;

/// Identifier and version validation.
pub mod validation;

/// Semantic version parsing and ordering.
pub mod version;

pub use code_storage::{
    ChunkMetadata, CodeStorage, FallbackChain, PageRequest, ResolvedCode, VersionPage,
};
pub use config::CodeStorageConfig;
pub use content::{ContentStore, MemoryContentStore, SqliteContentStore};
pub use error::{Result, StoreError};
pub use metadata::{DeploymentAction, DeploymentRecord, FunctionMetadata, FunctionType};
pub use registry::FunctionRegistry;
pub use version::Version;
