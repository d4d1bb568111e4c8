// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tier executors.
//!
//! One executor per tier. An executor turns a function's metadata and
//! input into a status, a body and an execution record; it never enforces
//! the tier deadline itself (the dispatcher does) but should stop work when
//! the context's cancellation token fires.

pub mod agentic;
pub mod code;
pub mod generative;
pub mod human;

use std::time::Duration;

use async_trait::async_trait;
use fnplane_store::FunctionMetadata;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::result::ExecutionRecord;
use crate::tier::Tier;

pub use agentic::{AgentRuntime, AgenticExecutor};
pub use code::CodeExecutor;
pub use generative::GenerativeExecutor;
pub use human::HumanExecutor;

/// Everything an executor needs for one call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Function being executed.
    pub metadata: FunctionMetadata,
    /// Invocation input.
    pub input: Value,
    /// Compiled body (code tier only).
    pub code: Option<Vec<u8>>,
    /// Fires when the dispatcher gives up on the call.
    pub cancel: CancellationToken,
    /// Nesting depth (0 for a top-level dispatch).
    pub depth: usize,
    /// Deadline the dispatcher enforces.
    pub timeout: Duration,
}

impl ExecutionContext {
    /// Context for a top-level call with a fresh token.
    pub fn new(metadata: FunctionMetadata, input: Value, timeout: Duration) -> Self {
        Self {
            metadata,
            input,
            code: None,
            cancel: CancellationToken::new(),
            depth: 0,
            timeout,
        }
    }

    /// Attach compiled code.
    pub fn with_code(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Successful executor output.
#[derive(Debug, Clone, PartialEq)]
pub struct TierOutput {
    /// Status (200, or 202 for human tasks).
    pub status: u16,
    /// Body without `_meta`.
    pub body: Value,
    /// Tier record.
    pub record: ExecutionRecord,
}

/// Executor for one tier.
#[async_trait]
pub trait TierExecutor: Send + Sync {
    /// Tier served.
    fn tier(&self) -> Tier;

    /// Execute one call.
    async fn execute(&self, ctx: ExecutionContext) -> Result<TierOutput, DispatchError>;
}

/// Parse model output as a JSON object.
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or text with one
/// embedded object (first `{` to last `}`).
pub(crate) fn parse_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let trimmed = strip_code_fence(text.trim());

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
