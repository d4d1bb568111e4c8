// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend interfaces.
//!
//! The dispatcher reaches every external collaborator through one of these
//! traits: a code sandbox, an AI completion endpoint, an AI chat endpoint
//! with tool calling, and a human task queue. Backends are pure execution
//! engines; they do not touch the registry or code storage.
//!
//! Every request carries a [`CancellationToken`]. Cancellation is
//! best-effort: a backend should stop work when the token fires, but the
//! dispatcher never waits for it to do so.

pub mod mock;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnplane_store::metadata::HumanSla;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use crate::error::BackendError;

/// Result type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

// ============================================================================
// Sandbox
// ============================================================================

/// Request to run compiled code.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Compiled body.
    pub code: Vec<u8>,
    /// Source language.
    pub language: String,
    /// Exported handler name, if any.
    pub entry_point: Option<String>,
    /// Invocation input.
    pub input: Value,
    /// Deadline the sandbox should enforce itself.
    pub timeout: Duration,
    /// Fires when the dispatcher gives up on the call.
    pub cancel: CancellationToken,
}

/// Outcome of a sandbox run.
///
/// Guest failures are reported here with `success = false`; only
/// infrastructure failures are returned as errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxOutcome {
    /// Whether the guest returned normally.
    pub success: bool,
    /// Value returned by the guest.
    pub value: Option<Value>,
    /// Error raised by the guest.
    pub error: Option<String>,
    /// Log lines written by the guest.
    pub logs: Vec<String>,
    /// CPU time consumed.
    pub cpu_time_ms: u64,
}

impl SandboxOutcome {
    /// Successful outcome.
    pub fn ok(value: Value) -> Self {
        Self {
            success: true,
            value: Some(value),
            ..Default::default()
        }
    }

    /// Failed outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Code sandbox.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Sandbox type identifier (e.g., "process", "mock").
    fn sandbox_type(&self) -> &'static str;

    /// Run code to completion.
    async fn run(&self, request: SandboxRequest) -> Result<SandboxOutcome>;
}

// ============================================================================
// AI completion and chat
// ============================================================================

/// Token usage of one AI call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its turn.
    #[default]
    EndTurn,
    /// The model wants tool results.
    ToolUse,
    /// Output was truncated.
    MaxTokens,
}

/// Single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Full prompt.
    pub prompt: String,
    /// Output bound.
    pub max_tokens: u32,
    /// Fires when the dispatcher gives up on the call.
    pub cancel: CancellationToken,
}

/// Single completion response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResponse {
    /// Generated text.
    pub content: String,
    /// Token usage.
    pub usage: TokenUsage,
    /// Stop reason.
    pub stop_reason: StopReason,
}

/// AI completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate one message.
    async fn create_message(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

/// Tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

/// Tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Call id, echoed in the result message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments.
    pub arguments: Value,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Caller.
    User,
    /// Model.
    Assistant,
    /// Tool result.
    Tool,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author.
    pub role: ChatRole,
    /// Text content.
    pub content: String,
    /// Tool calls made by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call answered by a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message, possibly with tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Tools offered to the model.
    pub tools: Vec<ToolSpec>,
    /// Fires when the dispatcher gives up on the call.
    pub cancel: CancellationToken,
}

/// Chat response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    /// Text content.
    pub content: String,
    /// Requested tool calls.
    pub tool_calls: Vec<ToolCall>,
    /// Stop reason.
    pub stop_reason: StopReason,
    /// Token usage.
    pub usage: TokenUsage,
}

/// AI chat endpoint with tool calling.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Produce the next assistant turn.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

// ============================================================================
// Human task queue
// ============================================================================

/// Task to create for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Function that created the task.
    pub function_id: String,
    /// Version of that function.
    pub version: String,
    /// Kind of interaction (e.g., "approval").
    pub interaction_type: String,
    /// UI description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
    /// Invocation input shown to the human.
    pub input: Value,
    /// Users or groups to assign.
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Service-level targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<HumanSla>,
    /// When the task expires.
    pub expires_at: DateTime<Utc>,
}

/// Created task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Task id.
    pub id: String,
    /// Task status (e.g., "pending").
    pub status: String,
    /// Where a human can act on the task.
    pub task_url: String,
    /// When the task expires.
    pub expires_at: DateTime<Utc>,
}

/// Human task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Create a task.
    async fn create_task(&self, spec: TaskSpec) -> Result<TaskRecord>;
}
