// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tier 3: agent loop with tool calling.
//!
//! Each iteration sends the conversation to the chat backend. Requested
//! tool calls run one after another and their results are appended as
//! tool-result messages. The loop ends when the model finishes its turn,
//! asks for no tools, or the iteration bound is reached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fnplane_store::FunctionMetadata;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExecutionContext, TierExecutor, TierOutput, parse_json_object};
use crate::backend::{ChatClient, ChatMessage, ChatRequest, StopReason, ToolCall, ToolSpec};
use crate::error::DispatchError;
use crate::result::{AgenticExecution, ExecutionRecord};
use crate::tier::Tier;
use crate::tools::{ToolCallContext, ToolContext, ToolHandler, create_tool_handler, tool_spec};

/// Tool table and model settings for one function version.
pub struct AgentRuntime {
    /// Function id.
    pub function_id: String,
    /// Version the runtime was built from.
    pub version: String,
    /// Model identifier.
    pub model: String,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Goal prepended to the input.
    pub goal: Option<String>,
    /// Tools offered to the model.
    pub specs: Vec<ToolSpec>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    /// Loop bound.
    pub max_iterations: u32,
}

impl AgentRuntime {
    /// Build a runtime from metadata. Tools without a handler are dropped.
    pub fn build(
        metadata: &FunctionMetadata,
        tools: &ToolContext,
        default_max_iterations: u32,
    ) -> Result<Self, DispatchError> {
        let model = metadata.model.clone().ok_or_else(|| {
            DispatchError::InvalidInput(format!(
                "Agentic function {} does not declare a model",
                metadata.id
            ))
        })?;

        let mut specs = Vec::new();
        let mut handlers = HashMap::new();
        for definition in &metadata.tools {
            if let Some(handler) = create_tool_handler(definition, tools) {
                specs.push(tool_spec(definition));
                handlers.insert(definition.name.clone(), handler);
            }
        }

        Ok(Self {
            function_id: metadata.id.clone(),
            version: metadata.version.clone(),
            model,
            system_prompt: metadata.system_prompt.clone(),
            goal: metadata.goal.clone(),
            specs,
            handlers,
            max_iterations: metadata
                .max_iterations
                .unwrap_or(default_max_iterations)
                .max(1),
        })
    }

    /// Names of the tools offered to the model.
    pub fn tool_names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    async fn run_tool(&self, call: &ToolCall, ctx: &ToolCallContext) -> Value {
        let Some(handler) = self.handlers.get(&call.name) else {
            warn!(function_id = %self.function_id, tool = %call.name, "Model requested unknown tool");
            return json!({ "error": format!("Unknown tool '{}'", call.name) });
        };

        match handler.call(call.arguments.clone(), ctx.clone()).await {
            Ok(value) => value,
            Err(e) => {
                debug!(function_id = %self.function_id, tool = %call.name, error = %e, "Tool call failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// Runs the agent loop against the configured chat backend.
pub struct AgenticExecutor {
    client: Option<Arc<dyn ChatClient>>,
    tools: ToolContext,
    default_max_iterations: u32,
    runtimes: Mutex<HashMap<String, Arc<AgentRuntime>>>,
}

impl AgenticExecutor {
    /// Create an executor; `None` answers every call with 503.
    pub fn new(
        client: Option<Arc<dyn ChatClient>>,
        tools: ToolContext,
        default_max_iterations: u32,
    ) -> Self {
        Self {
            client,
            tools,
            default_max_iterations,
            runtimes: Mutex::new(HashMap::new()),
        }
    }

    /// Version of the cached runtime for `function_id`, if any.
    pub async fn cached_version(&self, function_id: &str) -> Option<String> {
        self.runtimes
            .lock()
            .await
            .get(function_id)
            .map(|runtime| runtime.version.clone())
    }

    async fn runtime(&self, metadata: &FunctionMetadata) -> Result<Arc<AgentRuntime>, DispatchError> {
        let mut runtimes = self.runtimes.lock().await;
        if let Some(runtime) = runtimes.get(&metadata.id)
            && runtime.version == metadata.version
        {
            return Ok(runtime.clone());
        }

        let runtime = Arc::new(AgentRuntime::build(
            metadata,
            &self.tools,
            self.default_max_iterations,
        )?);
        debug!(
            function_id = %metadata.id,
            version = %metadata.version,
            tools = ?runtime.tool_names(),
            "Built agent runtime"
        );
        runtimes.insert(metadata.id.clone(), runtime.clone());
        Ok(runtime)
    }
}

fn opening_message(goal: Option<&str>, input: &Value) -> String {
    let rendered = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    match goal {
        Some(goal) => format!("{}\n\nInput:\n{}", goal, rendered),
        None => format!("Input:\n{}", rendered),
    }
}

#[async_trait]
impl TierExecutor for AgenticExecutor {
    fn tier(&self) -> Tier {
        Tier::Agentic
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<TierOutput, DispatchError> {
        let client = self.client.as_ref().ok_or_else(|| {
            DispatchError::Unavailable(
                "Agentic execution not available: no client implementing chat is configured".into(),
            )
        })?;

        let runtime = self.runtime(&ctx.metadata).await?;
        let tool_ctx = ToolCallContext {
            cancel: ctx.cancel.clone(),
            depth: ctx.depth,
        };

        let mut messages = vec![ChatMessage::user(opening_message(
            runtime.goal.as_deref(),
            &ctx.input,
        ))];
        let mut iterations = 0u32;
        let mut total_tokens = 0u64;
        let mut tools_used: Vec<String> = Vec::new();
        let mut final_content = String::new();

        while iterations < runtime.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Err(DispatchError::ExecutionFailed("Agent run cancelled".into()));
            }

            let response = client
                .chat(ChatRequest {
                    model: runtime.model.clone(),
                    system_prompt: runtime.system_prompt.clone(),
                    messages: messages.clone(),
                    tools: runtime.specs.clone(),
                    cancel: ctx.cancel.clone(),
                })
                .await
                .map_err(|e| DispatchError::ExecutionFailed(e.to_string()))?;

            iterations += 1;
            total_tokens += response.usage.total();
            final_content = response.content.clone();

            if response.stop_reason == StopReason::EndTurn || response.tool_calls.is_empty() {
                break;
            }

            messages.push(ChatMessage::assistant(
                response.content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                if runtime.handlers.contains_key(&call.name) && !tools_used.contains(&call.name) {
                    tools_used.push(call.name.clone());
                }
                let result = runtime.run_tool(call, &tool_ctx).await;
                messages.push(ChatMessage::tool_result(&call.id, result.to_string()));
            }
        }

        if iterations >= runtime.max_iterations {
            debug!(
                function_id = %runtime.function_id,
                iterations,
                "Agent stopped at iteration bound"
            );
        }

        info!(
            function_id = %runtime.function_id,
            iterations,
            total_tokens,
            tools = ?tools_used,
            "Agent run finished"
        );

        let body = match parse_json_object(&final_content) {
            Some(output) => Value::Object(output),
            None => json!({ "output": final_content }),
        };

        Ok(TierOutput {
            status: 200,
            body,
            record: ExecutionRecord::Agentic(AgenticExecution {
                model: runtime.model.clone(),
                iterations,
                tools_used,
                total_tokens,
            }),
        })
    }
}
