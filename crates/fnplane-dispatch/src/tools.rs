// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent tool handlers.
//!
//! A [`ToolDefinition`] names how a tool is implemented. This module turns
//! each definition into a [`ToolHandler`]:
//!
//! | Implementation | Handler |
//! |----------------|---------|
//! | `builtin` | entry of the builtin table, or a structured "not available" answer |
//! | `api` | HTTP request with the arguments as JSON body |
//! | `inline` | always rejected; the code is never evaluated |
//! | `function` | recursive dispatch of a deployed function |
//! | anything else | no handler; the tool is not offered to the model |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use fnplane_store::metadata::{ToolDefinition, ToolImplementation};
use reqwest::Method;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::ToolSpec;
use crate::error::ToolError;
use crate::result::{DispatchResult, strip_meta};

/// Per-call context passed to a handler.
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    /// Fires when the surrounding dispatch is abandoned.
    pub cancel: CancellationToken,
    /// Depth of the dispatch making the call.
    pub depth: usize,
}

/// Tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the model-supplied arguments.
    async fn call(&self, args: Value, ctx: ToolCallContext) -> Result<Value, ToolError>;
}

/// Dispatches a deployed function on behalf of a `function` tool.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Resolve and dispatch `function_id` one level deeper than `ctx.depth`.
    async fn invoke_function(
        &self,
        function_id: &str,
        input: Value,
        ctx: ToolCallContext,
    ) -> DispatchResult;
}

/// Builtin tools by name.
pub type BuiltinTools = HashMap<String, Arc<dyn ToolHandler>>;

/// Shared resources for building handlers.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Builtin tools wired into this process.
    pub builtins: Arc<BuiltinTools>,
    /// Client used by `api` tools.
    pub http: reqwest::Client,
    /// Dispatcher handle used by `function` tools.
    pub functions: Option<Arc<dyn FunctionInvoker>>,
}

/// Build the handler for one tool definition.
///
/// Returns `None` for implementations that cannot be offered to a model.
pub fn create_tool_handler(
    definition: &ToolDefinition,
    ctx: &ToolContext,
) -> Option<Arc<dyn ToolHandler>> {
    match &definition.implementation {
        ToolImplementation::Builtin { name } => Some(match ctx.builtins.get(name) {
            Some(handler) => handler.clone(),
            None => Arc::new(UnavailableBuiltin { name: name.clone() }),
        }),
        ToolImplementation::Api {
            endpoint,
            method,
            headers,
        } => {
            let method = match method.as_deref() {
                None => Method::POST,
                Some(m) => match Method::from_bytes(m.to_ascii_uppercase().as_bytes()) {
                    Ok(method) => method,
                    Err(_) => {
                        warn!(tool = %definition.name, method = %m, "Invalid HTTP method, tool omitted");
                        return None;
                    }
                },
            };
            Some(Arc::new(ApiTool {
                client: ctx.http.clone(),
                endpoint: endpoint.clone(),
                method,
                headers: headers.clone(),
            }))
        }
        ToolImplementation::Inline { .. } => {
            warn!(tool = %definition.name, "Inline tool will reject every call");
            Some(Arc::new(InlineTool {
                name: definition.name.clone(),
            }))
        }
        ToolImplementation::Function { function_id } => match &ctx.functions {
            Some(invoker) => Some(Arc::new(FunctionTool {
                function_id: function_id.clone(),
                invoker: invoker.clone(),
            })),
            None => {
                warn!(tool = %definition.name, "No dispatcher for function tools, tool omitted");
                None
            }
        },
        ToolImplementation::Unknown => {
            debug!(tool = %definition.name, "Unknown tool implementation, tool omitted");
            None
        }
    }
}

/// Model-facing description of a tool.
pub fn tool_spec(definition: &ToolDefinition) -> ToolSpec {
    ToolSpec {
        name: definition.name.clone(),
        description: definition.description.clone(),
        input_schema: definition.input_schema.clone(),
    }
}

struct UnavailableBuiltin {
    name: String,
}

#[async_trait]
impl ToolHandler for UnavailableBuiltin {
    async fn call(&self, _args: Value, _ctx: ToolCallContext) -> Result<Value, ToolError> {
        Ok(json!({
            "error": format!("Builtin tool '{}' is not available", self.name),
            "available": false,
        }))
    }
}

struct ApiTool {
    client: reqwest::Client,
    endpoint: String,
    method: Method,
    headers: BTreeMap<String, String>,
}

#[async_trait]
impl ToolHandler for ApiTool {
    async fn call(&self, args: Value, ctx: ToolCallContext) -> Result<Value, ToolError> {
        let mut request = self.client.request(self.method.clone(), &self.endpoint);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if !matches!(self.method, Method::GET | Method::HEAD) {
            request = request.json(&args);
        }

        let send = async {
            let response = request
                .send()
                .await
                .map_err(|e| ToolError::Request(format!("{} {}: {}", self.method, self.endpoint, e)))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| ToolError::Request(format!("Failed to read response body: {}", e)))?;

            if !status.is_success() {
                return Err(ToolError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            Ok(serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "text": text })))
        };

        tokio::select! {
            result = send => result,
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
        }
    }
}

struct InlineTool {
    name: String,
}

#[async_trait]
impl ToolHandler for InlineTool {
    async fn call(&self, _args: Value, _ctx: ToolCallContext) -> Result<Value, ToolError> {
        Err(ToolError::SecurityPolicy(format!(
            "inline tool '{}' was not run: evaluating caller-supplied code is not permitted. \
             Deploy the code as a function and reference it with a 'function' tool instead",
            self.name
        )))
    }
}

struct FunctionTool {
    function_id: String,
    invoker: Arc<dyn FunctionInvoker>,
}

#[async_trait]
impl ToolHandler for FunctionTool {
    async fn call(&self, args: Value, ctx: ToolCallContext) -> Result<Value, ToolError> {
        let result = self
            .invoker
            .invoke_function(&self.function_id, args, ctx)
            .await;

        if result.is_success() {
            return Ok(strip_meta(result.body));
        }

        if result.status == 404 {
            return Err(ToolError::NotFound(self.function_id.clone()));
        }
        let message = result
            .error_message()
            .unwrap_or("function returned an error")
            .to_string();
        Err(ToolError::Failed {
            function_id: self.function_id.clone(),
            status: result.status,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(implementation: ToolImplementation) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            description: "test tool".into(),
            input_schema: json!({"type": "object"}),
            implementation,
        }
    }

    #[tokio::test]
    async fn test_unwired_builtin_answers_unavailable() {
        let handler = create_tool_handler(
            &definition(ToolImplementation::Builtin {
                name: "web_search".into(),
            }),
            &ToolContext::default(),
        )
        .unwrap();

        let value = handler
            .call(json!({}), ToolCallContext::default())
            .await
            .unwrap();
        assert_eq!(value["available"], false);
        assert!(value["error"].as_str().unwrap().contains("web_search"));
    }

    #[tokio::test]
    async fn test_unknown_and_unwired_function_tools_are_omitted() {
        let ctx = ToolContext::default();
        assert!(create_tool_handler(&definition(ToolImplementation::Unknown), &ctx).is_none());
        assert!(
            create_tool_handler(
                &definition(ToolImplementation::Function {
                    function_id: "f".into()
                }),
                &ctx
            )
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_inline_is_rejected() {
        let handler = create_tool_handler(
            &definition(ToolImplementation::Inline {
                code: "return 1".into(),
            }),
            &ToolContext::default(),
        )
        .unwrap();

        let err = handler
            .call(json!({}), ToolCallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityPolicy(_)));
        assert!(err.to_string().contains("function"));
    }

    #[test]
    fn test_invalid_method_is_omitted() {
        let def = definition(ToolImplementation::Api {
            endpoint: "http://localhost".into(),
            method: Some("NOT A METHOD".into()),
            headers: BTreeMap::new(),
        });
        assert!(create_tool_handler(&def, &ToolContext::default()).is_none());
    }
}
