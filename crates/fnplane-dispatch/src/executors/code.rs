// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tier 1: sandboxed code.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ExecutionContext, TierExecutor, TierOutput};
use crate::backend::{BackendError, Sandbox, SandboxRequest};
use crate::error::DispatchError;
use crate::result::{CodeExecution, ExecutionRecord};
use crate::tier::Tier;

/// Language assumed when metadata omits it.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Runs compiled code in the configured sandbox.
pub struct CodeExecutor {
    sandbox: Option<Arc<dyn Sandbox>>,
}

impl CodeExecutor {
    /// Create an executor; `None` answers every call with 503.
    pub fn new(sandbox: Option<Arc<dyn Sandbox>>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl TierExecutor for CodeExecutor {
    fn tier(&self) -> Tier {
        Tier::Code
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<TierOutput, DispatchError> {
        let sandbox = self
            .sandbox
            .as_ref()
            .ok_or_else(|| DispatchError::Unavailable("Code execution not available".into()))?;

        let code = match ctx.code {
            Some(code) if !code.is_empty() => code,
            _ => return Err(DispatchError::NotFound("Function code not found".into())),
        };

        let language = ctx
            .metadata
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let outcome = sandbox
            .run(SandboxRequest {
                code,
                language: language.clone(),
                entry_point: ctx.metadata.entry_point.clone(),
                input: ctx.input,
                timeout: ctx.timeout,
                cancel: ctx.cancel,
            })
            .await
            .map_err(|e| match e {
                BackendError::Unavailable(msg) => DispatchError::Unavailable(msg),
                other => DispatchError::ExecutionFailed(other.to_string()),
            })?;

        for line in &outcome.logs {
            debug!(function_id = %ctx.metadata.id, log = %line, "Function log");
        }

        if !outcome.success {
            return Err(DispatchError::ExecutionFailed(
                outcome
                    .error
                    .unwrap_or_else(|| "Function execution failed".to_string()),
            ));
        }

        Ok(TierOutput {
            status: 200,
            body: outcome.value.unwrap_or(serde_json::Value::Null),
            record: ExecutionRecord::Code(CodeExecution {
                language,
                cpu_time_ms: outcome.cpu_time_ms,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockSandbox;
    use fnplane_store::FunctionMetadata;
    use serde_json::json;
    use std::time::Duration;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            FunctionMetadata::code("adder", "1.0.0", "javascript"),
            json!({"a": 3, "b": 7}),
            Duration::from_secs(1),
        )
    }

    fn adder() -> Arc<dyn Sandbox> {
        Arc::new(MockSandbox::new().with_handler("add", |input| {
            let a = input["a"].as_i64().ok_or("a must be a number")?;
            let b = input["b"].as_i64().ok_or("b must be a number")?;
            Ok(json!({"sum": a + b}))
        }))
    }

    #[tokio::test]
    async fn test_runs_code() {
        let executor = CodeExecutor::new(Some(adder()));
        let output = executor.execute(ctx().with_code("add")).await.unwrap();

        assert_eq!(output.status, 200);
        assert_eq!(output.body, json!({"sum": 10}));
        assert!(matches!(
            output.record,
            ExecutionRecord::Code(CodeExecution { ref language, .. }) if language == "javascript"
        ));
    }

    #[tokio::test]
    async fn test_missing_sandbox_is_unavailable() {
        let executor = CodeExecutor::new(None);
        let err = executor.execute(ctx().with_code("add")).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::Unavailable("Code execution not available".into())
        );
    }

    #[tokio::test]
    async fn test_missing_or_empty_code_is_not_found() {
        let executor = CodeExecutor::new(Some(adder()));

        let err = executor.execute(ctx()).await.unwrap_err();
        assert_eq!(err, DispatchError::NotFound("Function code not found".into()));

        let err = executor
            .execute(ctx().with_code(Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn test_guest_error_is_execution_failure() {
        let executor = CodeExecutor::new(Some(adder()));
        let mut ctx = ctx().with_code("add");
        ctx.input = json!({"a": "x"});

        let err = executor.execute(ctx).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::ExecutionFailed("a must be a number".into())
        );
    }
}
