// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tier 2: single AI completion.
//!
//! The `userPrompt` template is rendered against the input with
//! `minijinja` (`{{field}}`, `{{order.id}}`; undefined values render
//! empty). When an `outputSchema` is declared the prompt asks for JSON
//! matching it and the response must contain every `required` field.

use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Value, json};

use super::{ExecutionContext, TierExecutor, TierOutput, parse_json_object};
use crate::backend::{CompletionClient, CompletionRequest};
use crate::error::DispatchError;
use crate::result::{ExecutionRecord, GenerativeExecution};
use crate::tier::Tier;

/// Output bound for every completion.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Calls the configured completion backend once per dispatch.
pub struct GenerativeExecutor {
    client: Option<Arc<dyn CompletionClient>>,
    max_tokens: u32,
}

impl GenerativeExecutor {
    /// Create an executor; `None` answers every call with 503.
    pub fn new(client: Option<Arc<dyn CompletionClient>>) -> Self {
        Self {
            client,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Render a prompt template against the invocation input.
///
/// Object inputs expose their fields at top level; any input is also
/// available as `input`.
pub fn render_prompt(template: &str, input: &Value) -> Result<String, DispatchError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env.add_template("prompt", template)
        .map_err(|e| DispatchError::InvalidInput(format!("Prompt template parse error: {}", e)))?;

    let tmpl = env
        .get_template("prompt")
        .map_err(|e| DispatchError::InvalidInput(format!("Failed to load prompt template: {}", e)))?;

    let mut context = match input {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    context
        .entry("input")
        .or_insert_with(|| input.clone());

    tmpl.render(Value::Object(context))
        .map_err(|e| DispatchError::InvalidInput(format!("Prompt template render error: {}", e)))
}

fn schema_instruction(schema: &Value) -> String {
    let rendered = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "\n\nRespond only with a JSON object matching this schema:\n{}",
        rendered
    )
}

fn check_required(
    output: &serde_json::Map<String, Value>,
    schema: &Value,
) -> Result<(), DispatchError> {
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);

    for field in required {
        if !output.contains_key(field) {
            return Err(DispatchError::ExecutionFailed(format!(
                "Generated output is missing required field '{}'",
                field
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl TierExecutor for GenerativeExecutor {
    fn tier(&self) -> Tier {
        Tier::Generative
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<TierOutput, DispatchError> {
        let client = self.client.as_ref().ok_or_else(|| {
            DispatchError::Unavailable(
                "Generative execution not available: no client implementing create_message is configured"
                    .into(),
            )
        })?;

        let metadata = &ctx.metadata;
        let model = metadata.model.clone().ok_or_else(|| {
            DispatchError::InvalidInput(format!(
                "Generative function {} does not declare a model",
                metadata.id
            ))
        })?;
        let template = metadata.user_prompt.as_deref().ok_or_else(|| {
            DispatchError::InvalidInput(format!(
                "Generative function {} does not declare a userPrompt",
                metadata.id
            ))
        })?;

        let mut prompt = render_prompt(template, &ctx.input)?;
        if let Some(schema) = &metadata.output_schema {
            prompt.push_str(&schema_instruction(schema));
        }

        let response = client
            .create_message(CompletionRequest {
                model: model.clone(),
                prompt,
                max_tokens: self.max_tokens,
                cancel: ctx.cancel.clone(),
            })
            .await
            .map_err(|e| DispatchError::ExecutionFailed(e.to_string()))?;

        let body = match (&metadata.output_schema, parse_json_object(&response.content)) {
            (Some(schema), Some(output)) => {
                check_required(&output, schema)?;
                Value::Object(output)
            }
            (Some(_), None) => {
                return Err(DispatchError::ExecutionFailed(
                    "Generated output is not valid JSON".into(),
                ));
            }
            (None, Some(output)) => Value::Object(output),
            (None, None) => json!({ "text": response.content }),
        };

        Ok(TierOutput {
            status: 200,
            body,
            record: ExecutionRecord::Generative(GenerativeExecution {
                model,
                tokens: response.usage,
            }),
        })
    }
}
