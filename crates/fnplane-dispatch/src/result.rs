// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch results and per-tier execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::TokenUsage;
use crate::error::DispatchError;

/// Key under which successful object bodies carry their execution record.
pub const META_KEY: &str = "_meta";

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    /// HTTP-style status.
    pub status: u16,
    /// Response body.
    pub body: Value,
    /// Execution metadata.
    pub meta: DispatchMeta,
}

impl DispatchResult {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Render an error into a result.
    pub fn from_error(err: &DispatchError, meta: DispatchMeta) -> Self {
        Self {
            status: err.status(),
            body: err.to_body(),
            meta,
        }
    }

    /// Error message of a failed result, if the body carries one.
    pub fn error_message(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

/// Metadata attached to every dispatch result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMeta {
    /// `code`, `generative`, `agentic`, `human`, `cascade` or `unknown`.
    pub executor_type: String,
    /// Tier number; for cascades the tier of the last attempted step.
    pub tier: u8,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Tier 1 record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<CodeExecution>,
    /// Tier 2 record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generative_execution: Option<GenerativeExecution>,
    /// Tier 3 record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agentic_execution: Option<AgenticExecution>,
    /// Tier 4 record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_execution: Option<HumanExecution>,
    /// Distinct tier names attempted by a cascade, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers_attempted: Option<Vec<String>>,
    /// Successful cascade steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_executed: Option<usize>,
}

impl DispatchMeta {
    /// Metadata with only the common fields set.
    pub fn new(executor_type: impl Into<String>, tier: u8, duration_ms: u64) -> Self {
        Self {
            executor_type: executor_type.into(),
            tier,
            duration_ms,
            ..Default::default()
        }
    }

    /// Attach a tier record.
    pub fn with_record(mut self, record: &ExecutionRecord) -> Self {
        match record {
            ExecutionRecord::Code(r) => self.code_execution = Some(r.clone()),
            ExecutionRecord::Generative(r) => self.generative_execution = Some(r.clone()),
            ExecutionRecord::Agentic(r) => self.agentic_execution = Some(r.clone()),
            ExecutionRecord::Human(r) => self.human_execution = Some(r.clone()),
        }
        self
    }
}

/// Tier 1 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecution {
    /// Source language.
    pub language: String,
    /// CPU time reported by the sandbox.
    pub cpu_time_ms: u64,
}

/// Tier 2 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerativeExecution {
    /// Model used.
    pub model: String,
    /// Token usage.
    pub tokens: TokenUsage,
}

/// Tier 3 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticExecution {
    /// Model used.
    pub model: String,
    /// Chat calls made.
    pub iterations: u32,
    /// Distinct tool names called, in first-call order.
    pub tools_used: Vec<String>,
    /// Input plus output tokens across all iterations.
    pub total_tokens: u64,
}

/// Tier 4 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanExecution {
    /// Created task.
    pub task_id: String,
    /// When the task expires.
    pub expires_at: DateTime<Utc>,
    /// Assignees.
    pub assignees: Vec<String>,
}

/// Record produced by one tier execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionRecord {
    /// Tier 1.
    Code(CodeExecution),
    /// Tier 2.
    Generative(GenerativeExecution),
    /// Tier 3.
    Agentic(AgenticExecution),
    /// Tier 4.
    Human(HumanExecution),
}

impl ExecutionRecord {
    /// Field name of this record inside `_meta`.
    pub fn meta_field(&self) -> &'static str {
        match self {
            ExecutionRecord::Code(_) => "codeExecution",
            ExecutionRecord::Generative(_) => "generativeExecution",
            ExecutionRecord::Agentic(_) => "agenticExecution",
            ExecutionRecord::Human(_) => "humanExecution",
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            ExecutionRecord::Code(r) => serde_json::to_value(r),
            ExecutionRecord::Generative(r) => serde_json::to_value(r),
            ExecutionRecord::Agentic(r) => serde_json::to_value(r),
            ExecutionRecord::Human(r) => serde_json::to_value(r),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Add `_meta.<record>` to an object body. Other bodies are returned as-is.
pub fn attach_meta(mut body: Value, record: &ExecutionRecord) -> Value {
    if let Value::Object(map) = &mut body {
        let meta = map
            .entry(META_KEY)
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(meta) = meta {
            meta.insert(record.meta_field().to_string(), record.to_value());
        }
    }
    body
}

/// Remove `_meta` from an object body before it is piped onward.
pub fn strip_meta(mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.remove(META_KEY);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attach_and_strip_meta() {
        let record = ExecutionRecord::Code(CodeExecution {
            language: "javascript".into(),
            cpu_time_ms: 3,
        });

        let body = attach_meta(json!({"sum": 10}), &record);
        assert_eq!(body["_meta"]["codeExecution"]["language"], "javascript");
        assert_eq!(body["_meta"]["codeExecution"]["cpuTimeMs"], 3);

        assert_eq!(strip_meta(body), json!({"sum": 10}));
        // Non-object bodies pass through
        assert_eq!(attach_meta(json!([1, 2]), &record), json!([1, 2]));
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let meta = DispatchMeta {
            tiers_attempted: Some(vec!["code".into()]),
            steps_executed: Some(2),
            ..DispatchMeta::new("cascade", 1, 12)
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["executorType"], "cascade");
        assert_eq!(value["durationMs"], 12);
        assert_eq!(value["tiersAttempted"], json!(["code"]));
        assert_eq!(value["stepsExecuted"], 2);
        assert!(value.get("codeExecution").is_none());
    }

    #[test]
    fn test_success_range() {
        let meta = DispatchMeta::new("human", 4, 0);
        let accepted = DispatchResult {
            status: 202,
            body: json!({}),
            meta: meta.clone(),
        };
        assert!(accepted.is_success());

        let failed = DispatchResult::from_error(&DispatchError::Timeout("late".into()), meta);
        assert!(!failed.is_success());
        assert_eq!(failed.error_message(), Some("late"));
    }
}
