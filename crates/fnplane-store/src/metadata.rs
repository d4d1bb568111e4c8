// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function metadata.
//!
//! [`FunctionMetadata`] identifies one deployable unit. Its `type` decides
//! how the dispatcher executes it; the remaining optional fields only apply
//! to the matching type:
//!
//! | Type | Fields |
//! |------|--------|
//! | `code` | `language`, `entryPoint`, `dependencies` |
//! | `generative` | `model`, `userPrompt`, `outputSchema` |
//! | `agentic` | `model`, `systemPrompt`, `goal`, `tools`, `maxIterations` |
//! | `human` | `interactionType`, `ui`, `assignees`, `sla` |
//! | `cascade` | `steps`, `errorHandling` |

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared function type.
///
/// Serialized as a lowercase string. Strings that name no known type are
/// kept as [`FunctionType::Unknown`] so callers can report them instead of
/// failing to parse the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FunctionType {
    /// Sandboxed code (tier 1).
    #[default]
    Code,
    /// Single AI completion (tier 2).
    Generative,
    /// Multi-step autonomous agent (tier 3).
    Agentic,
    /// Human-in-the-loop task (tier 4).
    Human,
    /// Sequence of steps, each dispatched to some tier.
    Cascade,
    /// Unrecognized type string.
    Unknown(String),
}

impl FunctionType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            FunctionType::Code => "code",
            FunctionType::Generative => "generative",
            FunctionType::Agentic => "agentic",
            FunctionType::Human => "human",
            FunctionType::Cascade => "cascade",
            FunctionType::Unknown(s) => s,
        }
    }
}

impl From<String> for FunctionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "code" => FunctionType::Code,
            "generative" => FunctionType::Generative,
            "agentic" => FunctionType::Agentic,
            "human" => FunctionType::Human,
            "cascade" => FunctionType::Cascade,
            _ => FunctionType::Unknown(s),
        }
    }
}

impl From<FunctionType> for String {
    fn from(t: FunctionType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tool is implemented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolImplementation {
    /// Platform-provided capability addressed by name (e.g. "search").
    Builtin {
        /// Capability name.
        name: String,
    },
    /// HTTP endpoint.
    Api {
        /// URL to call.
        endpoint: String,
        /// HTTP method (default POST).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Caller-supplied source code. Never executed.
    Inline {
        /// The rejected source.
        code: String,
    },
    /// Another deployed function.
    Function {
        /// Target function id.
        #[serde(rename = "functionId")]
        function_id: String,
    },
    /// Any other implementation kind.
    #[serde(other)]
    Unknown,
}

/// A tool made available to an agentic function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name as presented to the model.
    pub name: String,
    /// Description presented to the model.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// How calls are served.
    pub implementation: ToolImplementation,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// One step of a cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeStep {
    /// Function to dispatch.
    pub function_id: String,
    /// Pinned version (current version when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Function to dispatch instead when this step fails (fallback mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to: Option<String>,
}

/// Cascade error handling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandling {
    /// Abort on the first failing step.
    #[default]
    FailFast,
    /// Try the step's `fallbackTo` function, or skip the step.
    Fallback,
}

/// Service-level targets for a human task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanSla {
    /// Time until first response is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Time until the task expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_time_ms: Option<u64>,
}

/// Metadata for one deployable function version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetadata {
    /// Stable function id.
    pub id: String,
    /// Semantic version.
    pub version: String,
    /// Declared type (defaults to code).
    #[serde(rename = "type", default)]
    pub function_type: FunctionType,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Deadline override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    // code
    /// Source language of the compiled body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Exported handler name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Declared dependencies (name -> version).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    // generative / agentic
    /// Model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prompt template with `{{field}}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    /// JSON schema the completion must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Agent system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Agent goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Agent tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Agent loop bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    // human
    /// Kind of interaction (default "approval").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_type: Option<String>,
    /// UI description handed to the task queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
    /// Users or groups the task is assigned to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    /// Service-level targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<HumanSla>,

    // cascade
    /// Ordered steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<CascadeStep>,
    /// Failure handling.
    #[serde(default)]
    pub error_handling: ErrorHandling,

    /// When this version was first deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When this version last became current.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FunctionMetadata {
    /// Minimal metadata of the given type.
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        function_type: FunctionType,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            function_type,
            ..Default::default()
        }
    }

    /// Minimal code-tier metadata.
    pub fn code(id: impl Into<String>, version: impl Into<String>, language: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            ..Self::new(id, version, FunctionType::Code)
        }
    }

    /// Cascade metadata over the given steps.
    pub fn cascade(
        id: impl Into<String>,
        version: impl Into<String>,
        steps: Vec<CascadeStep>,
        error_handling: ErrorHandling,
    ) -> Self {
        Self {
            steps,
            error_handling,
            ..Self::new(id, version, FunctionType::Cascade)
        }
    }
}

/// What produced a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentAction {
    /// A new or re-deployed version.
    Deploy,
    /// A rollback to an earlier version.
    Rollback,
}

/// One immutable entry of a function's deployment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    /// Version that became current.
    pub version: String,
    /// Metadata as it became current.
    pub metadata: FunctionMetadata,
    /// When it became current.
    pub deployed_at: DateTime<Utc>,
    /// Deploy or rollback.
    pub action: DeploymentAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_defaults_to_code() {
        let metadata: FunctionMetadata =
            serde_json::from_value(json!({"id": "f", "version": "1.0.0"})).unwrap();
        assert_eq!(metadata.function_type, FunctionType::Code);
        assert_eq!(metadata.error_handling, ErrorHandling::FailFast);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let metadata: FunctionMetadata =
            serde_json::from_value(json!({"id": "f", "version": "1.0.0", "type": "quantum"}))
                .unwrap();
        assert_eq!(
            metadata.function_type,
            FunctionType::Unknown("quantum".to_string())
        );
        let back = serde_json::to_value(&metadata).unwrap();
        assert_eq!(back["type"], "quantum");
    }

    #[test]
    fn test_tool_implementations_parse() {
        let tools: Vec<ToolDefinition> = serde_json::from_value(json!([
            {"name": "search", "implementation": {"type": "builtin", "name": "search"}},
            {"name": "weather", "implementation": {"type": "api", "endpoint": "http://x/w"}},
            {"name": "evil", "implementation": {"type": "inline", "code": "x"}},
            {"name": "math", "implementation": {"type": "function", "functionId": "add-ten"}},
            {"name": "odd", "implementation": {"type": "telepathy"}}
        ]))
        .unwrap();

        assert!(matches!(tools[0].implementation, ToolImplementation::Builtin { .. }));
        assert!(matches!(tools[1].implementation, ToolImplementation::Api { .. }));
        assert!(matches!(tools[2].implementation, ToolImplementation::Inline { .. }));
        assert_eq!(
            tools[3].implementation,
            ToolImplementation::Function {
                function_id: "add-ten".to_string()
            }
        );
        assert_eq!(tools[4].implementation, ToolImplementation::Unknown);
    }

    #[test]
    fn test_cascade_fields_parse() {
        let metadata: FunctionMetadata = serde_json::from_value(json!({
            "id": "pipeline",
            "version": "1.0.0",
            "type": "cascade",
            "errorHandling": "fallback",
            "steps": [
                {"functionId": "add-ten"},
                {"functionId": "multiply-three", "version": "2.0.0", "fallbackTo": "double"}
            ]
        }))
        .unwrap();

        assert_eq!(metadata.function_type, FunctionType::Cascade);
        assert_eq!(metadata.error_handling, ErrorHandling::Fallback);
        assert_eq!(metadata.steps.len(), 2);
        assert_eq!(metadata.steps[1].fallback_to.as_deref(), Some("double"));
    }
}
