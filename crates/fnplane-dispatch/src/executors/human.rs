// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tier 4: human task.
//!
//! Creating the task completes the dispatch. The response is 202 with the
//! task link; the human answer arrives later through the task queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::info;

use super::{ExecutionContext, TierExecutor, TierOutput};
use crate::backend::{TaskQueue, TaskSpec};
use crate::error::DispatchError;
use crate::result::{ExecutionRecord, HumanExecution};
use crate::tier::Tier;

/// Interaction used when metadata omits `interactionType`.
pub const DEFAULT_INTERACTION_TYPE: &str = "approval";

/// Task lifetime used when metadata has no `sla.resolutionTimeMs`.
pub const DEFAULT_RESOLUTION_TIME_MS: u64 = 24 * 60 * 60 * 1000;

/// Creates human tasks in the configured queue.
pub struct HumanExecutor {
    queue: Option<Arc<dyn TaskQueue>>,
}

impl HumanExecutor {
    /// Create an executor; `None` answers every call with 503.
    pub fn new(queue: Option<Arc<dyn TaskQueue>>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl TierExecutor for HumanExecutor {
    fn tier(&self) -> Tier {
        Tier::Human
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<TierOutput, DispatchError> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| DispatchError::Unavailable("Human task queue not available".into()))?;

        let metadata = ctx.metadata;
        let resolution_ms = metadata
            .sla
            .as_ref()
            .and_then(|sla| sla.resolution_time_ms)
            .unwrap_or(DEFAULT_RESOLUTION_TIME_MS);
        let expires_at = i64::try_from(resolution_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let spec = TaskSpec {
            function_id: metadata.id.clone(),
            version: metadata.version.clone(),
            interaction_type: metadata
                .interaction_type
                .clone()
                .unwrap_or_else(|| DEFAULT_INTERACTION_TYPE.to_string()),
            ui: metadata.ui.clone(),
            input: ctx.input,
            assignees: metadata.assignees.clone(),
            sla: metadata.sla.clone(),
            expires_at,
        };

        let task = queue
            .create_task(spec)
            .await
            .map_err(|e| DispatchError::ExecutionFailed(format!("Failed to create task: {}", e)))?;

        info!(
            function_id = %metadata.id,
            task_id = %task.id,
            expires_at = %task.expires_at,
            "Created human task"
        );

        let mut body = json!({
            "taskId": &task.id,
            "taskUrl": &task.task_url,
            "taskStatus": "pending",
        });
        if !metadata.assignees.is_empty()
            && let Value::Object(map) = &mut body
        {
            map.insert("assignees".into(), json!(&metadata.assignees));
        }

        Ok(TierOutput {
            status: 202,
            body,
            record: ExecutionRecord::Human(HumanExecution {
                task_id: task.id,
                expires_at: task.expires_at,
                assignees: metadata.assignees,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockTaskQueue;
    use fnplane_store::metadata::HumanSla;
    use fnplane_store::{FunctionMetadata, FunctionType};
    use std::time::Duration;

    fn ctx(metadata: FunctionMetadata) -> ExecutionContext {
        ExecutionContext::new(metadata, json!({"amount": 500}), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_creates_pending_task() {
        let queue = Arc::new(MockTaskQueue::new());
        let executor = HumanExecutor::new(Some(queue.clone()));
        let metadata = FunctionMetadata {
            assignees: vec!["finance".into()],
            sla: Some(HumanSla {
                response_time_ms: None,
                resolution_time_ms: Some(60_000),
            }),
            ..FunctionMetadata::new("approve-refund", "1.0.0", FunctionType::Human)
        };

        let before = Utc::now();
        let output = executor.execute(ctx(metadata)).await.unwrap();

        assert_eq!(output.status, 202);
        assert_eq!(output.body["taskStatus"], "pending");
        assert_eq!(output.body["assignees"], json!(["finance"]));
        assert!(output.body["taskUrl"].as_str().unwrap().contains("task_"));

        let tasks = queue.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].interaction_type, "approval");
        assert_eq!(tasks[0].input, json!({"amount": 500}));
        let lifetime = tasks[0].expires_at - before;
        assert!(lifetime >= chrono::Duration::seconds(59));
        assert!(lifetime <= chrono::Duration::seconds(61));
    }

    #[tokio::test]
    async fn test_default_expiry_is_one_day() {
        let queue = Arc::new(MockTaskQueue::new());
        let executor = HumanExecutor::new(Some(queue.clone()));
        let output = executor
            .execute(ctx(FunctionMetadata::new("review", "1.0.0", FunctionType::Human)))
            .await
            .unwrap();

        assert!(output.body.get("assignees").is_none());
        let ExecutionRecord::Human(record) = output.record else {
            panic!("expected human record");
        };
        let lifetime = record.expires_at - Utc::now();
        assert!(lifetime > chrono::Duration::hours(23));
    }

    #[tokio::test]
    async fn test_queue_failures() {
        let metadata = FunctionMetadata::new("review", "1.0.0", FunctionType::Human);

        let err = HumanExecutor::new(None)
            .execute(ctx(metadata.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 503);

        let err = HumanExecutor::new(Some(Arc::new(MockTaskQueue::failing("queue down"))))
            .execute(ctx(metadata))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
        assert!(err.to_string().contains("queue down"));
    }
}
