// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backends for testing.
//!
//! Simple in-process implementations of every backend trait. They run no
//! code and call no AI service; behavior is scripted by the test.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::*;

/// Sleep for `delay`, or fail early when the token fires.
async fn simulate_delay(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(BackendError::Cancelled),
    }
}

/// Handler standing in for one piece of guest code.
pub type SandboxHandler = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Mock sandbox.
///
/// Looks up a handler by the exact code string; unknown code echoes its
/// input back.
pub struct MockSandbox {
    handlers: HashMap<String, SandboxHandler>,
    runs: AtomicUsize,
    cancelled: AtomicBool,
    /// Simulated execution time.
    pub execution_delay: Duration,
    /// CPU time reported for every run.
    pub cpu_time_ms: u64,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSandbox {
    /// Create a mock sandbox that echoes input.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            runs: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            execution_delay: Duration::ZERO,
            cpu_time_ms: 1,
        }
    }

    /// Register a handler for a code string.
    pub fn with_handler<F>(mut self, code: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(code.into(), Arc::new(handler));
        self
    }

    /// Set the simulated execution time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Number of runs started.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Whether any run observed cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn sandbox_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, request: SandboxRequest) -> Result<SandboxOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = simulate_delay(self.execution_delay, &request.cancel).await {
            self.cancelled.store(true, Ordering::SeqCst);
            return Err(e);
        }

        let code = String::from_utf8_lossy(&request.code);
        let result = match self.handlers.get(code.as_ref()) {
            Some(handler) => handler(&request.input),
            None => Ok(request.input.clone()),
        };

        let mut outcome = match result {
            Ok(value) => SandboxOutcome::ok(value),
            Err(error) => SandboxOutcome::failed(error),
        };
        outcome.cpu_time_ms = self.cpu_time_ms;
        outcome.logs.push(format!("mock run of {} bytes", request.code.len()));
        Ok(outcome)
    }
}

/// Mock completion client with scripted responses.
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<Result<CompletionResponse>>>,
    prompts: Mutex<Vec<String>>,
    /// Simulated latency.
    pub delay: Duration,
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletionClient {
    /// Create a client with no scripted responses.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Queue a successful response with fixed usage (10 in, 20 out).
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.responses.get_mut().push_back(Ok(CompletionResponse {
            content: content.into(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
            stop_reason: StopReason::EndTurn,
        }));
        self
    }

    /// Queue an upstream failure.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.responses
            .get_mut()
            .push_back(Err(BackendError::Request(message.into())));
        self
    }

    /// Set the simulated latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn create_message(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.prompts.lock().await.push(request.prompt.clone());
        simulate_delay(self.delay, &request.cancel).await?;

        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Other("No scripted completion left".into())))
    }
}

/// Mock chat client with scripted turns.
pub struct MockChatClient {
    turns: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    /// Simulated latency per turn.
    pub delay: Duration,
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatClient {
    /// Create a client with no scripted turns.
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Queue a final answer.
    pub fn with_final(mut self, content: impl Into<String>) -> Self {
        self.turns.get_mut().push_back(ChatResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        });
        self
    }

    /// Queue a turn requesting one tool call.
    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        let index = self.turns.get_mut().len();
        self.turns.get_mut().push_back(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call_{}", index),
                name: name.into(),
                arguments,
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        });
        self
    }

    /// Queue an arbitrary turn.
    pub fn with_turn(mut self, turn: ChatResponse) -> Self {
        self.turns.get_mut().push_back(turn);
        self
    }

    /// Set the simulated latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Conversation sent with each request.
    pub async fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().await.push(request.messages.clone());
        simulate_delay(self.delay, &request.cancel).await?;

        self.turns
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| BackendError::Other("No scripted chat turn left".into()))
    }
}

/// Mock task queue.
pub struct MockTaskQueue {
    tasks: Mutex<Vec<TaskSpec>>,
    /// Base URL for task links.
    pub base_url: String,
    /// If set, every call fails with this message.
    pub failure: Option<String>,
}

impl Default for MockTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTaskQueue {
    /// Create a queue that accepts every task.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            base_url: "http://localhost:8080/tasks".to_string(),
            failure: None,
        }
    }

    /// Create a queue that rejects every task.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    /// Tasks created so far.
    pub async fn tasks(&self) -> Vec<TaskSpec> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TaskQueue for MockTaskQueue {
    async fn create_task(&self, spec: TaskSpec) -> Result<TaskRecord> {
        if let Some(message) = &self.failure {
            return Err(BackendError::Unavailable(message.clone()));
        }

        let id = format!("task_{}", Uuid::new_v4().simple());
        let record = TaskRecord {
            task_url: format!("{}/{}", self.base_url, id),
            id,
            status: "pending".to_string(),
            expires_at: spec.expires_at,
        };
        self.tasks.lock().await.push(spec);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox_request(code: &str, input: Value) -> SandboxRequest {
        SandboxRequest {
            code: code.as_bytes().to_vec(),
            language: "javascript".into(),
            entry_point: None,
            input,
            timeout: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_sandbox_handler_and_echo() {
        let sandbox = MockSandbox::new().with_handler("double", |input| {
            Ok(json!({"value": input["value"].as_i64().unwrap_or(0) * 2}))
        });

        let outcome = sandbox
            .run(sandbox_request("double", json!({"value": 4})))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.value, Some(json!({"value": 8})));

        let outcome = sandbox
            .run(sandbox_request("other", json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(outcome.value, Some(json!({"a": 1})));
        assert_eq!(sandbox.run_count(), 2);
    }

    #[tokio::test]
    async fn test_sandbox_observes_cancellation() {
        let sandbox = MockSandbox::new().with_delay(Duration::from_secs(10));
        let request = sandbox_request("x", json!({}));
        request.cancel.cancel();

        let result = sandbox.run(request).await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
        assert!(sandbox.was_cancelled());
    }

    #[tokio::test]
    async fn test_completion_script_runs_out() {
        let client = MockCompletionClient::new().with_response("hi");
        let request = CompletionRequest {
            model: "m".into(),
            prompt: "p".into(),
            max_tokens: 10,
            cancel: CancellationToken::new(),
        };

        assert_eq!(
            client.create_message(request.clone()).await.unwrap().content,
            "hi"
        );
        assert!(client.create_message(request).await.is_err());
        assert_eq!(client.prompts().await, vec!["p", "p"]);
    }

    #[tokio::test]
    async fn test_task_queue_records_tasks() {
        let queue = MockTaskQueue::new();
        let record = queue
            .create_task(TaskSpec {
                function_id: "approve".into(),
                version: "1.0.0".into(),
                interaction_type: "approval".into(),
                ui: None,
                input: json!({}),
                assignees: vec!["ops".into()],
                sla: None,
                expires_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        assert!(record.task_url.ends_with(&record.id));
        assert_eq!(record.status, "pending");
        assert_eq!(queue.tasks().await.len(), 1);

        let failing = MockTaskQueue::failing("queue down");
        let spec = queue.tasks().await.remove(0);
        assert!(failing.create_task(spec).await.is_err());
    }
}
