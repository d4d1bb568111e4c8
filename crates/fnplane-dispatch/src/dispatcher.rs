// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tiered dispatcher.
//!
//! Routes a function to the executor of its tier, enforces the tier
//! deadline, and runs cascades step by step. Every outcome, including
//! configuration and resolution failures, is rendered as a
//! [`DispatchResult`]; nothing here returns an error to the caller.
//!
//! # Deadlines
//!
//! The executor runs in a spawned task raced against the deadline. When the
//! deadline wins, the call's [`CancellationToken`] is cancelled and the task
//! is left to observe it; the caller gets 408 immediately.
//!
//! # Nesting
//!
//! Cascade steps and `function` tools dispatch one level deeper than their
//! parent. Both share the `max_cascade_depth` bound.

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use fnplane_store::metadata::ErrorHandling;
use fnplane_store::{CodeStorage, FallbackChain, FunctionMetadata, FunctionRegistry, FunctionType};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{ChatClient, CompletionClient, Sandbox, TaskQueue};
use crate::config::{ConfigError, DispatchConfig};
use crate::error::DispatchError;
use crate::executors::{
    AgenticExecutor, CodeExecutor, ExecutionContext, GenerativeExecutor, HumanExecutor,
    TierExecutor,
};
use crate::result::{DispatchMeta, DispatchResult, attach_meta, strip_meta};
use crate::tier::{Tier, TierSelection, effective_timeout, select_tier};
use crate::tools::{BuiltinTools, FunctionInvoker, ToolCallContext, ToolContext, ToolHandler};

/// Executor type reported for unrecognized or unresolved functions.
const UNKNOWN_EXECUTOR: &str = "unknown";

/// Executor type reported for cascades.
const CASCADE_EXECUTOR: &str = "cascade";

/// Builder for [`Dispatcher`].
///
/// Every backend is optional. A tier whose backend is missing answers 503.
#[derive(Default)]
pub struct DispatcherBuilder {
    sandbox: Option<Arc<dyn Sandbox>>,
    completion_client: Option<Arc<dyn CompletionClient>>,
    chat_client: Option<Arc<dyn ChatClient>>,
    task_queue: Option<Arc<dyn TaskQueue>>,
    registry: Option<FunctionRegistry>,
    code_storage: Option<CodeStorage>,
    config: DispatchConfig,
    builtins: BuiltinTools,
    http_client: Option<reqwest::Client>,
}

impl DispatcherBuilder {
    /// Create a builder with default configuration and no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandbox for tier 1.
    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Completion client for tier 2.
    pub fn completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion_client = Some(client);
        self
    }

    /// Chat client for tier 3.
    pub fn chat_client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.chat_client = Some(client);
        self
    }

    /// Task queue for tier 4.
    pub fn task_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.task_queue = Some(queue);
        self
    }

    /// Registry used to resolve cascade steps, `function` tools and
    /// invocations by id.
    pub fn registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Code storage used to load code for resolved code-tier functions.
    pub fn code_storage(mut self, storage: CodeStorage) -> Self {
        self.code_storage = Some(storage);
        self
    }

    /// Dispatcher configuration.
    ///
    /// Default: [`DispatchConfig::default`]
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a builtin tool for agentic functions.
    pub fn builtin_tool(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.builtins.insert(name.into(), handler);
        self
    }

    /// HTTP client for `api` tools.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the dispatcher.
    pub fn build(self) -> Result<Dispatcher, ConfigError> {
        self.config.timeouts.validate()?;

        let Self {
            sandbox,
            completion_client,
            chat_client,
            task_queue,
            registry,
            code_storage,
            config,
            builtins,
            http_client,
        } = self;

        let inner = Arc::new_cyclic(|weak: &Weak<DispatcherInner>| {
            let tools = ToolContext {
                builtins: Arc::new(builtins),
                http: http_client.unwrap_or_default(),
                functions: Some(Arc::new(WeakDispatcher(weak.clone()))),
            };

            DispatcherInner {
                code: Arc::new(CodeExecutor::new(sandbox)),
                generative: Arc::new(GenerativeExecutor::new(completion_client)),
                agentic: Arc::new(AgenticExecutor::new(
                    chat_client,
                    tools,
                    config.default_max_iterations,
                )),
                human: Arc::new(HumanExecutor::new(task_queue)),
                registry,
                code_storage,
                config,
            }
        });

        Ok(Dispatcher { inner })
    }
}

struct DispatcherInner {
    config: DispatchConfig,
    code: Arc<CodeExecutor>,
    generative: Arc<GenerativeExecutor>,
    agentic: Arc<AgenticExecutor>,
    human: Arc<HumanExecutor>,
    registry: Option<FunctionRegistry>,
    code_storage: Option<CodeStorage>,
}

impl DispatcherInner {
    fn executor(&self, tier: Tier) -> Arc<dyn TierExecutor> {
        match tier {
            Tier::Code => self.code.clone(),
            Tier::Generative => self.generative.clone(),
            Tier::Agentic => self.agentic.clone(),
            Tier::Human => self.human.clone(),
        }
    }
}

/// Tiered function dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Start building a dispatcher.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Registry, if configured.
    pub fn registry(&self) -> Option<&FunctionRegistry> {
        self.inner.registry.as_ref()
    }

    /// Code storage, if configured.
    pub fn code_storage(&self) -> Option<&CodeStorage> {
        self.inner.code_storage.as_ref()
    }

    /// Agentic executor, for inspecting its runtime cache.
    pub fn agentic(&self) -> &AgenticExecutor {
        &self.inner.agentic
    }

    /// Dispatch a function with caller-supplied code.
    pub async fn dispatch(
        &self,
        metadata: &FunctionMetadata,
        input: Value,
        code: Option<&[u8]>,
    ) -> DispatchResult {
        self.dispatch_at_depth(metadata.clone(), input, code.map(<[u8]>::to_vec), 0, None)
            .await
    }

    /// Resolve a function by id and dispatch it with its stored code.
    ///
    /// `version` pins a version; `None` uses the current one.
    pub async fn dispatch_function(
        &self,
        function_id: &str,
        version: Option<&str>,
        input: Value,
    ) -> DispatchResult {
        self.dispatch_function_at(
            function_id.to_string(),
            version.map(str::to_string),
            input,
            0,
            None,
        )
        .await
    }

    /// Metadata for `function_id` at `version` (current when `None`).
    pub async fn resolve(
        &self,
        function_id: &str,
        version: Option<&str>,
    ) -> Result<FunctionMetadata, DispatchError> {
        let registry = self.inner.registry.as_ref().ok_or_else(|| {
            DispatchError::Unavailable("Function registry not configured".into())
        })?;

        let metadata = match version {
            Some(v) => registry.get_version(function_id, v).await?,
            None => registry.get(function_id).await?,
        };

        metadata.ok_or_else(|| match version {
            Some(v) => DispatchError::NotFound(format!("Function {}@{} not found", function_id, v)),
            None => DispatchError::NotFound(format!("Function {} not found", function_id)),
        })
    }

    /// Stored code for a code-tier function, resolved through the default
    /// fallback chain. Other tiers have no code.
    pub async fn load_code(
        &self,
        metadata: &FunctionMetadata,
    ) -> Result<Option<Vec<u8>>, DispatchError> {
        if metadata.function_type != FunctionType::Code {
            return Ok(None);
        }
        let Some(storage) = self.inner.code_storage.as_ref() else {
            return Ok(None);
        };

        let resolved = storage
            .get_with_fallback(
                &metadata.id,
                Some(metadata.version.as_str()),
                &FallbackChain::default(),
            )
            .await?;

        Ok(resolved.map(|r| {
            if r.fallback {
                debug!(
                    function_id = %metadata.id,
                    requested = %metadata.version,
                    resolved = %r.version,
                    "Using fallback code"
                );
            }
            r.code
        }))
    }

    fn dispatch_function_at(
        &self,
        function_id: String,
        version: Option<String>,
        input: Value,
        depth: usize,
        parent: Option<CancellationToken>,
    ) -> BoxFuture<'static, DispatchResult> {
        let this = self.clone();
        async move {
            let start = Instant::now();
            let prepared = async {
                let metadata = this.resolve(&function_id, version.as_deref()).await?;
                let code = this.load_code(&metadata).await?;
                Ok::<_, DispatchError>((metadata, code))
            }
            .await;

            match prepared {
                Ok((metadata, code)) => {
                    this.dispatch_at_depth(metadata, input, code, depth, parent)
                        .await
                }
                Err(e) => {
                    debug!(function_id = %function_id, error = %e, "Failed to resolve function");
                    DispatchResult::from_error(
                        &e,
                        DispatchMeta::new(UNKNOWN_EXECUTOR, Tier::Code.number(), elapsed_ms(start)),
                    )
                }
            }
        }
        .boxed()
    }

    fn dispatch_at_depth(
        &self,
        metadata: FunctionMetadata,
        input: Value,
        code: Option<Vec<u8>>,
        depth: usize,
        parent: Option<CancellationToken>,
    ) -> BoxFuture<'static, DispatchResult> {
        let this = self.clone();
        async move {
            let selection = select_tier(&metadata.function_type);
            let max_depth = this.inner.config.max_cascade_depth;

            if depth > max_depth {
                warn!(function_id = %metadata.id, depth, max_depth, "Cascade depth exceeded");
                let err = DispatchError::ExecutionFailed(format!(
                    "Maximum cascade depth of {} exceeded",
                    max_depth
                ));
                let meta = match selection {
                    TierSelection::Tier(tier) => DispatchMeta::new(tier.name(), tier.number(), 0),
                    TierSelection::Cascade => cascade_meta(Vec::new(), None, 0, 0),
                    TierSelection::Unknown(_) => {
                        DispatchMeta::new(UNKNOWN_EXECUTOR, Tier::Code.number(), 0)
                    }
                };
                return DispatchResult::from_error(&err, meta);
            }

            match selection {
                TierSelection::Tier(tier) => {
                    this.run_tier(tier, metadata, input, code, depth, parent)
                        .await
                }
                TierSelection::Cascade => this.run_cascade(metadata, input, depth, parent).await,
                TierSelection::Unknown(function_type) => {
                    warn!(function_id = %metadata.id, function_type = %function_type, "Unknown function type");
                    DispatchResult::from_error(
                        &DispatchError::UnknownType(format!(
                            "Unknown function type: {}",
                            function_type
                        )),
                        DispatchMeta::new(UNKNOWN_EXECUTOR, Tier::Code.number(), 0),
                    )
                }
            }
        }
        .boxed()
    }

    async fn run_tier(
        &self,
        tier: Tier,
        metadata: FunctionMetadata,
        input: Value,
        code: Option<Vec<u8>>,
        depth: usize,
        parent: Option<CancellationToken>,
    ) -> DispatchResult {
        let start = Instant::now();
        let timeout = effective_timeout(&metadata, tier, &self.inner.config.timeouts);
        let cancel = parent.map(|p| p.child_token()).unwrap_or_default();
        let function_id = metadata.id.clone();
        let version = metadata.version.clone();

        let executor = self.inner.executor(tier);
        let ctx = ExecutionContext {
            metadata,
            input,
            code,
            cancel: cancel.clone(),
            depth,
            timeout,
        };

        debug!(
            function_id = %function_id,
            version = %version,
            tier = tier.number(),
            timeout_ms = timeout.as_millis() as u64,
            depth,
            "Dispatching"
        );

        // Dropping the handle on timeout detaches the task without aborting it.
        let handle = tokio::spawn(async move { executor.execute(ctx).await });
        let outcome = tokio::time::timeout(timeout, handle).await;
        let meta = DispatchMeta::new(tier.name(), tier.number(), elapsed_ms(start));

        match outcome {
            Err(_) => {
                cancel.cancel();
                warn!(
                    function_id = %function_id,
                    tier = tier.number(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out"
                );
                DispatchResult::from_error(
                    &DispatchError::Timeout(format!(
                        "Execution timeout after {}ms (tier {})",
                        timeout.as_millis(),
                        tier.number()
                    )),
                    meta,
                )
            }
            Ok(Err(join_error)) => {
                error!(function_id = %function_id, error = %join_error, "Executor task failed");
                DispatchResult::from_error(
                    &DispatchError::ExecutionFailed(format!(
                        "Executor task failed: {}",
                        join_error
                    )),
                    meta,
                )
            }
            Ok(Ok(Err(e))) => {
                info!(
                    function_id = %function_id,
                    tier = tier.number(),
                    status = e.status(),
                    error = %e,
                    "Execution failed"
                );
                DispatchResult::from_error(&e, meta)
            }
            Ok(Ok(Ok(output))) => {
                info!(
                    function_id = %function_id,
                    version = %version,
                    tier = tier.number(),
                    status = output.status,
                    duration_ms = meta.duration_ms,
                    "Execution completed"
                );
                DispatchResult {
                    status: output.status,
                    body: attach_meta(output.body, &output.record),
                    meta: meta.with_record(&output.record),
                }
            }
        }
    }

    async fn run_cascade(
        &self,
        metadata: FunctionMetadata,
        input: Value,
        depth: usize,
        parent: Option<CancellationToken>,
    ) -> DispatchResult {
        let start = Instant::now();
        let mut attempts = Attempts::default();

        if self.inner.registry.is_none() {
            return DispatchResult::from_error(
                &DispatchError::Unavailable(
                    "Cascade execution not available: no function registry configured".into(),
                ),
                cascade_meta(Vec::new(), None, 0, elapsed_ms(start)),
            );
        }

        let cancel = parent.unwrap_or_default();
        let mut current = input;
        let mut status = 200;
        let mut steps_executed = 0usize;

        for (index, step) in metadata.steps.iter().enumerate() {
            let result = self
                .dispatch_function_at(
                    step.function_id.clone(),
                    step.version.clone(),
                    current.clone(),
                    depth + 1,
                    Some(cancel.clone()),
                )
                .await;
            attempts.record(&result.meta);

            if result.is_success() {
                steps_executed += 1;
                status = result.status;
                current = strip_meta(result.body);
                continue;
            }

            match (metadata.error_handling, &step.fallback_to) {
                (ErrorHandling::FailFast, _) => {
                    info!(
                        function_id = %metadata.id,
                        step = index,
                        step_function = %step.function_id,
                        status = result.status,
                        "Cascade step failed"
                    );
                    return DispatchResult {
                        status: result.status,
                        body: result.body,
                        meta: attempts.into_meta(steps_executed, elapsed_ms(start)),
                    };
                }
                (ErrorHandling::Fallback, Some(fallback)) => {
                    debug!(
                        function_id = %metadata.id,
                        step = index,
                        fallback = %fallback,
                        "Cascade step failed, trying fallback"
                    );
                    let fallback_result = self
                        .dispatch_function_at(
                            fallback.clone(),
                            None,
                            current.clone(),
                            depth + 1,
                            Some(cancel.clone()),
                        )
                        .await;
                    attempts.record(&fallback_result.meta);

                    if !fallback_result.is_success() {
                        return DispatchResult {
                            status: fallback_result.status,
                            body: fallback_result.body,
                            meta: attempts.into_meta(steps_executed, elapsed_ms(start)),
                        };
                    }
                    steps_executed += 1;
                    status = fallback_result.status;
                    current = strip_meta(fallback_result.body);
                }
                (ErrorHandling::Fallback, None) => {
                    debug!(
                        function_id = %metadata.id,
                        step = index,
                        status = result.status,
                        "Cascade step failed without fallback, skipping"
                    );
                }
            }
        }

        let meta = attempts.into_meta(steps_executed, elapsed_ms(start));
        if steps_executed == 0 {
            return DispatchResult::from_error(
                &DispatchError::ExecutionFailed("Cascade produced no successful steps".into()),
                meta,
            );
        }

        info!(
            function_id = %metadata.id,
            steps_executed,
            tiers = ?meta.tiers_attempted,
            duration_ms = meta.duration_ms,
            "Cascade completed"
        );

        DispatchResult {
            status,
            body: current,
            meta,
        }
    }
}

/// Tiers touched by a cascade so far.
#[derive(Default)]
struct Attempts {
    tiers: Vec<String>,
    last_tier: Option<u8>,
}

impl Attempts {
    fn record(&mut self, meta: &DispatchMeta) {
        let names = match &meta.tiers_attempted {
            Some(nested) => nested.clone(),
            None => Tier::from_name(&meta.executor_type)
                .map(|t| vec![t.name().to_string()])
                .unwrap_or_default(),
        };
        if names.is_empty() {
            return;
        }
        for name in names {
            if !self.tiers.contains(&name) {
                self.tiers.push(name);
            }
        }
        self.last_tier = Some(meta.tier);
    }

    fn into_meta(self, steps_executed: usize, duration_ms: u64) -> DispatchMeta {
        cascade_meta(self.tiers, self.last_tier, steps_executed, duration_ms)
    }
}

fn cascade_meta(
    tiers: Vec<String>,
    last_tier: Option<u8>,
    steps_executed: usize,
    duration_ms: u64,
) -> DispatchMeta {
    DispatchMeta {
        tiers_attempted: Some(tiers),
        steps_executed: Some(steps_executed),
        ..DispatchMeta::new(
            CASCADE_EXECUTOR,
            last_tier.unwrap_or(Tier::Code.number()),
            duration_ms,
        )
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Handle given to `function` tools. Weak so the tool table does not keep
/// the dispatcher alive.
struct WeakDispatcher(Weak<DispatcherInner>);

#[async_trait]
impl FunctionInvoker for WeakDispatcher {
    async fn invoke_function(
        &self,
        function_id: &str,
        input: Value,
        ctx: ToolCallContext,
    ) -> DispatchResult {
        let Some(inner) = self.0.upgrade() else {
            return DispatchResult::from_error(
                &DispatchError::Unavailable("Dispatcher has shut down".into()),
                DispatchMeta::new(UNKNOWN_EXECUTOR, Tier::Code.number(), 0),
            );
        };

        Dispatcher { inner }
            .dispatch_function_at(
                function_id.to_string(),
                None,
                input,
                ctx.depth + 1,
                Some(ctx.cancel),
            )
            .await
    }
}
