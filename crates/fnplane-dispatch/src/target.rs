// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invoke-by-id entry point.
//!
//! [`FunctionTarget`] resolves a function through the registry, loads its
//! code, and dispatches it. Identical calls made while one is in flight
//! share its result.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::inflight::InFlightMap;
use crate::result::{DispatchMeta, DispatchResult};
use crate::tier::Tier;

/// Deduplicating invoker over a [`Dispatcher`].
#[derive(Clone)]
pub struct FunctionTarget {
    dispatcher: Dispatcher,
    inflight: Arc<InFlightMap<DispatchResult>>,
}

impl FunctionTarget {
    /// Create a target; entries live for the dispatcher's `dedup_ttl`.
    pub fn new(dispatcher: Dispatcher) -> Self {
        let ttl = dispatcher.config().dedup_ttl;
        Self {
            dispatcher,
            inflight: Arc::new(InFlightMap::new(ttl)),
        }
    }

    /// Underlying dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Invoke the current version of `function_id`.
    pub async fn invoke(&self, function_id: &str, input: Value) -> DispatchResult {
        self.invoke_inner(function_id, None, input).await
    }

    /// Invoke one specific version of `function_id`.
    pub async fn invoke_version(
        &self,
        function_id: &str,
        version: &str,
        input: Value,
    ) -> DispatchResult {
        self.invoke_inner(function_id, Some(version), input).await
    }

    /// Drop expired deduplication entries.
    pub async fn evict_expired(&self) -> usize {
        self.inflight.evict_expired().await
    }

    async fn invoke_inner(
        &self,
        function_id: &str,
        version: Option<&str>,
        input: Value,
    ) -> DispatchResult {
        let start = Instant::now();
        let metadata = match self.dispatcher.resolve(function_id, version).await {
            Ok(metadata) => metadata,
            Err(e) => {
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                return DispatchResult::from_error(
                    &e,
                    DispatchMeta::new("unknown", Tier::Code.number(), duration_ms),
                );
            }
        };

        let key = format!("invoke:{}@{}:{}", metadata.id, metadata.version, input);
        debug!(key = %key, "Invoking function");

        let dispatcher = self.dispatcher.clone();
        self.inflight
            .run(key, async move {
                let code = match dispatcher.load_code(&metadata).await {
                    Ok(code) => code,
                    Err(e) => {
                        return DispatchResult::from_error(
                            &e,
                            DispatchMeta::new(metadata.function_type.as_str(), Tier::Code.number(), 0),
                        );
                    }
                };
                dispatcher.dispatch(&metadata, input, code.as_deref()).await
            })
            .await
    }
}
