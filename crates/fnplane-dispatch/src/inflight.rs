// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deduplication of identical concurrent calls.
//!
//! Callers that present the same key while an entry is fresh await the
//! same shared future instead of starting a new call. Entries older than
//! the TTL are purged when a new entry is inserted or when
//! [`InFlightMap::evict_expired`] runs; reads never purge.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::debug;

type SharedCall<T> = Shared<BoxFuture<'static, T>>;

/// Map of key -> in-flight call.
pub struct InFlightMap<T: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, SharedCall<T>)>>,
}

impl<T> InFlightMap<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty map whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Await the call registered under `key`, or register `fut`.
    ///
    /// `fut` is dropped unpolled when a fresh entry already exists.
    pub async fn run<F>(&self, key: String, fut: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();

            match entries.get(&key) {
                Some((started, call)) if now.duration_since(*started) < self.ttl => {
                    debug!(key = %key, "Joining in-flight call");
                    call.clone()
                }
                _ => {
                    let ttl = self.ttl;
                    entries.retain(|_, (started, _)| now.duration_since(*started) < ttl);
                    let call = fut.boxed().shared();
                    entries.insert(key, (now, call.clone()));
                    call
                }
            }
        };

        shared.await
    }

    /// Remove expired entries, returning how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (started, _)| now.duration_since(*started) < self.ttl);
        before - entries.len()
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the map holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
