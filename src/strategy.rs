//! Cache consistency strategies
//!
//! Each executor works against one namespace handle chosen by the dispatcher:
//!
//! - **CacheFirst**: serve from the namespace; only a miss goes to the network
//! - **NetworkFirst**: prefer the network; fall back to the namespace when the
//!   network fails
//! - **StaleWhileRevalidate**: serve the stored value at once while a detached
//!   task refreshes it from the network
//!
//! Only status 200 responses are written through. Concurrent refreshes of the
//! same key race freely; whichever finishes last owns the slot.

use crate::error::{CacheError, Result};
use crate::metrics::WorkerMetrics;
use crate::models::{CacheNamespace, FetchRequest, ResponseSnapshot};
use crate::network::Fetcher;
use crate::registry::NamespaceRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache_first",
            Strategy::NetworkFirst => "network_first",
            Strategy::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// Result of running a strategy
#[derive(Debug)]
pub struct StrategyOutcome {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
    /// Background refresh started by stale-while-revalidate on a cache hit.
    /// Dropping it leaves the task running detached.
    pub revalidation: Option<JoinHandle<()>>,
}

impl StrategyOutcome {
    fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
        StrategyOutcome {
            response,
            source,
            revalidation: None,
        }
    }
}

/// Runs strategies against the registry and the network
#[derive(Clone)]
pub struct StrategyExecutor {
    registry: Arc<NamespaceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<WorkerMetrics>,
}

impl StrategyExecutor {
    pub fn new(
        registry: Arc<NamespaceRegistry>,
        fetcher: Arc<dyn Fetcher>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        StrategyExecutor {
            registry,
            fetcher,
            metrics,
        }
    }

    pub async fn execute(
        &self,
        strategy: Strategy,
        request: &FetchRequest,
        namespace: &CacheNamespace,
    ) -> Result<StrategyOutcome> {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, namespace).await,
            Strategy::NetworkFirst => self.network_first(request, namespace).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, namespace).await
            }
        }
    }

    pub async fn cache_first(
        &self,
        request: &FetchRequest,
        namespace: &CacheNamespace,
    ) -> Result<StrategyOutcome> {
        let key = request.cache_key();
        if let Some(entry) = self.registry.lookup(namespace, &key).await {
            self.metrics.record_cache_hit();
            self.metrics.record_bytes_from_cache(entry.response.body.len() as u64);
            return Ok(StrategyOutcome::new(entry.response, ResponseSource::Cache));
        }
        self.metrics.record_cache_miss();

        let response = self.fetch(request).await?;
        if response.is_cacheable() {
            self.registry.put(namespace, key, response.clone()).await;
        }
        Ok(StrategyOutcome::new(response, ResponseSource::Network))
    }

    pub async fn network_first(
        &self,
        request: &FetchRequest,
        namespace: &CacheNamespace,
    ) -> Result<StrategyOutcome> {
        let key = request.cache_key();
        match self.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.registry.put(namespace, key, response.clone()).await;
                }
                Ok(StrategyOutcome::new(response, ResponseSource::Network))
            }
            Err(e) if e.is_network_failure() => {
                debug!(
                    "Network failed for url={}, trying namespace {}",
                    request.url, namespace.name
                );
                match self.registry.lookup(namespace, &key).await {
                    Some(entry) => {
                        self.metrics.record_cache_hit();
                        self.metrics
                            .record_bytes_from_cache(entry.response.body.len() as u64);
                        Ok(StrategyOutcome::new(entry.response, ResponseSource::Cache))
                    }
                    None => {
                        self.metrics.record_cache_miss();
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn stale_while_revalidate(
        &self,
        request: &FetchRequest,
        namespace: &CacheNamespace,
    ) -> Result<StrategyOutcome> {
        let key = request.cache_key();
        let cached = self.registry.lookup(namespace, &key).await;

        // One fetch serves both roles: background refresh on a hit, the
        // response itself on a miss
        let executor = self.clone();
        let task_request = request.clone();
        let task_namespace = namespace.clone();
        let refresh: JoinHandle<Result<ResponseSnapshot>> = tokio::spawn(async move {
            let response = executor.fetch(&task_request).await?;
            if response.is_cacheable() {
                executor
                    .registry
                    .put(&task_namespace, task_request.cache_key(), response.clone())
                    .await;
            }
            Ok(response)
        });

        match cached {
            Some(entry) => {
                self.metrics.record_cache_hit();
                self.metrics.record_bytes_from_cache(entry.response.body.len() as u64);

                let metrics = Arc::clone(&self.metrics);
                let url = request.url.clone();
                let revalidation = tokio::spawn(async move {
                    match refresh.await {
                        Ok(Ok(_)) => metrics.record_revalidation(true),
                        Ok(Err(e)) => {
                            metrics.record_revalidation(false);
                            warn!("Background revalidation failed for url={}: {}", url, e);
                        }
                        Err(e) => {
                            metrics.record_revalidation(false);
                            warn!("Background revalidation task aborted for url={}: {}", url, e);
                        }
                    }
                });

                Ok(StrategyOutcome {
                    response: entry.response,
                    source: ResponseSource::Cache,
                    revalidation: Some(revalidation),
                })
            }
            None => {
                self.metrics.record_cache_miss();
                let response = refresh.await.map_err(|e| {
                    CacheError::InternalError(format!("Revalidation task failed: {}", e))
                })??;
                Ok(StrategyOutcome::new(response, ResponseSource::Network))
            }
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
        let start = Instant::now();
        let result = self.fetcher.fetch(request).await;
        self.metrics.record_network_fetch(result.is_ok(), start.elapsed());
        if let Ok(response) = &result {
            self.metrics.record_bytes_from_network(response.body.len() as u64);
        }
        result
    }
}
