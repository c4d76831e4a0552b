//! Control channel between pages and the worker
//!
//! Messages are JSON objects of the form `{"type": ..., "payload": ...}`:
//!
//! - `SKIP_WAITING` - activate an installed worker without waiting for old clients
//! - `CACHE_URLS` - fetch a list of URLs into the dynamic namespace
//! - `GET_CACHE_STATUS` - version, lifecycle state and namespace contents
//! - `CLEAR_CACHE` - delete every namespace
//! - `GET_VERSION` - the worker version
//!
//! Each message gets exactly one [`ControlReply`], sent back on the port the
//! sender supplied. A sender that stopped listening is logged and ignored.

use crate::control_metrics::ControlMetrics;
use crate::error::{CacheError, Result};
use crate::lifecycle::{LifecycleManager, WorkerState};
use crate::models::{FetchRequest, NamespaceKind};
use crate::network::Fetcher;
use crate::registry::{NamespaceRegistry, NamespaceSummary};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    CacheUrls(Vec<String>),
    GetCacheStatus,
    ClearCache,
    GetVersion,
}

impl ControlMessage {
    /// Parse a JSON message body
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| CacheError::InvalidMessage(format!("Unrecognized control message: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::SkipWaiting => "SKIP_WAITING",
            ControlMessage::CacheUrls(_) => "CACHE_URLS",
            ControlMessage::GetCacheStatus => "GET_CACHE_STATUS",
            ControlMessage::ClearCache => "CLEAR_CACHE",
            ControlMessage::GetVersion => "GET_VERSION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    SkipWaiting {
        state: WorkerState,
    },
    UrlsCached {
        cached: usize,
        failed: usize,
        failures: Vec<String>,
    },
    CacheStatus {
        version: String,
        state: WorkerState,
        namespaces: Vec<NamespaceSummary>,
    },
    CacheCleared {
        deleted: Vec<String>,
    },
    Version {
        version: String,
    },
    Error {
        message: String,
    },
}

impl ControlReply {
    pub fn error(message: impl Into<String>) -> Self {
        ControlReply::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ControlReply::Error { .. })
    }
}

/// Executes control messages against the lifecycle and the registry
pub struct ControlHandler {
    lifecycle: Arc<LifecycleManager>,
    registry: Arc<NamespaceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    metrics: Option<Arc<ControlMetrics>>,
}

impl ControlHandler {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        registry: Arc<NamespaceRegistry>,
        fetcher: Arc<dyn Fetcher>,
        origin: Url,
    ) -> Self {
        Self {
            lifecycle,
            registry,
            fetcher,
            origin,
            metrics: None,
        }
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<ControlMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle a message and send the reply on `port`
    pub async fn dispatch(&self, message: ControlMessage, port: oneshot::Sender<ControlReply>) {
        let kind = message.kind();
        let reply = self.handle(message).await;
        if port.send(reply).is_err() {
            warn!("Control reply dropped: type={} (sender went away)", kind);
        }
    }

    /// Handle a raw JSON body; malformed or unknown messages get an error reply
    pub async fn handle_json(&self, body: &[u8]) -> ControlReply {
        match ControlMessage::from_json(body) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!("Rejected control message: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_message("UNKNOWN");
                    metrics.record_result("UNKNOWN", false);
                }
                ControlReply::error(e.to_string())
            }
        }
    }

    pub async fn handle(&self, message: ControlMessage) -> ControlReply {
        let start = Instant::now();
        let kind = message.kind();
        debug!("Handling control message type={}", kind);
        if let Some(metrics) = &self.metrics {
            metrics.record_message(kind);
        }

        let reply = match message {
            ControlMessage::SkipWaiting => self.skip_waiting().await,
            ControlMessage::CacheUrls(urls) => self.cache_urls(urls).await,
            ControlMessage::GetCacheStatus => self.cache_status().await,
            ControlMessage::ClearCache => self.clear_cache().await,
            ControlMessage::GetVersion => ControlReply::Version {
                version: self.lifecycle.version().to_string(),
            },
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_result(kind, !reply.is_error());
            metrics.record_duration(kind, start.elapsed().as_secs_f64());
        }
        reply
    }

    async fn skip_waiting(&self) -> ControlReply {
        match self.lifecycle.skip_waiting().await {
            Ok(state) => {
                info!("skip_waiting requested, state={}", state);
                ControlReply::SkipWaiting { state }
            }
            Err(e) => {
                warn!("skip_waiting failed: {}", e);
                ControlReply::error(e.to_string())
            }
        }
    }

    async fn cache_urls(&self, urls: Vec<String>) -> ControlReply {
        let namespace = self.registry.handle(NamespaceKind::Dynamic);
        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();

        for raw in urls {
            let request = match self
                .origin
                .join(&raw)
                .map_err(|e| CacheError::InvalidMessage(e.to_string()))
                .and_then(|url| FetchRequest::get(url.as_str()))
            {
                Ok(request) => request,
                Err(e) => {
                    debug!("Skipping url={}: {}", raw, e);
                    failures.push(raw);
                    continue;
                }
            };
            let fetcher = Arc::clone(&self.fetcher);
            tasks.spawn(async move {
                let result = fetcher.fetch(&request).await;
                (raw, request, result)
            });
        }

        let mut cached = 0;
        while let Some(joined) = tasks.join_next().await {
            let Ok((raw, request, result)) = joined else {
                warn!("CACHE_URLS fetch task aborted");
                continue;
            };
            match result {
                Ok(response) if response.is_cacheable() => {
                    self.registry.put(&namespace, request.cache_key(), response).await;
                    cached += 1;
                }
                Ok(response) => {
                    debug!("Not caching url={}: status {}", raw, response.status);
                    failures.push(raw);
                }
                Err(e) => {
                    debug!("Not caching url={}: {}", raw, e);
                    failures.push(raw);
                }
            }
        }

        failures.sort();
        let failed = failures.len();
        if let Some(metrics) = &self.metrics {
            metrics.record_urls(cached, failed);
        }
        info!("CACHE_URLS: cached={} failed={} namespace={}", cached, failed, namespace.name);
        ControlReply::UrlsCached {
            cached,
            failed,
            failures,
        }
    }

    async fn cache_status(&self) -> ControlReply {
        ControlReply::CacheStatus {
            version: self.lifecycle.version().to_string(),
            state: self.lifecycle.state(),
            namespaces: self.registry.summaries().await,
        }
    }

    async fn clear_cache(&self) -> ControlReply {
        match self.registry.clear().await {
            Ok(deleted) => {
                info!("CLEAR_CACHE deleted {} namespaces", deleted.len());
                if let Some(metrics) = &self.metrics {
                    metrics.record_cleared(deleted.len());
                }
                ControlReply::CacheCleared { deleted }
            }
            Err(e) => {
                warn!("CLEAR_CACHE failed: {}", e);
                ControlReply::error(e.to_string())
            }
        }
    }
}
