//! Metrics HTTP Endpoint
//!
//! A small HTTP server on its own port exposing:
//!
//! - `/metrics` - worker counters and namespace registry counters in
//!   Prometheus text format, followed by anything registered in the default
//!   prometheus registry (control channel metrics)
//! - `/health` - lifecycle-derived health as JSON

use crate::lifecycle::{LifecycleManager, WorkerState};
use crate::metrics::{MetricsSnapshot, WorkerMetrics};
use crate::registry::{NamespaceRegistry, RegistryStats};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Health of the worker as seen by a load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Activated and controlling clients
    Healthy,
    /// Installing, waiting or activating; requests pass through
    Degraded,
    /// Install failed
    Unhealthy,
}

impl HealthStatus {
    pub fn from_state(state: WorkerState) -> Self {
        match state {
            WorkerState::Activated => HealthStatus::Healthy,
            WorkerState::Redundant => HealthStatus::Unhealthy,
            WorkerState::Parsed
            | WorkerState::Installing
            | WorkerState::Installed
            | WorkerState::Activating => HealthStatus::Degraded,
        }
    }

    pub fn to_status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Metrics endpoint server
#[derive(Clone)]
pub struct MetricsEndpoint {
    metrics: Arc<WorkerMetrics>,
    lifecycle: Option<Arc<LifecycleManager>>,
    registry: Option<Arc<NamespaceRegistry>>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    pub fn new(metrics: Arc<WorkerMetrics>, addr: SocketAddr) -> Self {
        Self {
            metrics,
            lifecycle: None,
            registry: None,
            addr,
        }
    }

    /// Report health from the worker's lifecycle state
    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Also export the registry's storage counters
    pub fn with_registry(mut self, registry: Arc<NamespaceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Serve until the process exits
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);
        info!("Metrics available at http://{}/metrics", self.addr);

        let endpoint = Arc::new(self);
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let endpoint = Arc::clone(&endpoint);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let endpoint = Arc::clone(&endpoint);
                    async move { endpoint.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        Ok(self.route(req.uri().path()))
    }

    fn route(&self, path: &str) -> Response<Full<Bytes>> {
        match path {
            "/metrics" => self.metrics_response(),
            "/health" => self.health_response(),
            _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".into()),
        }
    }

    fn metrics_response(&self) -> Response<Full<Bytes>> {
        let mut body = format_prometheus_metrics(&self.metrics.get_stats());
        if let Some(registry) = &self.registry {
            body.push_str(&format_registry_metrics(&registry.get_stats()));
        }

        let mut buffer = Vec::new();
        match TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
            Ok(()) => body.push_str(&String::from_utf8_lossy(&buffer)),
            Err(e) => warn!("Failed to encode prometheus registry: {}", e),
        }

        text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            body,
        )
    }

    fn health_response(&self) -> Response<Full<Bytes>> {
        let (health, state) = match &self.lifecycle {
            Some(lifecycle) => {
                let state = lifecycle.state();
                (HealthStatus::from_state(state), Some(state))
            }
            None => (HealthStatus::Healthy, None),
        };
        let body = serde_json::json!({
            "status": health.as_str(),
            "state": state,
        })
        .to_string();
        text_response(health.to_status_code(), "application/json", body)
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP offline_cache_{} {}", name, help);
    let _ = writeln!(out, "# TYPE offline_cache_{} counter", name);
    let _ = writeln!(out, "offline_cache_{} {}\n", name, value);
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP offline_cache_{} {}", name, help);
    let _ = writeln!(out, "# TYPE offline_cache_{} gauge", name);
    let _ = writeln!(out, "offline_cache_{} {:.2}\n", name, value);
}

/// Format worker metrics in Prometheus exposition format
pub fn format_prometheus_metrics(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    counter(&mut out, "requests_total", "Total number of intercepted requests", snapshot.total_requests);
    counter(&mut out, "handled_requests_total", "Requests answered by the cache subsystem", snapshot.handled_requests);
    counter(&mut out, "passthrough_requests_total", "Requests forwarded to the network unchanged", snapshot.passthrough_requests);

    counter(&mut out, "responses_from_cache_total", "Responses served from a namespace", snapshot.responses_from_cache);
    counter(&mut out, "responses_from_network_total", "Responses served from the network", snapshot.responses_from_network);
    counter(&mut out, "responses_from_fallback_total", "Synthetic fallback responses served", snapshot.responses_from_fallback);

    counter(&mut out, "cache_hits_total", "Number of cache hits", snapshot.cache_hits);
    counter(&mut out, "cache_misses_total", "Number of cache misses", snapshot.cache_misses);
    gauge(&mut out, "cache_hit_rate", "Cache hit rate percentage", snapshot.cache_hit_rate());

    counter(&mut out, "network_fetches_total", "Total number of network fetches", snapshot.network_fetches);
    counter(&mut out, "failed_network_fetches_total", "Network fetches that failed", snapshot.failed_network_fetches);
    gauge(&mut out, "network_failure_rate", "Network failure rate percentage", snapshot.network_failure_rate());

    counter(&mut out, "revalidations_total", "Background revalidations completed", snapshot.revalidations);
    counter(&mut out, "failed_revalidations_total", "Background revalidations that failed", snapshot.failed_revalidations);

    counter(&mut out, "bytes_from_network_total", "Total bytes received from the network", snapshot.bytes_from_network);
    counter(&mut out, "bytes_from_cache_total", "Total bytes served from namespaces", snapshot.bytes_from_cache);

    gauge(&mut out, "request_duration_ms_avg", "Average handled request duration in milliseconds", snapshot.avg_request_duration_ms());
    gauge(&mut out, "network_duration_ms_avg", "Average network fetch duration in milliseconds", snapshot.avg_network_duration_ms());

    out
}

/// Format namespace registry counters in Prometheus exposition format
pub fn format_registry_metrics(stats: &RegistryStats) -> String {
    let mut out = String::new();
    counter(&mut out, "registry_hits_total", "Registry lookups that found an entry", stats.hits);
    counter(&mut out, "registry_misses_total", "Registry lookups that found nothing", stats.misses);
    counter(&mut out, "registry_writes_total", "Entries written to storage", stats.writes);
    counter(&mut out, "registry_errors_total", "Storage operations that failed", stats.errors);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceConfig;
    use crate::models::{FetchRequest, NamespaceKind, ResponseSnapshot};
    use crate::storage::MemoryStorage;
    use crate::strategy::ResponseSource;
    use http_body_util::BodyExt;
    use std::time::Duration;

    fn endpoint() -> MetricsEndpoint {
        MetricsEndpoint::new(
            Arc::new(WorkerMetrics::new()),
            "127.0.0.1:0".parse().unwrap(),
        )
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = WorkerMetrics::new();
        metrics.record_request(true);
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_network_fetch(true, Duration::from_millis(4));
        metrics.record_network_fetch(false, Duration::from_millis(6));
        metrics.record_response_source(ResponseSource::Fallback);
        metrics.record_bytes_from_network(1000);

        let output = format_prometheus_metrics(&metrics.get_stats());

        assert!(output.contains("offline_cache_requests_total 3"));
        assert!(output.contains("offline_cache_handled_requests_total 2"));
        assert!(output.contains("offline_cache_passthrough_requests_total 1"));
        assert!(output.contains("offline_cache_cache_hits_total 1"));
        assert!(output.contains("offline_cache_failed_network_fetches_total 1"));
        assert!(output.contains("offline_cache_responses_from_fallback_total 1"));
        assert!(output.contains("offline_cache_bytes_from_network_total 1000"));
        assert!(output.contains("offline_cache_cache_hit_rate 50.00"));
        assert!(output.contains("# TYPE offline_cache_requests_total counter"));
        assert!(output.contains("# TYPE offline_cache_cache_hit_rate gauge"));
    }

    #[test]
    fn test_format_prometheus_metrics_empty() {
        let output = format_prometheus_metrics(&MetricsSnapshot::default());
        assert!(output.contains("offline_cache_requests_total 0"));
        assert!(output.contains("offline_cache_cache_hit_rate 0.00"));
    }

    #[test]
    fn test_health_from_state() {
        assert_eq!(HealthStatus::from_state(WorkerState::Activated), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_state(WorkerState::Installed), HealthStatus::Degraded);
        assert_eq!(
            HealthStatus::from_state(WorkerState::Redundant).to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_routes() {
        let endpoint = endpoint();

        let metrics = endpoint.route("/metrics");
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = metrics.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("offline_cache_requests_total"));

        let health = endpoint.route("/health");
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(health.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        assert_eq!(endpoint.route("/nope").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_include_registry_counters() {
        let registry = Arc::new(NamespaceRegistry::new(
            Arc::new(MemoryStorage::new()),
            NamespaceConfig::default(),
            "v1",
        ));
        let handle = registry.handle(NamespaceKind::Dynamic);
        let key = FetchRequest::get("http://localhost/index.html").unwrap().cache_key();
        assert!(registry.lookup(&handle, &key).await.is_none());
        registry.put(&handle, key.clone(), ResponseSnapshot::new(200, "hi")).await;
        assert!(registry.lookup(&handle, &key).await.is_some());

        let endpoint = endpoint().with_registry(Arc::clone(&registry));
        let body = endpoint.route("/metrics").into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("offline_cache_requests_total 0"));
        assert!(body.contains("offline_cache_registry_hits_total 1"));
        assert!(body.contains("offline_cache_registry_misses_total 1"));
        assert!(body.contains("offline_cache_registry_writes_total 1"));
        assert!(body.contains("offline_cache_registry_errors_total 0"));
        assert!(body.contains("# TYPE offline_cache_registry_hits_total counter"));

        let plain = self::endpoint().route("/metrics").into_body().collect().await.unwrap().to_bytes();
        assert!(!String::from_utf8_lossy(&plain).contains("offline_cache_registry_"));
    }
}
