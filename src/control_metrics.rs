//! Prometheus metrics for control channel messages

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramOpts, HistogramVec, Opts,
    Registry,
};
use std::sync::Arc;

const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Metrics for control messages
#[derive(Clone)]
pub struct ControlMetrics {
    /// Messages received, by type
    pub messages_total: Arc<CounterVec>,

    /// Messages by type and result (success/failure)
    pub messages_by_result: Arc<CounterVec>,

    /// URLs handled by CACHE_URLS, by outcome (cached/failed)
    pub urls_total: Arc<CounterVec>,

    /// Namespaces removed by CLEAR_CACHE
    pub namespaces_cleared_total: Arc<CounterVec>,

    pub message_duration_seconds: Arc<HistogramVec>,
}

impl ControlMetrics {
    /// Create metrics registered in the default prometheus registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let messages_total = register_counter_vec!(
            "offline_cache_control_messages_total",
            "Total number of control messages received",
            &["type"]
        )?;

        let messages_by_result = register_counter_vec!(
            "offline_cache_control_messages_by_result",
            "Total number of control messages by result",
            &["type", "result"]
        )?;

        let urls_total = register_counter_vec!(
            "offline_cache_control_urls_total",
            "Total number of URLs handled by CACHE_URLS",
            &["outcome"]
        )?;

        let namespaces_cleared_total = register_counter_vec!(
            "offline_cache_control_namespaces_cleared_total",
            "Total number of namespaces deleted by CLEAR_CACHE",
            &["type"]
        )?;

        let message_duration_seconds = register_histogram_vec!(
            "offline_cache_control_message_duration_seconds",
            "Duration of control message handling in seconds",
            &["type"],
            DURATION_BUCKETS.to_vec()
        )?;

        Ok(Self {
            messages_total: Arc::new(messages_total),
            messages_by_result: Arc::new(messages_by_result),
            urls_total: Arc::new(urls_total),
            namespaces_cleared_total: Arc::new(namespaces_cleared_total),
            message_duration_seconds: Arc::new(message_duration_seconds),
        })
    }

    /// Create metrics with custom registry
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_total = CounterVec::new(
            Opts::new(
                "offline_cache_control_messages_total",
                "Total number of control messages received",
            ),
            &["type"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let messages_by_result = CounterVec::new(
            Opts::new(
                "offline_cache_control_messages_by_result",
                "Total number of control messages by result",
            ),
            &["type", "result"],
        )?;
        registry.register(Box::new(messages_by_result.clone()))?;

        let urls_total = CounterVec::new(
            Opts::new(
                "offline_cache_control_urls_total",
                "Total number of URLs handled by CACHE_URLS",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(urls_total.clone()))?;

        let namespaces_cleared_total = CounterVec::new(
            Opts::new(
                "offline_cache_control_namespaces_cleared_total",
                "Total number of namespaces deleted by CLEAR_CACHE",
            ),
            &["type"],
        )?;
        registry.register(Box::new(namespaces_cleared_total.clone()))?;

        let message_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "offline_cache_control_message_duration_seconds",
                "Duration of control message handling in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["type"],
        )?;
        registry.register(Box::new(message_duration_seconds.clone()))?;

        Ok(Self {
            messages_total: Arc::new(messages_total),
            messages_by_result: Arc::new(messages_by_result),
            urls_total: Arc::new(urls_total),
            namespaces_cleared_total: Arc::new(namespaces_cleared_total),
            message_duration_seconds: Arc::new(message_duration_seconds),
        })
    }

    pub fn record_message(&self, kind: &str) {
        self.messages_total.with_label_values(&[kind]).inc();
    }

    pub fn record_result(&self, kind: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.messages_by_result
            .with_label_values(&[kind, result])
            .inc();
    }

    pub fn record_urls(&self, cached: usize, failed: usize) {
        self.urls_total
            .with_label_values(&["cached"])
            .inc_by(cached as f64);
        self.urls_total
            .with_label_values(&["failed"])
            .inc_by(failed as f64);
    }

    pub fn record_cleared(&self, count: usize) {
        self.namespaces_cleared_total
            .with_label_values(&["CLEAR_CACHE"])
            .inc_by(count as f64);
    }

    pub fn record_duration(&self, kind: &str, duration_secs: f64) {
        self.message_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }
}
