//! Metrics collection for the offline cache worker
//!
//! Thread-safe counters using atomic operations. Tracks intercepted requests,
//! cache hits/misses, network fetches, fallbacks and background revalidations.

use crate::strategy::ResponseSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the worker
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    // Request statistics
    total_requests: AtomicU64,
    handled_requests: AtomicU64,
    passthrough_requests: AtomicU64,

    // Response sources
    responses_from_cache: AtomicU64,
    responses_from_network: AtomicU64,
    responses_from_fallback: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // Network statistics
    network_fetches: AtomicU64,
    failed_network_fetches: AtomicU64,

    // Background revalidation
    revalidations: AtomicU64,
    failed_revalidations: AtomicU64,

    // Byte statistics
    bytes_from_network: AtomicU64,
    bytes_from_cache: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_request_duration_us: AtomicU64,
    total_network_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub handled_requests: u64,
    pub passthrough_requests: u64,

    pub responses_from_cache: u64,
    pub responses_from_network: u64,
    pub responses_from_fallback: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,

    pub network_fetches: u64,
    pub failed_network_fetches: u64,

    pub revalidations: u64,
    pub failed_revalidations: u64,

    pub bytes_from_network: u64,
    pub bytes_from_cache: u64,

    pub total_request_duration_us: u64,
    pub total_network_duration_us: u64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an intercepted request
    ///
    /// # Arguments
    /// * `handled` - Whether the cache subsystem handled it (false = passthrough)
    pub fn record_request(&self, handled: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if handled {
            self.handled_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.passthrough_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record which layer produced the final response
    pub fn record_response_source(&self, source: ResponseSource) {
        let counter = match source {
            ResponseSource::Cache => &self.responses_from_cache,
            ResponseSource::Network => &self.responses_from_network,
            ResponseSource::Fallback => &self.responses_from_fallback,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a network fetch and how long it took
    pub fn record_network_fetch(&self, success: bool, duration: Duration) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_network_fetches.fetch_add(1, Ordering::Relaxed);
        }
        self.total_network_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record the completion of a background revalidation
    pub fn record_revalidation(&self, success: bool) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_revalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_bytes_from_network(&self, bytes: u64) {
        self.bytes_from_network.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded independently, so the snapshot may not be perfectly
    /// consistent while requests are in flight.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            handled_requests: self.handled_requests.load(Ordering::Relaxed),
            passthrough_requests: self.passthrough_requests.load(Ordering::Relaxed),
            responses_from_cache: self.responses_from_cache.load(Ordering::Relaxed),
            responses_from_network: self.responses_from_network.load(Ordering::Relaxed),
            responses_from_fallback: self.responses_from_fallback.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            failed_network_fetches: self.failed_network_fetches.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            failed_revalidations: self.failed_revalidations.load(Ordering::Relaxed),
            bytes_from_network: self.bytes_from_network.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
            total_network_duration_us: self.total_network_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.handled_requests,
            &self.passthrough_requests,
            &self.responses_from_cache,
            &self.responses_from_network,
            &self.responses_from_fallback,
            &self.cache_hits,
            &self.cache_misses,
            &self.network_fetches,
            &self.failed_network_fetches,
            &self.revalidations,
            &self.failed_revalidations,
            &self.bytes_from_network,
            &self.bytes_from_cache,
            &self.total_request_duration_us,
            &self.total_network_duration_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Network failure rate as a percentage (0.0 to 100.0)
    pub fn network_failure_rate(&self) -> f64 {
        if self.network_fetches == 0 {
            0.0
        } else {
            (self.failed_network_fetches as f64 / self.network_fetches as f64) * 100.0
        }
    }

    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.handled_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.handled_requests as f64) / 1000.0
        }
    }

    pub fn avg_network_duration_ms(&self) -> f64 {
        if self.network_fetches == 0 {
            0.0
        } else {
            (self.total_network_duration_us as f64 / self.network_fetches as f64) / 1000.0
        }
    }
}
