//! Offline Cache Worker
//!
//! The offline resource caching layer of a web application's service worker,
//! run as an intercepting HTTP host in front of the application origin.
//!
//! # Overview
//!
//! Every same-origin GET request is classified, routed to a cache
//! consistency strategy, and answered from a versioned cache namespace, the
//! network, or a synthetic fallback. Deploying a new version precaches the
//! application shell, then evicts every namespace from older versions.
//!
//! # Features
//!
//! - **Request classification**: static assets, documents, API data, other
//! - **Three strategies**: cache-first, network-first, stale-while-revalidate
//! - **Versioned namespaces**: `static-vN`, `dynamic-vN`, `image-vN`
//! - **Lifecycle**: atomic install, waiting, activation with eviction, client claim
//! - **Offline fallbacks**: offline page, placeholder image, JSON 404
//! - **Control channel**: skip waiting, cache URLs, status, clear
//! - **Storage backends**: in-memory or on-disk with checksummed entries
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use offline_cache::{HttpFetcher, OfflineWorker, WorkerConfig};
//! use offline_cache::storage::MemoryStorage;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkerConfig::from_file("offline_cache.yaml")?;
//! let worker = OfflineWorker::new(
//!     config,
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(HttpFetcher::new()?),
//! )?;
//!
//! // Install the precache list and activate
//! worker.start().await?;
//!
//! let stats = worker.metrics().get_stats();
//! println!("Cache hit rate: {:.1}%", stats.cache_hit_rate());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`OfflineWorker`]: owns every component for one deploy version
//! - [`RequestClassifier`]: eligibility and classification
//! - [`StrategyDispatcher`]: classification → strategy → namespace
//! - [`StrategyExecutor`]: the three strategies
//! - [`NamespaceRegistry`]: versioned namespaces over a [`CacheStorage`]
//! - [`LifecycleManager`]: install / activate / skip-waiting
//! - [`FallbackGenerator`]: synthetic responses
//! - [`ControlHandler`]: control messages
//! - [`WorkerMetrics`]: runtime counters
//!
//! # Configuration
//!
//! ```yaml
//! version: "v2"
//! origin: "http://127.0.0.1:8080"
//! listen_address: "127.0.0.1:3000"
//! precache: ["/", "/index.html", "/styles.css", "/script.js", "/manifest.json"]
//! api_prefixes: ["/api/"]
//! strategies:
//!   other: network_first
//! storage:
//!   backend: disk
//!   directory: "/var/cache/offline"
//! metrics_endpoint:
//!   enabled: true
//!   address: "127.0.0.1:9090"
//! ```
//!
//! See [`WorkerConfig`] for every option.

pub mod classifier;
pub mod config;
pub mod control;
pub mod control_metrics;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod network;
pub mod registry;
pub mod server;
pub mod storage;
pub mod strategy;
pub mod worker;

// Re-export commonly used types
pub use classifier::{Classification, RequestClassifier};
pub use config::WorkerConfig;
pub use control::{ControlHandler, ControlMessage, ControlReply};
pub use dispatcher::{StrategyDispatcher, StrategyTable};
pub use error::{CacheError, Result};
pub use fallback::FallbackGenerator;
pub use lifecycle::{ClientRegistry, LifecycleManager, WorkerState};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{CacheKey, CacheNamespace, Destination, FetchRequest, NamespaceKind, ResponseSnapshot};
pub use network::{Fetcher, HttpFetcher};
pub use registry::NamespaceRegistry;
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use strategy::{ResponseSource, Strategy, StrategyExecutor};
pub use worker::{FetchOutcome, OfflineWorker};
