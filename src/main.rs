//! Offline cache worker host
//!
//! Loads configuration, installs and activates the worker, then serves
//! intercepted traffic and the optional metrics endpoint.

use anyhow::Context;
use offline_cache::config::StorageBackend;
use offline_cache::control_metrics::ControlMetrics;
use offline_cache::metrics_endpoint::MetricsEndpoint;
use offline_cache::server::WorkerServer;
use offline_cache::storage::{CacheStorage, DiskStorage, MemoryStorage};
use offline_cache::{HttpFetcher, OfflineWorker, WorkerConfig};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// # Usage
/// ```bash
/// # Start with default config (offline_cache.yaml)
/// offline-cache
///
/// # Start with custom config
/// offline-cache /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    info!("Starting offline cache worker");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "offline_cache.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = match WorkerConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            info!("  - Version: {}", cfg.version);
            info!("  - Origin: {}", cfg.origin);
            info!("  - Precache paths: {}", cfg.precache.len());
            info!("  - API prefixes: {:?}", cfg.api_prefixes);
            info!("  - Storage backend: {:?}", cfg.storage.backend);
            info!("  - Network timeout: {} ms", cfg.network_timeout_ms);
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure the configuration file exists and is valid");
            std::process::exit(1);
        }
    };

    let storage: Arc<dyn CacheStorage> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Disk => {
            let dir = config
                .storage
                .directory
                .clone()
                .context("storage.directory is required for the disk backend")?;
            Arc::new(DiskStorage::open(&dir).await?)
        }
    };

    let fetcher = Arc::new(HttpFetcher::with_timeout(config.network_timeout())?);
    let listen: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen_address '{}'", config.listen_address))?;
    let metrics_endpoint = config.metrics_endpoint.clone().filter(|m| m.enabled);

    let mut worker = OfflineWorker::new(config, storage, fetcher)?;
    match ControlMetrics::new() {
        Ok(metrics) => worker = worker.with_control_metrics(Arc::new(metrics)),
        Err(e) => warn!("Control metrics disabled: {}", e),
    }
    let worker = Arc::new(worker);

    let state = worker
        .start()
        .await
        .context("worker install failed; nothing will be intercepted")?;
    info!("Worker version {} is {}", worker.version(), state);

    if let Some(endpoint_config) = metrics_endpoint {
        let addr: SocketAddr = endpoint_config
            .address
            .parse()
            .with_context(|| format!("invalid metrics address '{}'", endpoint_config.address))?;
        let endpoint = MetricsEndpoint::new(worker.metrics_arc(), addr)
            .with_lifecycle(Arc::clone(worker.lifecycle()))
            .with_registry(Arc::clone(worker.registry()));
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    WorkerServer::new(worker)?.start(listen).await?;
    Ok(())
}
