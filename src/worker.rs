//! The offline worker: one object owning every component for one version
//!
//! The host drives the worker through four hooks, mirroring the events a
//! browser delivers to a service worker:
//!
//! - [`OfflineWorker::on_install`] precaches the static asset list
//! - [`OfflineWorker::on_activate`] evicts old namespaces and claims clients
//! - [`OfflineWorker::on_fetch`] answers an intercepted request
//! - [`OfflineWorker::on_message`] handles a control message
//!
//! `on_fetch` never fails: when neither cache nor network can answer, the
//! fallback generator does.

use crate::classifier::RequestClassifier;
use crate::config::WorkerConfig;
use crate::control::{ControlHandler, ControlMessage, ControlReply};
use crate::control_metrics::ControlMetrics;
use crate::dispatcher::{Dispatch, StrategyDispatcher, StrategyTable};
use crate::error::Result;
use crate::fallback::FallbackGenerator;
use crate::lifecycle::{
    ActivationReport, ClientRegistry, InstallReport, LifecycleManager, WorkerState,
};
use crate::metrics::WorkerMetrics;
use crate::models::{FetchRequest, ResponseSnapshot};
use crate::network::Fetcher;
use crate::registry::NamespaceRegistry;
use crate::storage::CacheStorage;
use crate::strategy::{ResponseSource, StrategyExecutor};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What the host should do with an intercepted request
#[derive(Debug)]
pub enum FetchOutcome {
    /// Forward to the network unchanged
    Passthrough,
    /// Answer with this response
    Respond {
        response: ResponseSnapshot,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond { response, .. } => Some(response),
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond { source, .. } => Some(*source),
        }
    }
}

pub struct OfflineWorker {
    config: Arc<WorkerConfig>,
    registry: Arc<NamespaceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    dispatcher: StrategyDispatcher,
    fallback: FallbackGenerator,
    lifecycle: Arc<LifecycleManager>,
    control: ControlHandler,
    metrics: Arc<WorkerMetrics>,
}

impl OfflineWorker {
    /// Build a worker with its own client registry
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        Self::with_clients(config, storage, fetcher, Arc::new(ClientRegistry::new()))
    }

    /// Build a worker sharing `clients` with other worker generations
    pub fn with_clients(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<ClientRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let origin = config.origin_url()?;

        let metrics = Arc::new(WorkerMetrics::new());
        let registry = Arc::new(NamespaceRegistry::from_config(storage, &config));
        let executor = StrategyExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&fetcher),
            Arc::clone(&metrics),
        );
        let dispatcher = StrategyDispatcher::new(
            RequestClassifier::from_config(&config)?,
            StrategyTable::with_overrides(&config.strategies),
            Arc::clone(&registry),
            executor,
        );
        let fallback = FallbackGenerator::new(&config.fallback, config.version.clone());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&fetcher),
            clients,
        ));
        let control = ControlHandler::new(
            Arc::clone(&lifecycle),
            Arc::clone(&registry),
            Arc::clone(&fetcher),
            origin,
        );

        Ok(OfflineWorker {
            config,
            registry,
            fetcher,
            dispatcher,
            fallback,
            lifecycle,
            control,
            metrics,
        })
    }

    /// Enable Prometheus metrics for control messages
    pub fn with_control_metrics(mut self, metrics: Arc<ControlMetrics>) -> Self {
        self.control = ControlHandler::new(
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.registry),
            Arc::clone(&self.fetcher),
            self.dispatcher.classifier().origin().clone(),
        )
        .with_metrics(metrics);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    pub fn metrics_arc(&self) -> Arc<WorkerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn on_install(&self) -> Result<InstallReport> {
        self.lifecycle.install().await
    }

    pub async fn on_activate(&self) -> Result<ActivationReport> {
        self.lifecycle.activate().await
    }

    /// Install, then activate unless old clients still hold us back
    pub async fn start(&self) -> Result<WorkerState> {
        self.on_install().await?;
        let activated = self.lifecycle.activate_if_ready().await?;
        if activated.is_none() && self.state() == WorkerState::Installed {
            info!(
                "Version {} installed and waiting for {} old clients",
                self.config.version,
                self.lifecycle
                    .clients()
                    .controlled_by_other(&self.config.version)
            );
        }
        Ok(self.state())
    }

    /// Answer an intercepted request
    ///
    /// Only an activated worker intercepts; before that every request passes
    /// through.
    pub async fn on_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let start = Instant::now();

        if self.state() != WorkerState::Activated {
            debug!(
                "Worker not active (state={}), passing through url={}",
                self.state(),
                request.url
            );
            self.metrics.record_request(false);
            return FetchOutcome::Passthrough;
        }

        let resolution = match self.dispatcher.resolve(request).await {
            Dispatch::NotHandled => {
                debug!("Passthrough: method={} url={}", request.method, request.url);
                self.metrics.record_request(false);
                return FetchOutcome::Passthrough;
            }
            Dispatch::Handled(resolution) => resolution,
        };
        self.metrics.record_request(true);

        let (response, source) = match resolution.result {
            // A pending revalidation handle is dropped here and keeps running
            Ok(outcome) => (outcome.response, outcome.source),
            Err(e) => {
                warn!(
                    "Serving fallback: url={} classification={} strategy={} error={}",
                    request.url,
                    resolution.classification.as_str(),
                    resolution.strategy.as_str(),
                    e
                );
                let response = self.fallback.generate(
                    resolution.classification,
                    resolution.destination,
                    request,
                );
                (response, ResponseSource::Fallback)
            }
        };

        let duration = start.elapsed();
        self.metrics.record_response_source(source);
        self.metrics.record_request_duration(duration);
        debug!(
            "Request completed: url={} source={} status={} namespace={} duration_ms={}",
            request.url,
            source.as_str(),
            response.status,
            resolution.namespace.name,
            duration.as_millis()
        );

        FetchOutcome::Respond { response, source }
    }

    /// Handle a control message, replying on `port`
    pub async fn on_message(&self, message: ControlMessage, port: oneshot::Sender<ControlReply>) {
        self.control.dispatch(message, port).await;
    }

    /// Handle a raw JSON control message
    pub async fn handle_message_json(&self, body: &[u8]) -> ControlReply {
        self.control.handle_json(body).await
    }
}
