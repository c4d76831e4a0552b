//! Routing of classified requests to strategy executors

use crate::classifier::{Classification, RequestClassifier};
use crate::error::Result;
use crate::models::{CacheNamespace, Destination, FetchRequest, NamespaceKind};
use crate::registry::NamespaceRegistry;
use crate::strategy::{Strategy, StrategyExecutor, StrategyOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Classification → Strategy assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyTable {
    entries: BTreeMap<Classification, Strategy>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        let entries = BTreeMap::from([
            (Classification::StaticAsset, Strategy::CacheFirst),
            (Classification::Document, Strategy::NetworkFirst),
            (Classification::ApiData, Strategy::NetworkFirst),
            (Classification::Other, Strategy::StaleWhileRevalidate),
        ]);
        StrategyTable { entries }
    }
}

impl StrategyTable {
    /// Default table with per-classification overrides applied
    pub fn with_overrides(overrides: &BTreeMap<Classification, Strategy>) -> Self {
        let mut table = Self::default();
        table.entries.extend(overrides.iter().map(|(c, s)| (*c, *s)));
        table
    }

    pub fn strategy_for(&self, classification: Classification) -> Strategy {
        // Every classification is seeded in default(), overrides only replace
        self.entries
            .get(&classification)
            .copied()
            .unwrap_or(Strategy::NetworkFirst)
    }
}

/// Which namespace a classified request reads and writes
pub fn target_namespace(classification: Classification, destination: Destination) -> NamespaceKind {
    match classification {
        Classification::StaticAsset if destination.is_image() => NamespaceKind::Image,
        Classification::StaticAsset => NamespaceKind::Static,
        Classification::Document | Classification::ApiData | Classification::Other => {
            NamespaceKind::Dynamic
        }
    }
}

/// Everything decided about a handled request, plus the executor's result
#[derive(Debug)]
pub struct Resolution {
    pub classification: Classification,
    pub destination: Destination,
    pub strategy: Strategy,
    pub namespace: CacheNamespace,
    pub result: Result<StrategyOutcome>,
}

#[derive(Debug)]
pub enum Dispatch {
    /// Not cache-eligible; the caller must forward it to the network unchanged
    NotHandled,
    Handled(Resolution),
}

pub struct StrategyDispatcher {
    classifier: RequestClassifier,
    table: StrategyTable,
    registry: Arc<NamespaceRegistry>,
    executor: StrategyExecutor,
}

impl StrategyDispatcher {
    pub fn new(
        classifier: RequestClassifier,
        table: StrategyTable,
        registry: Arc<NamespaceRegistry>,
        executor: StrategyExecutor,
    ) -> Self {
        StrategyDispatcher {
            classifier,
            table,
            registry,
            executor,
        }
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    pub fn executor(&self) -> &StrategyExecutor {
        &self.executor
    }

    pub async fn resolve(&self, request: &FetchRequest) -> Dispatch {
        if !self.classifier.is_eligible(request) {
            return Dispatch::NotHandled;
        }

        let classification = self.classifier.classify(request);
        let destination = self.classifier.effective_destination(request);
        let strategy = self.table.strategy_for(classification);
        let namespace = self
            .registry
            .handle(target_namespace(classification, destination));

        debug!(
            "Dispatching url={} classification={} strategy={} namespace={}",
            request.url,
            classification.as_str(),
            strategy.as_str(),
            namespace.name
        );

        let result = self.executor.execute(strategy, request, &namespace).await;
        Dispatch::Handled(Resolution {
            classification,
            destination,
            strategy,
            namespace,
            result,
        })
    }
}
