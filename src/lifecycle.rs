//! Worker lifecycle: install, wait, activate, claim
//!
//! ```text
//! Parsed ──install──▶ Installing ──ok──▶ Installed (waiting) ──activate──▶ Activating ──▶ Activated
//!                          │
//!                          └──err──▶ Redundant
//! ```
//!
//! Phases are serialized by an async mutex. Each phase is one future that
//! owns all of its internal work, so the host keeps the work alive simply by
//! awaiting it.
//!
//! Install is all-or-nothing: every precache path is fetched before anything
//! is written, and a namespace created by a failed install is deleted again.

use crate::config::WorkerConfig;
use crate::error::{CacheError, Result};
use crate::models::{CacheKey, CacheNamespace, FetchRequest, NamespaceKind, ResponseSnapshot};
use crate::network::Fetcher;
use crate::registry::NamespaceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting for old clients to go away
    Installed,
    Activating,
    Activated,
    /// Install failed; this generation will never control a client
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Open client contexts (pages) and the version controlling each
///
/// Shared between worker generations so a new version can claim clients the
/// old one controlled.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Option<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, optionally already controlled by `version`
    pub fn register(&self, id: impl Into<String>, controller: Option<&str>) {
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(id.into(), controller.map(str::to_string));
        }
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.clients
            .write()
            .map(|mut clients| clients.remove(id).is_some())
            .unwrap_or(false)
    }

    pub fn controller_of(&self, id: &str) -> Option<String> {
        self.clients
            .read()
            .ok()
            .and_then(|clients| clients.get(id).cloned().flatten())
    }

    pub fn len(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clients controlled by some version other than `version`
    pub fn controlled_by_other(&self, version: &str) -> usize {
        self.clients
            .read()
            .map(|clients| {
                clients
                    .values()
                    .filter(|c| matches!(c, Some(v) if v != version))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Put every client under `version`; returns how many changed controller
    pub fn claim(&self, version: &str) -> usize {
        let Ok(mut clients) = self.clients.write() else {
            return 0;
        };
        let mut claimed = 0;
        for controller in clients.values_mut() {
            if controller.as_deref() != Some(version) {
                *controller = Some(version.to_string());
                claimed += 1;
            }
        }
        claimed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub version: String,
    pub namespace: String,
    pub precached: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub version: String,
    pub deleted: Vec<String>,
    pub claimed: usize,
}

pub struct LifecycleManager {
    config: Arc<WorkerConfig>,
    registry: Arc<NamespaceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<ClientRegistry>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    phase: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<WorkerConfig>,
        registry: Arc<NamespaceRegistry>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        let skip_waiting = AtomicBool::new(config.skip_waiting_on_install);
        LifecycleManager {
            config,
            registry,
            fetcher,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting,
            phase: Mutex::new(()),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(WorkerState::Redundant)
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    fn set_state(&self, next: WorkerState) {
        if let Ok(mut state) = self.state.write() {
            debug!("Lifecycle {} -> {} (version={})", *state, next, self.config.version);
            *state = next;
        }
    }

    fn transition(&self, allowed: &[WorkerState], next: WorkerState) -> Result<()> {
        let current = self.state();
        if !allowed.contains(&current) {
            return Err(CacheError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.set_state(next);
        Ok(())
    }

    /// Precache the fixed asset list into the new static namespace
    pub async fn install(&self) -> Result<InstallReport> {
        let _phase = self.phase.lock().await;
        self.transition(
            &[WorkerState::Parsed, WorkerState::Redundant],
            WorkerState::Installing,
        )?;
        info!(
            "Installing version {} ({} precache paths)",
            self.config.version,
            self.config.precache.len()
        );

        let handle = self.registry.handle(NamespaceKind::Static);
        let preexisting = self
            .registry
            .list_namespaces()
            .await
            .contains(&handle.name);

        match self.precache(&handle).await {
            Ok(precached) => {
                self.set_state(WorkerState::Installed);
                info!(
                    "Installed version {}: {} entries in {}",
                    self.config.version, precached, handle.name
                );
                Ok(InstallReport {
                    version: self.config.version.clone(),
                    namespace: handle.name,
                    precached,
                })
            }
            Err(e) => {
                warn!("Install of version {} failed: {}", self.config.version, e);
                if !preexisting {
                    if let Err(del) = self.registry.delete(&handle.name).await {
                        warn!("Failed to discard namespace {}: {}", handle.name, del);
                    }
                }
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self, handle: &CacheNamespace) -> Result<usize> {
        self.registry.open(NamespaceKind::Static).await?;
        let origin = self.config.origin_url()?;

        let mut tasks = JoinSet::new();
        for path in &self.config.precache {
            let url = origin.join(path).map_err(|e| CacheError::PrecacheFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let request = FetchRequest::get(url.as_str())?;
            let fetcher = Arc::clone(&self.fetcher);
            let path = path.clone();
            tasks.spawn(async move {
                let result = fetcher.fetch(&request).await;
                (path, request.cache_key(), result)
            });
        }

        let mut entries: Vec<(CacheKey, ResponseSnapshot)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, key, result) = joined.map_err(|e| {
                CacheError::InternalError(format!("Precache task failed: {}", e))
            })?;
            let response = result.map_err(|e| CacheError::PrecacheFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            if !response.is_cacheable() {
                return Err(CacheError::PrecacheFailed {
                    path,
                    reason: format!("status {}", response.status),
                });
            }
            entries.push((key, response));
        }

        let count = entries.len();
        self.registry.put_all(handle, entries).await?;
        Ok(count)
    }

    /// Whether an installed worker may activate now
    pub fn ready_to_activate(&self) -> bool {
        self.state() == WorkerState::Installed
            && (self.skip_waiting.load(Ordering::SeqCst)
                || self.clients.controlled_by_other(&self.config.version) == 0)
    }

    /// Evict namespaces outside the allow-list and claim every client
    pub async fn activate(&self) -> Result<ActivationReport> {
        let _phase = self.phase.lock().await;
        self.activate_locked().await
    }

    /// Activate if nothing holds us back, deciding under the phase lock
    pub async fn activate_if_ready(&self) -> Result<Option<ActivationReport>> {
        let _phase = self.phase.lock().await;
        if self.ready_to_activate() {
            self.activate_locked().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Activation body; the caller holds the phase lock
    async fn activate_locked(&self) -> Result<ActivationReport> {
        self.transition(&[WorkerState::Installed], WorkerState::Activating)?;
        info!("Activating version {}", self.config.version);

        let allow_list = self.registry.allow_list();
        let mut deleted = Vec::new();
        for name in self.registry.list_namespaces().await {
            if allow_list.contains(&name) {
                continue;
            }
            match self.registry.delete(&name).await {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => warn!("Failed to delete stale namespace {}: {}", name, e),
            }
        }

        let claimed = self.clients.claim(&self.config.version);
        self.set_state(WorkerState::Activated);
        info!(
            "Activated version {}: deleted {:?}, claimed {} clients",
            self.config.version, deleted, claimed
        );

        Ok(ActivationReport {
            version: self.config.version.clone(),
            deleted,
            claimed,
        })
    }

    /// Stop waiting for old clients
    ///
    /// If the worker is already installed it activates now; if it is still
    /// installing, activation follows as soon as install succeeds.
    pub async fn skip_waiting(&self) -> Result<WorkerState> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        let _phase = self.phase.lock().await;
        if self.state() == WorkerState::Installed {
            self.activate_locked().await?;
        }
        Ok(self.state())
    }

    /// A client went away; activate if it was the last one holding us back
    pub async fn client_closed(&self, id: &str) -> Result<WorkerState> {
        self.clients.unregister(id);
        self.activate_if_ready().await?;
        Ok(self.state())
    }
}
