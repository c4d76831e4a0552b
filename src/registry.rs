//! Versioned cache namespace registry
//!
//! The registry is a view of a [`CacheStorage`] for one deploy version. It
//! maps the three namespace kinds to their versioned names and absorbs
//! storage failures: a failed read is a miss and a failed write is a no-op,
//! both logged. Only the bulk write used by precache reports its error.

use crate::config::{NamespaceConfig, WorkerConfig};
use crate::error::Result;
use crate::models::{CacheKey, CacheNamespace, CachedEntry, NamespaceKind, ResponseSnapshot};
use crate::storage::CacheStorage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

/// Entry count and URLs of one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub name: String,
    pub entries: usize,
    pub urls: Vec<String>,
}

pub struct NamespaceRegistry {
    storage: Arc<dyn CacheStorage>,
    prefixes: NamespaceConfig,
    version: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl NamespaceRegistry {
    pub fn new(storage: Arc<dyn CacheStorage>, prefixes: NamespaceConfig, version: impl Into<String>) -> Self {
        NamespaceRegistry {
            storage,
            prefixes,
            version: version.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn from_config(storage: Arc<dyn CacheStorage>, config: &WorkerConfig) -> Self {
        Self::new(storage, config.namespaces.clone(), config.version.clone())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn storage(&self) -> Arc<dyn CacheStorage> {
        Arc::clone(&self.storage)
    }

    /// The current namespace for `kind`, without touching storage
    ///
    /// Dynamic and image namespaces come into existence on first write.
    pub fn handle(&self, kind: NamespaceKind) -> CacheNamespace {
        CacheNamespace::new(self.prefixes.prefix(kind), &self.version, kind)
    }

    /// Open the current namespace for `kind`, creating it in storage
    pub async fn open(&self, kind: NamespaceKind) -> Result<CacheNamespace> {
        let handle = self.handle(kind);
        self.storage.create(&handle.name).await?;
        debug!("Opened namespace {}", handle.name);
        Ok(handle)
    }

    /// Names that survive activation for this version
    pub fn allow_list(&self) -> Vec<String> {
        NamespaceKind::ALL
            .iter()
            .map(|kind| self.handle(*kind).name)
            .collect()
    }

    /// Look up an entry; storage failures read as a miss
    pub async fn lookup(&self, handle: &CacheNamespace, key: &CacheKey) -> Option<CachedEntry> {
        match self.storage.get(&handle.name, key).await {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: namespace={} key={}", handle.name, key);
                Some(entry)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: namespace={} key={}", handle.name, key);
                None
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Cache read failed, treating as miss: namespace={} key={} error={}",
                    handle.name, key, e
                );
                None
            }
        }
    }

    /// Store a response, overwriting any entry for the same key
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn put(&self, handle: &CacheNamespace, key: CacheKey, response: ResponseSnapshot) {
        let entry = CachedEntry::new(key, response);
        let key_display = entry.key.to_string();
        match self.storage.put(&handle.name, entry).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!("Stored entry: namespace={} key={}", handle.name, key_display);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Cache write failed, skipping: namespace={} key={} error={}",
                    handle.name, key_display, e
                );
            }
        }
    }

    /// Bulk write; unlike `put`, the error is returned to the caller
    pub async fn put_all(
        &self,
        handle: &CacheNamespace,
        entries: Vec<(CacheKey, ResponseSnapshot)>,
    ) -> Result<()> {
        let count = entries.len();
        let entries = entries
            .into_iter()
            .map(|(key, response)| CachedEntry::new(key, response))
            .collect();
        self.storage.put_all(&handle.name, entries).await.map_err(|e| {
            self.errors.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        self.writes.fetch_add(count as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Every namespace in storage, including ones from older versions
    pub async fn list_namespaces(&self) -> Vec<String> {
        match self.storage.namespaces().await {
            Ok(names) => names,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to list namespaces: {}", e);
                Vec::new()
            }
        }
    }

    /// Delete a namespace by name; returns whether it existed
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let existed = self.storage.delete(name).await?;
        if existed {
            info!("Deleted namespace {}", name);
        }
        Ok(existed)
    }

    /// Delete every namespace, returning the names that were removed
    pub async fn clear(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.namespaces().await? {
            if self.delete(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    pub async fn keys(&self, name: &str) -> Vec<CacheKey> {
        match self.storage.keys(name).await {
            Ok(keys) => keys,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to list keys of namespace {}: {}", name, e);
                Vec::new()
            }
        }
    }

    /// Entry counts and URLs for every namespace in storage
    pub async fn summaries(&self) -> Vec<NamespaceSummary> {
        let mut summaries = Vec::new();
        for name in self.list_namespaces().await {
            let urls: Vec<String> = self.keys(&name).await.into_iter().map(|k| k.url).collect();
            summaries.push(NamespaceSummary {
                name,
                entries: urls.len(),
                urls,
            });
        }
        summaries
    }

    pub fn get_stats(&self) -> RegistryStats {
        RegistryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
