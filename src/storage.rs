//! Storage primitives backing the namespace registry
//!
//! Two backends are provided:
//! - [`MemoryStorage`]: in-process maps, lost when the worker restarts
//! - [`DiskStorage`]: one directory per namespace, one file per entry
//!
//! Disk entries are laid out as a 4-byte little-endian CRC32 of the payload
//! followed by the bincode-encoded [`CachedEntry`]. A file whose checksum does
//! not match reads as absent.

use crate::error::{CacheError, Result};
use crate::models::{CacheKey, CachedEntry};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Persistent key→response storage partitioned by namespace name
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the namespace if it does not exist yet
    async fn create(&self, namespace: &str) -> Result<()>;

    async fn get(&self, namespace: &str, key: &CacheKey) -> Result<Option<CachedEntry>>;

    /// Store an entry, creating the namespace on first write
    async fn put(&self, namespace: &str, entry: CachedEntry) -> Result<()>;

    /// Store many entries; an error means some may not have been written
    async fn put_all(&self, namespace: &str, entries: Vec<CachedEntry>) -> Result<()> {
        for entry in entries {
            self.put(namespace, entry).await?;
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<CacheKey>>;

    /// Names of every existing namespace, sorted
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Delete a namespace and all of its entries; returns whether it existed
    async fn delete(&self, namespace: &str) -> Result<bool>;
}

/// In-process storage
#[derive(Default)]
pub struct MemoryStorage {
    namespaces: RwLock<BTreeMap<String, HashMap<CacheKey, CachedEntry>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::StorageError("storage lock poisoned".to_string())
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn create(&self, namespace: &str) -> Result<()> {
        self.namespaces
            .write()
            .map_err(poisoned)?
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, entry: CachedEntry) -> Result<()> {
        self.namespaces
            .write()
            .map_err(poisoned)?
            .entry(namespace.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn put_all(&self, namespace: &str, entries: Vec<CachedEntry>) -> Result<()> {
        // Single lock acquisition so readers never see half of the batch
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        let target = namespaces.entry(namespace.to_string()).or_default();
        for entry in entries {
            target.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<CacheKey>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let mut keys: Vec<CacheKey> = namespaces
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self
            .namespaces
            .read()
            .map_err(poisoned)?
            .keys()
            .cloned()
            .collect())
    }

    async fn delete(&self, namespace: &str) -> Result<bool> {
        Ok(self
            .namespaces
            .write()
            .map_err(poisoned)?
            .remove(namespace)
            .is_some())
    }
}

/// Filesystem storage rooted at a directory
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Open (and create if needed) the storage root
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            CacheError::StorageError(format!(
                "Failed to create storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        debug!("Opened disk storage at {}", root.display());
        Ok(DiskStorage { root })
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        if namespace.is_empty()
            || namespace.starts_with('.')
            || namespace.contains(['/', '\\'])
        {
            return Err(CacheError::StorageError(format!(
                "Invalid namespace name '{}'",
                namespace
            )));
        }
        Ok(self.root.join(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &CacheKey) -> Result<PathBuf> {
        let hash = xxh3_64(key.to_string().as_bytes());
        Ok(self.namespace_dir(namespace)?.join(format!("{:016x}.entry", hash)))
    }

    fn encode(entry: &CachedEntry) -> Result<Vec<u8>> {
        let payload = bincode::serialize(entry)
            .map_err(|e| CacheError::StorageError(format!("Failed to encode entry: {}", e)))?;
        let mut data = Vec::with_capacity(payload.len() + 4);
        data.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        data.extend_from_slice(&payload);
        Ok(data)
    }

    fn decode(path: &Path, data: &[u8]) -> Option<CachedEntry> {
        if data.len() < 4 {
            warn!("Truncated cache file {}", path.display());
            return None;
        }
        let (checksum, payload) = data.split_at(4);
        let expected = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
        if crc32fast::hash(payload) != expected {
            warn!("Checksum mismatch in cache file {}", path.display());
            return None;
        }
        match bincode::deserialize(payload) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Undecodable cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn commit(tmp: &Path, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(tmp).await.map_err(|e| {
            CacheError::StorageError(format!("Failed to create cache file: {}", e))
        })?;
        file.write_all(data)
            .await
            .map_err(|e| CacheError::StorageError(format!("Failed to write entry: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::StorageError(format!("Failed to sync file: {}", e)))?;
        drop(file);

        // Rename is atomic: readers see the old entry or the new one, and the
        // last rename to complete owns the slot
        fs::rename(tmp, path)
            .await
            .map_err(|e| CacheError::StorageError(format!("Failed to commit entry: {}", e)))
    }

    async fn write_entry(&self, namespace: &str, entry: &CachedEntry) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            CacheError::StorageError(format!("Failed to create namespace directory: {}", e))
        })?;

        let path = self.entry_path(namespace, &entry.key)?;
        // Unique per write: concurrent writers of one key never share a temp file
        let tmp = path.with_extension(format!(
            "{}.tmp",
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let data = Self::encode(entry)?;

        if let Err(e) = Self::commit(&tmp, &path, &data).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove temp file {}: {}", tmp.display(), cleanup);
                }
            }
            return Err(e);
        }

        debug!(
            "Wrote entry to disk: namespace={} key={} ({} bytes)",
            namespace,
            entry.key,
            data.len()
        );
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn create(&self, namespace: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            CacheError::StorageError(format!("Failed to create namespace directory: {}", e))
        })
    }

    async fn get(&self, namespace: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let path = self.entry_path(namespace, key)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::StorageError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        // A hash collision shows up as a different key in the file
        Ok(Self::decode(&path, &data).filter(|entry| &entry.key == key))
    }

    async fn put(&self, namespace: &str, entry: CachedEntry) -> Result<()> {
        self.write_entry(namespace, &entry).await
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<CacheKey>> {
        let dir = self.namespace_dir(namespace)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("entry") {
                continue;
            }
            if let Ok(data) = fs::read(&path).await {
                if let Some(entry) = Self::decode(&path, &data) {
                    keys.push(entry.key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut reader = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, namespace: &str) -> Result<bool> {
        let dir = self.namespace_dir(namespace)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::StorageError(format!(
                "Failed to delete namespace {}: {}",
                namespace, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchRequest, ResponseSnapshot};
    use std::sync::Arc;

    fn entry(url: &str, body: &'static str) -> CachedEntry {
        let key = FetchRequest::get(url).unwrap().cache_key();
        CachedEntry::new(key, ResponseSnapshot::new(200, body))
    }

    #[tokio::test]
    async fn test_memory_put_overwrites() {
        let storage = MemoryStorage::new();
        let first = entry("http://localhost/a.css", "one");
        let second = entry("http://localhost/a.css", "two");
        storage.put("static-v1", first.clone()).await.unwrap();
        storage.put("static-v1", second.clone()).await.unwrap();

        let found = storage.get("static-v1", &first.key).await.unwrap().unwrap();
        assert_eq!(found.response.body, second.response.body);
        assert_eq!(storage.keys("static-v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_namespaces_are_independent() {
        let storage = MemoryStorage::new();
        let e = entry("http://localhost/a.css", "static");
        storage.put("static-v1", e.clone()).await.unwrap();

        assert!(storage.get("dynamic-v1", &e.key).await.unwrap().is_none());
        assert_eq!(storage.namespaces().await.unwrap(), vec!["static-v1".to_string()]);
        assert!(storage.delete("static-v1").await.unwrap());
        assert!(!storage.delete("static-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        let e = entry("http://localhost/index.html", "<html></html>");

        storage.put("dynamic-v1", e.clone()).await.unwrap();
        let found = storage.get("dynamic-v1", &e.key).await.unwrap().unwrap();
        assert_eq!(found, e);
        assert_eq!(storage.keys("dynamic-v1").await.unwrap(), vec![e.key.clone()]);
        assert_eq!(storage.namespaces().await.unwrap(), vec!["dynamic-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_disk_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let e = entry("http://localhost/app.js", "console.log(1)");
        {
            let storage = DiskStorage::open(dir.path()).await.unwrap();
            storage.put("static-v1", e.clone()).await.unwrap();
        }
        let reopened = DiskStorage::open(dir.path()).await.unwrap();
        assert!(reopened.get("static-v1", &e.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disk_corrupt_entry_reads_as_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        let e = entry("http://localhost/a.css", "body");
        storage.put("static-v1", e.clone()).await.unwrap();

        let path = storage.entry_path("static-v1", &e.key).unwrap();
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        std::fs::write(&path, data).unwrap();

        assert!(storage.get("static-v1", &e.key).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disk_concurrent_same_key_puts() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(DiskStorage::open(dir.path()).await.unwrap());
        let key = FetchRequest::get("http://localhost/app.js").unwrap().cache_key();
        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 256 * 1024]).collect();

        for _ in 0..4 {
            let mut handles = Vec::new();
            for body in &bodies {
                let storage = Arc::clone(&storage);
                let entry = CachedEntry::new(key.clone(), ResponseSnapshot::new(200, body.clone()));
                handles.push(tokio::spawn(async move { storage.put("static-v1", entry).await }));
            }
            for handle in handles {
                assert!(handle.await.unwrap().is_ok());
            }

            let found = storage.get("static-v1", &key).await.unwrap().unwrap();
            assert!(bodies.iter().any(|b| found.response.body.as_ref() == b.as_slice()));
        }

        let mut leftovers = Vec::new();
        for item in std::fs::read_dir(dir.path().join("static-v1")).unwrap() {
            let name = item.unwrap().file_name().to_string_lossy().into_owned();
            if !name.ends_with(".entry") {
                leftovers.push(name);
            }
        }
        assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
        assert_eq!(storage.keys("static-v1").await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_disk_rejects_path_like_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        assert!(storage.create("../escape").await.is_err());
        assert!(storage.create(".hidden").await.is_err());
    }

    #[tokio::test]
    async fn test_disk_delete_namespace() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        storage.create("image-v1").await.unwrap();
        assert!(storage.delete("image-v1").await.unwrap());
        assert!(!storage.delete("image-v1").await.unwrap());
        assert!(storage.namespaces().await.unwrap().is_empty());
    }
}
