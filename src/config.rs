//! Configuration management for the offline cache worker

use crate::classifier::Classification;
use crate::error::{CacheError, Result};
use crate::models::{CacheNamespace, NamespaceKind};
use crate::strategy::Strategy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for the offline cache worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deploy version token, appended to every namespace name (default: "v1")
    #[serde(default = "default_version")]
    pub version: String,

    /// Origin the worker is scoped to; only same-origin requests are cached
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Address the intercepting host listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Namespace name prefixes
    #[serde(default)]
    pub namespaces: NamespaceConfig,

    /// Fixed list of paths written to the static namespace at install
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Path prefixes classified as API data
    #[serde(default = "default_api_prefixes")]
    pub api_prefixes: Vec<String>,

    /// Per-classification strategy overrides
    #[serde(default)]
    pub strategies: BTreeMap<Classification, Strategy>,

    /// Network timeout in milliseconds (default: 10000)
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Storage backend for the namespace registry
    #[serde(default)]
    pub storage: StorageConfig,

    /// Synthetic offline page text
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Activate immediately after a successful install instead of waiting
    #[serde(default)]
    pub skip_waiting_on_install: bool,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Prefixes for the three logical namespaces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamespaceConfig {
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,

    #[serde(default = "default_dynamic_prefix")]
    pub dynamic_prefix: String,

    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            static_prefix: default_static_prefix(),
            dynamic_prefix: default_dynamic_prefix(),
            image_prefix: default_image_prefix(),
        }
    }
}

impl NamespaceConfig {
    pub fn prefix(&self, kind: NamespaceKind) -> &str {
        match kind {
            NamespaceKind::Static => &self.static_prefix,
            NamespaceKind::Dynamic => &self.dynamic_prefix,
            NamespaceKind::Image => &self.image_prefix,
        }
    }
}

/// Which storage primitive backs the registry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process only, lost on restart
    #[default]
    Memory,
    /// One directory per namespace, survives restarts
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory, required for the disk backend
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackConfig {
    #[serde(default = "default_offline_title")]
    pub offline_title: String,

    #[serde(default = "default_offline_message")]
    pub offline_message: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            offline_title: default_offline_title(),
            offline_message: default_offline_message(),
        }
    }
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_version() -> String {
    "v1".to_string()
}

fn default_origin() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_listen_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_static_prefix() -> String {
    "static".to_string()
}

fn default_dynamic_prefix() -> String {
    "dynamic".to_string()
}

fn default_image_prefix() -> String {
    "image".to_string()
}

fn default_precache() -> Vec<String> {
    vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/script.js".to_string(),
        "/manifest.json".to_string(),
    ]
}

fn default_api_prefixes() -> Vec<String> {
    vec!["/api/".to_string()]
}

fn default_network_timeout_ms() -> u64 {
    10_000
}

fn default_offline_title() -> String {
    "You are offline".to_string()
}

fn default_offline_message() -> String {
    "This page is not available without a network connection. It will load again once you are back online.".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            version: default_version(),
            origin: default_origin(),
            listen_address: default_listen_address(),
            namespaces: NamespaceConfig::default(),
            precache: default_precache(),
            api_prefixes: default_api_prefixes(),
            strategies: BTreeMap::new(),
            network_timeout_ms: default_network_timeout_ms(),
            storage: StorageConfig::default(),
            fallback: FallbackConfig::default(),
            skip_waiting_on_install: false,
            metrics_endpoint: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(WorkerConfig)` if loading and validation succeed
    /// * `Err(CacheError)` if the file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            CacheError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: WorkerConfig = serde_yaml::from_str(content).map_err(|e| {
            CacheError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - version must be non-empty and contain no whitespace
    /// - namespace prefixes must be non-empty and distinct
    /// - origin must be an absolute http(s) URL
    /// - precache paths and api prefixes must start with '/'
    /// - network_timeout_ms must be > 0
    /// - the disk backend requires a directory
    pub fn validate(&self) -> Result<()> {
        if !is_name_token(&self.version) || self.version.chars().any(char::is_whitespace) {
            return Err(CacheError::ConfigError(format!(
                "version must be a non-empty token without whitespace, path separators or a leading '.', got '{}'",
                self.version
            )));
        }

        let prefixes = [
            &self.namespaces.static_prefix,
            &self.namespaces.dynamic_prefix,
            &self.namespaces.image_prefix,
        ];
        if let Some(prefix) = prefixes.iter().find(|p| !is_name_token(p)) {
            return Err(CacheError::ConfigError(format!(
                "namespace prefixes must be non-empty without path separators or a leading '.', got '{}'",
                prefix
            )));
        }
        if prefixes[0] == prefixes[1] || prefixes[0] == prefixes[2] || prefixes[1] == prefixes[2] {
            return Err(CacheError::ConfigError(format!(
                "namespace prefixes must be distinct, got {:?}",
                prefixes
            )));
        }

        let origin = self.origin_url()?;
        if origin.scheme() != "http" && origin.scheme() != "https" {
            return Err(CacheError::ConfigError(format!(
                "origin must be http or https, got '{}'",
                self.origin
            )));
        }

        if let Some(path) = self.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(CacheError::ConfigError(format!(
                "precache paths must start with '/', got '{}'",
                path
            )));
        }

        if let Some(prefix) = self.api_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(CacheError::ConfigError(format!(
                "api_prefixes must start with '/', got '{}'",
                prefix
            )));
        }

        if self.network_timeout_ms == 0 {
            return Err(CacheError::ConfigError(
                "network_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Disk
            && self.storage.directory.as_deref().map_or(true, str::is_empty)
        {
            return Err(CacheError::ConfigError(
                "storage.directory is required when storage.backend is 'disk'".to_string(),
            ));
        }

        Ok(())
    }

    /// The parsed origin URL
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).map_err(|e| {
            CacheError::ConfigError(format!("Invalid origin '{}': {}", self.origin, e))
        })
    }

    /// The current namespace for `kind`
    pub fn namespace(&self, kind: NamespaceKind) -> CacheNamespace {
        CacheNamespace::new(self.namespaces.prefix(kind), &self.version, kind)
    }

    /// Names of the namespaces that survive activation
    pub fn allow_list(&self) -> Vec<String> {
        NamespaceKind::ALL
            .iter()
            .map(|kind| self.namespace(*kind).name)
            .collect()
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

/// Namespace names double as directory names on disk
fn is_name_token(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('.') && !s.contains(['/', '\\'])
}
