//! Core data models for the offline cache worker

use crate::error::{CacheError, Result};
use bytes::Bytes;
use http::Method;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// The three logical cache partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Precached core assets, written at install time
    Static,
    /// Runtime HTML and API responses
    Dynamic,
    /// Runtime images
    Image,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 3] = [
        NamespaceKind::Static,
        NamespaceKind::Dynamic,
        NamespaceKind::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceKind::Static => "static",
            NamespaceKind::Dynamic => "dynamic",
            NamespaceKind::Image => "image",
        }
    }
}

/// A named, versioned logical cache
///
/// Identity is `name`, which already carries the version suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNamespace {
    pub name: String,
    pub version: String,
    pub kind: NamespaceKind,
}

impl CacheNamespace {
    /// Build the namespace for `kind` at `version` using `prefix`
    ///
    /// The resulting name is `<prefix>-<version>`, e.g. `static-v2`.
    pub fn new(prefix: &str, version: &str, kind: NamespaceKind) -> Self {
        CacheNamespace {
            name: format!("{}-{}", prefix, version),
            version: version.to_string(),
            kind,
        }
    }
}

/// Request destination hint, as carried by `Sec-Fetch-Dest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Document,
    Style,
    Script,
    Image,
    Font,
    Manifest,
    /// `fetch()`/XHR style requests
    Empty,
    /// Anything else, including an absent hint
    Unknown,
}

impl Destination {
    /// Parse a `Sec-Fetch-Dest` header value
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" => Destination::Document,
            "style" => Destination::Style,
            "script" => Destination::Script,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "manifest" => Destination::Manifest,
            "empty" => Destination::Empty,
            _ => Destination::Unknown,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Destination::Image)
    }
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    /// Value of the `Accept` header, if any
    pub accept: Option<String>,
}

impl FetchRequest {
    /// Create a request with no destination hint
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| CacheError::ParseError(format!("Invalid URL '{}': {}", url, e)))?;
        Ok(FetchRequest {
            method,
            url,
            destination: Destination::Unknown,
            accept: None,
        })
    }

    /// Shorthand for a GET request
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// The storage key for this request
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// Storage key: method plus absolute URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        CacheKey {
            method: method.as_str().to_string(),
            url: url.as_str().to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A response captured from the network, storage or the fallback generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        ResponseSnapshot {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Set a header, replacing any existing value with the same name
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Only exact 200 responses are eligible for write-through
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }
}

/// An entry owned by exactly one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub key: CacheKey,
    pub response: ResponseSnapshot,
    pub stored_at: SystemTime,
}

impl CachedEntry {
    pub fn new(key: CacheKey, response: ResponseSnapshot) -> Self {
        CachedEntry {
            key,
            response,
            stored_at: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_name_carries_version() {
        let ns = CacheNamespace::new("static", "v2", NamespaceKind::Static);
        assert_eq!(ns.name, "static-v2");
        assert_eq!(ns.version, "v2");
    }

    #[test]
    fn test_destination_parsing() {
        assert_eq!(Destination::from_fetch_dest("document"), Destination::Document);
        assert_eq!(Destination::from_fetch_dest(" Style "), Destination::Style);
        assert_eq!(Destination::from_fetch_dest("audioworklet"), Destination::Unknown);
        assert_eq!(Destination::from_fetch_dest(""), Destination::Unknown);
    }

    #[test]
    fn test_cache_key_includes_method() {
        let get = FetchRequest::get("http://localhost/a.css").unwrap();
        let head = FetchRequest::new(Method::HEAD, "http://localhost/a.css").unwrap();
        assert_ne!(get.cache_key(), head.cache_key());
        assert_eq!(get.cache_key().to_string(), "GET http://localhost/a.css");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(FetchRequest::get("not a url").is_err());
    }

    #[test]
    fn test_snapshot_headers() {
        let snap = ResponseSnapshot::new(200, "body")
            .with_header("Content-Type", "text/css")
            .with_header("content-type", "text/plain");
        assert_eq!(snap.headers.len(), 1);
        assert_eq!(snap.content_type(), Some("text/plain"));
        assert!(snap.is_cacheable());
        assert!(!ResponseSnapshot::new(206, "").is_cacheable());
    }
}
