//! Network access for the worker
//!
//! [`Fetcher`] is the seam between the strategies and the network. The
//! production implementation, [`HttpFetcher`], forwards requests to the origin
//! with reqwest and captures the full response as a [`ResponseSnapshot`].

use crate::error::{CacheError, Result};
use crate::models::{FetchRequest, ResponseSnapshot};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers that describe the connection rather than the resource
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Something that can satisfy a request from the network
///
/// Any response, whatever its status, is `Ok`. `Err` means the network
/// itself failed (connection refused, timeout, body read error).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot>;
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HttpFetcher with default settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Create a new HttpFetcher with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
        debug!("Fetching from network: {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if let Some(accept) = &request.accept {
            builder = builder.header(http::header::ACCEPT, accept.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Network request failed for url={}: {}", request.url, e);
            CacheError::from(e)
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| {
            warn!("Failed to read response body for url={}: {}", request.url, e);
            CacheError::from(e)
        })?;

        debug!(
            "Network response for url={}: status={} size={}",
            request.url,
            status,
            body.len()
        );

        Ok(ResponseSnapshot {
            status,
            headers,
            body,
        })
    }
}
