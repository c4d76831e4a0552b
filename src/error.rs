//! Error types for the offline cache worker

use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types that can occur in the offline cache worker
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Precache failed for {path}: {reason}")]
    PrecacheFailed { path: String, reason: String },

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid control message: {0}")]
    InvalidMessage(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CacheError::Timeout(err.to_string())
        } else {
            CacheError::NetworkError(err.to_string())
        }
    }
}

impl CacheError {
    /// Whether this error means the network could not satisfy the request
    ///
    /// Network-first falls back to the cache only on these errors. A response
    /// with an error status is still a response and never becomes a
    /// `CacheError`.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            CacheError::NetworkError(_) | CacheError::Timeout(_) | CacheError::IoError(_)
        )
    }

    /// Convert error to the HTTP status the host answers with
    ///
    /// - Network failures become 502, timeouts 504
    /// - Malformed requests and messages become 400
    /// - Everything else is 500
    pub fn to_http_status(&self) -> u16 {
        match self {
            CacheError::NetworkError(_) => 502,
            CacheError::Timeout(_) => 504,
            CacheError::InvalidMessage(_) => 400,
            CacheError::ParseError(_) => 400,
            CacheError::ConfigError(_)
            | CacheError::StorageError(_)
            | CacheError::PrecacheFailed { .. }
            | CacheError::InvalidTransition { .. }
            | CacheError::IoError(_)
            | CacheError::InternalError(_) => 500,
        }
    }
}
