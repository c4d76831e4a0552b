//! Request classification for choosing a caching strategy

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::models::{Destination, FetchRequest};
use http::Method;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Category of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Stylesheets, scripts, images, fonts, manifests
    StaticAsset,
    /// Navigations to HTML pages
    Document,
    /// Paths under a configured API prefix
    ApiData,
    Other,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::StaticAsset => "static_asset",
            Classification::Document => "document",
            Classification::ApiData => "api_data",
            Classification::Other => "other",
        }
    }
}

/// Decides whether a request is cache-eligible and which category it falls in
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Url,
    api_prefixes: Vec<String>,
}

impl RequestClassifier {
    pub fn new(origin: Url, api_prefixes: Vec<String>) -> Self {
        RequestClassifier {
            origin,
            api_prefixes,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        Ok(Self::new(config.origin_url()?, config.api_prefixes.clone()))
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Only same-origin GET requests enter the cache subsystem
    pub fn is_eligible(&self, request: &FetchRequest) -> bool {
        if request.method != Method::GET {
            debug!(
                "Bypassing cache: non-GET method={} url={}",
                request.method, request.url
            );
            return false;
        }

        if request.url.origin() != self.origin.origin() {
            debug!("Bypassing cache: cross-origin url={}", request.url);
            return false;
        }

        true
    }

    /// Classify a request
    ///
    /// Precedence: asset destination, then document destination, then API
    /// path prefix, then `Other`. Never fails.
    pub fn classify(&self, request: &FetchRequest) -> Classification {
        let classification = match self.effective_destination(request) {
            Destination::Style
            | Destination::Script
            | Destination::Image
            | Destination::Font
            | Destination::Manifest => Classification::StaticAsset,
            Destination::Document => Classification::Document,
            Destination::Empty | Destination::Unknown => {
                if self.is_api_path(request.path()) {
                    Classification::ApiData
                } else {
                    Classification::Other
                }
            }
        };

        debug!(
            "Classified url={} as {}",
            request.url,
            classification.as_str()
        );
        classification
    }

    /// The destination hint, or one inferred from `Accept` and the path
    /// extension when the host did not supply a hint
    pub fn effective_destination(&self, request: &FetchRequest) -> Destination {
        if request.destination != Destination::Unknown {
            return request.destination;
        }

        if let Some(dest) = request.accept.as_deref().and_then(destination_from_accept) {
            return dest;
        }

        destination_from_extension(request.path())
    }

    fn is_api_path(&self, path: &str) -> bool {
        self.api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

fn destination_from_accept(accept: &str) -> Option<Destination> {
    // Only the first media range is trusted; browsers put the real intent first
    let first = accept.split(',').next()?.trim().to_ascii_lowercase();
    if first.starts_with("text/html") {
        Some(Destination::Document)
    } else if first.starts_with("text/css") {
        Some(Destination::Style)
    } else if first.starts_with("image/") {
        Some(Destination::Image)
    } else {
        None
    }
}

fn destination_from_extension(path: &str) -> Destination {
    let file = path.rsplit('/').next().unwrap_or("");
    let ext = match file.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return Destination::Unknown,
    };

    match ext.as_str() {
        "html" | "htm" => Destination::Document,
        "css" => Destination::Style,
        "js" | "mjs" => Destination::Script,
        "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "avif" | "ico" => Destination::Image,
        "woff" | "woff2" | "ttf" | "otf" => Destination::Font,
        "webmanifest" => Destination::Manifest,
        _ => Destination::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(
            Url::parse("http://localhost:8080").unwrap(),
            vec!["/api/".to_string()],
        )
    }

    #[test]
    fn test_get_same_origin_is_eligible() {
        let req = FetchRequest::get("http://localhost:8080/assets/main.css").unwrap();
        assert!(classifier().is_eligible(&req));
    }

    #[test]
    fn test_non_get_bypasses() {
        let req = FetchRequest::new(Method::POST, "http://localhost:8080/api/customers").unwrap();
        assert!(!classifier().is_eligible(&req));
    }

    #[test]
    fn test_cross_origin_bypasses() {
        let req = FetchRequest::get("https://cdn.example.com/lib.js").unwrap();
        assert!(!classifier().is_eligible(&req));

        let other_port = FetchRequest::get("http://localhost:9000/lib.js").unwrap();
        assert!(!classifier().is_eligible(&other_port));
    }

    #[test]
    fn test_destination_hint_wins() {
        let c = classifier();
        let req = FetchRequest::get("http://localhost:8080/api/logo")
            .unwrap()
            .with_destination(Destination::Image);
        assert_eq!(c.classify(&req), Classification::StaticAsset);

        let req = FetchRequest::get("http://localhost:8080/api/page")
            .unwrap()
            .with_destination(Destination::Document);
        assert_eq!(c.classify(&req), Classification::Document);
    }

    #[test]
    fn test_api_prefix() {
        let req = FetchRequest::get("http://localhost:8080/api/products")
            .unwrap()
            .with_destination(Destination::Empty);
        assert_eq!(classifier().classify(&req), Classification::ApiData);
    }

    #[test]
    fn test_inferred_from_extension() {
        let c = classifier();
        let css = FetchRequest::get("http://localhost:8080/assets/main.css").unwrap();
        assert_eq!(c.classify(&css), Classification::StaticAsset);

        let html = FetchRequest::get("http://localhost:8080/index.html").unwrap();
        assert_eq!(c.classify(&html), Classification::Document);

        let data = FetchRequest::get("http://localhost:8080/data/projects.json").unwrap();
        assert_eq!(c.classify(&data), Classification::Other);
    }

    #[test]
    fn test_inferred_from_accept() {
        let req = FetchRequest::get("http://localhost:8080/about")
            .unwrap()
            .with_accept("text/html,application/xhtml+xml;q=0.9");
        assert_eq!(classifier().classify(&req), Classification::Document);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let c = classifier();
        let req = FetchRequest::get("http://localhost:8080/api/payments").unwrap();
        assert_eq!(c.classify(&req), c.classify(&req));
    }
}
