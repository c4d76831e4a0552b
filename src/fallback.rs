//! Synthetic responses for when neither cache nor network can answer

use crate::classifier::Classification;
use crate::config::FallbackConfig;
use crate::models::{Destination, FetchRequest, ResponseSnapshot};
use tracing::debug;

/// Marker attribute present in every synthetic offline page
pub const OFFLINE_MARKER: &str = "data-offline-mode";

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300" viewBox="0 0 400 300" role="img" aria-label="Image unavailable offline"><rect width="400" height="300" fill="#e5e7eb"/><path d="M150 190l40-50 30 36 20-24 40 38z" fill="#9ca3af"/><circle cx="250" cy="110" r="16" fill="#9ca3af"/><text x="200" y="250" font-family="sans-serif" font-size="16" text-anchor="middle" fill="#6b7280">Offline</text></svg>"##;

/// Builds fallback responses; never fails
#[derive(Debug, Clone)]
pub struct FallbackGenerator {
    title: String,
    message: String,
    version: String,
}

impl FallbackGenerator {
    pub fn new(config: &FallbackConfig, version: impl Into<String>) -> Self {
        FallbackGenerator {
            title: config.offline_title.clone(),
            message: config.offline_message.clone(),
            version: version.into(),
        }
    }

    /// Pick the fallback for a failed request
    ///
    /// - `Document` → 200 offline HTML page
    /// - image `StaticAsset` → 200 SVG placeholder
    /// - `ApiData` → 404 JSON error
    /// - anything else → 404
    pub fn generate(
        &self,
        classification: Classification,
        destination: Destination,
        request: &FetchRequest,
    ) -> ResponseSnapshot {
        debug!(
            "Generating fallback for url={} classification={}",
            request.url,
            classification.as_str()
        );
        match classification {
            Classification::Document => self.offline_page(),
            Classification::StaticAsset if destination.is_image() => self.placeholder_image(),
            Classification::ApiData => self.api_offline(request.path()),
            _ => self.not_found(),
        }
    }

    pub fn offline_page(&self) -> ResponseSnapshot {
        let body = format!(
            r#"<!DOCTYPE html>
<html lang="en" {marker}="true">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>
        body {{ font-family: system-ui, sans-serif; display: flex; min-height: 100vh; margin: 0; align-items: center; justify-content: center; background: #f9fafb; color: #111827; }}
        main {{ max-width: 32rem; padding: 2rem; text-align: center; }}
        button {{ margin-top: 1rem; padding: 0.5rem 1.25rem; border: 0; border-radius: 0.375rem; background: #111827; color: #fff; cursor: pointer; }}
    </style>
</head>
<body>
    <main>
        <h1>{title}</h1>
        <p>{message}</p>
        <button onclick="location.reload()">Try again</button>
    </main>
</body>
</html>
"#,
            marker = OFFLINE_MARKER,
            title = escape_html(&self.title),
            message = escape_html(&self.message),
        );

        ResponseSnapshot::new(200, body)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_header("cache-control", "no-store")
            .with_header("x-offline-fallback", self.version.as_str())
    }

    pub fn placeholder_image(&self) -> ResponseSnapshot {
        ResponseSnapshot::new(200, PLACEHOLDER_SVG)
            .with_header("content-type", "image/svg+xml")
            .with_header("cache-control", "no-store")
            .with_header("x-offline-fallback", self.version.as_str())
    }

    pub fn api_offline(&self, path: &str) -> ResponseSnapshot {
        let body = serde_json::json!({ "error": "offline", "path": path }).to_string();
        ResponseSnapshot::new(404, body)
            .with_header("content-type", "application/json")
            .with_header("cache-control", "no-store")
            .with_header("x-offline-fallback", self.version.as_str())
    }

    pub fn not_found(&self) -> ResponseSnapshot {
        ResponseSnapshot::new(404, "404 Not Found")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_header("cache-control", "no-store")
            .with_header("x-offline-fallback", self.version.as_str())
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
