//! HTTP host for the worker
//!
//! Every incoming request is turned into a [`FetchRequest`] against the
//! configured origin and handed to [`OfflineWorker::on_fetch`]. Passthrough
//! requests are proxied to the origin as-is, body included.
//!
//! `POST /__offline/message` carries a JSON control message; the reply is the
//! response body.

use crate::error::{CacheError, Result};
use crate::models::{Destination, FetchRequest, ResponseSnapshot};
use crate::worker::{FetchOutcome, OfflineWorker};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use reqwest::{Client, Url};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Path of the control channel endpoint
pub const CONTROL_PATH: &str = "/__offline/message";

/// Response header naming where a response came from
pub const SOURCE_HEADER: &str = "x-offline-source";

const SEC_FETCH_DEST: &str = "sec-fetch-dest";

/// Headers never forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "host",
];

pub struct WorkerServer {
    worker: Arc<OfflineWorker>,
    origin: Url,
    client: Client,
}

impl WorkerServer {
    pub fn new(worker: Arc<OfflineWorker>) -> Result<Self> {
        let origin = worker.config().origin_url()?;
        let client = Client::builder()
            .timeout(worker.config().network_timeout())
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            worker,
            origin,
            client,
        })
    }

    /// Bind `addr` and serve until the process exits
    pub async fn start(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Worker host listening on http://{} (origin={})", local, self.origin);
        info!("Control channel at POST http://{}{}", local, CONTROL_PATH);

        let server = Arc::new(self);
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&server);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }

    async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return plain(StatusCode::BAD_REQUEST, "unreadable request body");
            }
        };

        if parts.uri.path() == CONTROL_PATH {
            return self.handle_control(&parts.method, &body).await;
        }

        let request = match self.to_fetch_request(&parts) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected request uri={}: {}", parts.uri, e);
                return error_response(&e);
            }
        };

        match self.worker.on_fetch(&request).await {
            FetchOutcome::Respond { response, source } => {
                let mut response = snapshot_to_response(response);
                response
                    .headers_mut()
                    .insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
                response
            }
            FetchOutcome::Passthrough => self.proxy(&request, &parts.headers, body).await,
        }
    }

    async fn handle_control(&self, method: &Method, body: &[u8]) -> Response<Full<Bytes>> {
        if method != Method::POST {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "control messages must be POSTed");
        }

        let reply = self.worker.handle_message_json(body).await;
        let status = if reply.is_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        match serde_json::to_vec(&reply) {
            Ok(json) => {
                let mut response = Response::new(Full::new(Bytes::from(json)));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                error!("Failed to serialize control reply: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }

    fn to_fetch_request(&self, parts: &http::request::Parts) -> Result<FetchRequest> {
        // Set path and query on the origin rather than joining, so a
        // `//host/...` request path cannot escape to another origin
        let mut url = self.origin.clone();
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());

        let mut request = FetchRequest::new(parts.method.clone(), url.as_str())?;
        if let Some(dest) = header_str(&parts.headers, SEC_FETCH_DEST) {
            request = request.with_destination(Destination::from_fetch_dest(dest));
        }
        if let Some(accept) = header_str(&parts.headers, ACCEPT.as_str()) {
            request = request.with_accept(accept);
        }
        Ok(request)
    }

    /// Forward a request the worker declined, unchanged
    async fn proxy(
        &self,
        request: &FetchRequest,
        headers: &http::HeaderMap,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        debug!("Proxying {} {} to origin", request.method, request.url);

        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in headers {
            if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        let upstream = match builder.body(body).send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("Passthrough to origin failed for url={}: {}", request.url, e);
                return error_response(&CacheError::from(e));
            }
        };

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read origin body for url={}: {}", request.url, e);
                return error_response(&CacheError::from(e));
            }
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        for (name, value) in &upstream_headers {
            if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
    }
}

/// Convert a snapshot into a hyper response; invalid header pairs are dropped
pub fn snapshot_to_response(snapshot: ResponseSnapshot) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(snapshot.body));
    *response.status_mut() =
        StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in &snapshot.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => debug!("Dropping invalid stored header {}", name),
        }
    }
    response
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Plain-text error response carrying the status the error maps to
fn error_response(err: &CacheError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    plain(status, err.to_string())
}

fn plain(status: StatusCode, message: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(message.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::network::Fetcher;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    struct EchoFetcher;

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
            Ok(ResponseSnapshot::new(200, request.path().to_string())
                .with_header("content-type", "text/plain"))
        }
    }

    async fn server() -> WorkerServer {
        server_with_origin("http://localhost:8080").await
    }

    async fn server_with_origin(origin: &str) -> WorkerServer {
        let config = WorkerConfig {
            origin: origin.to_string(),
            precache: vec!["/".to_string()],
            network_timeout_ms: 2000,
            ..Default::default()
        };
        let worker = OfflineWorker::new(config, Arc::new(MemoryStorage::new()), Arc::new(EchoFetcher))
            .unwrap();
        worker.start().await.unwrap();
        WorkerServer::new(Arc::new(worker)).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_snapshot_to_response() {
        let snapshot = ResponseSnapshot::new(404, "gone")
            .with_header("content-type", "text/plain")
            .with_header("x-bad", "line\nbreak");
        let response = snapshot_to_response(snapshot);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        assert!(response.headers().get("x-bad").is_none());
    }

    #[tokio::test]
    async fn test_intercepted_request_carries_source() {
        let server = server().await;
        let req = Request::builder()
            .uri("/styles.css")
            .header(SEC_FETCH_DEST, "style")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = server.handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(SOURCE_HEADER).unwrap(), "network");
        assert_eq!(body_string(response).await, "/styles.css");
    }

    #[tokio::test]
    async fn test_control_endpoint() {
        let server = server().await;
        let req = Request::builder()
            .method(Method::POST)
            .uri(CONTROL_PATH)
            .body(Full::new(Bytes::from_static(br#"{"type":"GET_VERSION"}"#)))
            .unwrap();
        let response = server.handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["type"], "VERSION");
        assert_eq!(json["version"], "v1");

        let req = Request::builder()
            .method(Method::POST)
            .uri(CONTROL_PATH)
            .body(Full::new(Bytes::from_static(b"not json")))
            .unwrap();
        assert_eq!(server.handle(req).await.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .uri(CONTROL_PATH)
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert_eq!(server.handle(req).await.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&CacheError::Timeout("slow".into()));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = error_response(&CacheError::ParseError("bad url".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_bad_gateway() {
        // Nothing listens on a freshly released port
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = server_with_origin(&format!("http://{}", addr)).await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/items")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();

        let response = server.handle(req).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_string(response).await.starts_with("Network error"));
    }
}
