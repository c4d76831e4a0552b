//! End-to-end worker behavior against a mock origin

use async_trait::async_trait;
use offline_cache::fallback::OFFLINE_MARKER;
use offline_cache::storage::{CacheStorage, MemoryStorage};
use offline_cache::{
    CacheError, Destination, FetchOutcome, FetchRequest, Fetcher, HttpFetcher, OfflineWorker,
    ResponseSnapshot, ResponseSource, Result, WorkerConfig, WorkerState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Real HTTP fetcher with an offline switch
struct SwitchableFetcher {
    inner: HttpFetcher,
    online: AtomicBool,
}

impl SwitchableFetcher {
    fn new() -> Arc<Self> {
        Arc::new(SwitchableFetcher {
            inner: HttpFetcher::with_timeout(Duration::from_secs(5)).unwrap(),
            online: AtomicBool::new(true),
        })
    }

    fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for SwitchableFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(CacheError::NetworkError("network unreachable".into()));
        }
        self.inner.fetch(request).await
    }
}

const PRECACHE: &[&str] = &["/", "/index.html", "/styles.css", "/script.js", "/manifest.json"];

async fn mount_shell(server: &MockServer) {
    for p in PRECACHE {
        Mock::given(method("GET"))
            .and(path(*p))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("shell {}", p)))
            .mount(server)
            .await;
    }
}

fn config(server: &MockServer, version: &str) -> WorkerConfig {
    WorkerConfig {
        version: version.to_string(),
        origin: server.uri(),
        precache: PRECACHE.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

fn url(server: &MockServer, p: &str) -> String {
    format!("{}{}", server.uri(), p)
}

#[tokio::test]
async fn test_static_asset_fetched_once() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    Mock::given(method("GET"))
        .and(path("/assets/main.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("body { margin: 0 }"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        SwitchableFetcher::new(),
    )
    .unwrap();
    assert_eq!(worker.start().await.unwrap(), WorkerState::Activated);

    let req = FetchRequest::get(&url(&server, "/assets/main.css"))
        .unwrap()
        .with_destination(Destination::Style);

    let cold = worker.on_fetch(&req).await;
    assert_eq!(cold.source(), Some(ResponseSource::Network));

    for _ in 0..3 {
        let warm = worker.on_fetch(&req).await;
        assert_eq!(warm.source(), Some(ResponseSource::Cache));
        let response = warm.response().unwrap();
        assert_eq!(response.body, "body { margin: 0 }");
        assert_eq!(response.content_type(), Some("text/css"));
    }

    let keys = worker.registry().keys("static-v1").await;
    assert!(keys.iter().any(|k| k.url.ends_with("/assets/main.css")));
    // .expect(1) is verified when the mock server drops
}

#[tokio::test]
async fn test_offline_document_without_snapshot_gets_offline_page() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    let fetcher = SwitchableFetcher::new();

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        fetcher.clone(),
    )
    .unwrap();
    worker.start().await.unwrap();
    fetcher.go_offline();

    let req = FetchRequest::get(&url(&server, "/index.html"))
        .unwrap()
        .with_destination(Destination::Document);
    let outcome = worker.on_fetch(&req).await;

    assert_eq!(outcome.source(), Some(ResponseSource::Fallback));
    let response = outcome.response().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.content_type().unwrap().starts_with("text/html"));
    assert!(std::str::from_utf8(&response.body).unwrap().contains(OFFLINE_MARKER));
}

#[tokio::test]
async fn test_document_snapshot_used_when_offline() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    Mock::given(method("GET"))
        .and(path("/articles/42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Article 42</h1>"))
        .mount(&server)
        .await;
    let fetcher = SwitchableFetcher::new();

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        fetcher.clone(),
    )
    .unwrap();
    worker.start().await.unwrap();

    let req = FetchRequest::get(&url(&server, "/articles/42"))
        .unwrap()
        .with_accept("text/html,application/xhtml+xml");
    let online = worker.on_fetch(&req).await;
    assert_eq!(online.source(), Some(ResponseSource::Network));

    fetcher.go_offline();
    let offline = worker.on_fetch(&req).await;
    assert_eq!(offline.source(), Some(ResponseSource::Cache));
    assert_eq!(offline.response().unwrap().body, "<h1>Article 42</h1>");
}

#[tokio::test]
async fn test_network_error_status_is_not_cached() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let fetcher = SwitchableFetcher::new();

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        fetcher.clone(),
    )
    .unwrap();
    worker.start().await.unwrap();

    let req = FetchRequest::get(&url(&server, "/api/orders")).unwrap();
    let outcome = worker.on_fetch(&req).await;
    assert_eq!(outcome.response().unwrap().status, 503);
    assert_eq!(outcome.source(), Some(ResponseSource::Network));

    // Nothing was stored, so offline falls through to the JSON 404
    fetcher.go_offline();
    let offline = worker.on_fetch(&req).await;
    assert_eq!(offline.source(), Some(ResponseSource::Fallback));
    let response = offline.response().unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.content_type(), Some("application/json"));
}

#[tokio::test]
async fn test_offline_image_gets_placeholder() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    let fetcher = SwitchableFetcher::new();

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        fetcher.clone(),
    )
    .unwrap();
    worker.start().await.unwrap();
    fetcher.go_offline();

    let req = FetchRequest::get(&url(&server, "/img/hero.png")).unwrap();
    let outcome = worker.on_fetch(&req).await;
    let response = outcome.response().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("image/svg+xml"));
}

#[tokio::test]
async fn test_stale_while_revalidate_does_not_block() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    Mock::given(method("GET"))
        .and(path("/data/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<feed/>")
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&server)
        .await;

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        SwitchableFetcher::new(),
    )
    .unwrap();
    worker.start().await.unwrap();

    let req = FetchRequest::get(&url(&server, "/data/feed.xml")).unwrap();

    // Cold: must wait for the network
    let cold = worker.on_fetch(&req).await;
    assert_eq!(cold.source(), Some(ResponseSource::Network));

    // Warm: answered from the namespace while the refresh is still in flight
    let start = Instant::now();
    let warm = worker.on_fetch(&req).await;
    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(warm.source(), Some(ResponseSource::Cache));
    assert_eq!(warm.response().unwrap().body, "<feed/>");
}

#[tokio::test]
async fn test_non_get_and_cross_origin_pass_through() {
    let server = MockServer::start().await;
    mount_shell(&server).await;

    let worker = OfflineWorker::new(
        config(&server, "v1"),
        Arc::new(MemoryStorage::new()),
        SwitchableFetcher::new(),
    )
    .unwrap();
    worker.start().await.unwrap();

    let post = FetchRequest::new(http::Method::POST, &url(&server, "/api/orders")).unwrap();
    assert!(matches!(worker.on_fetch(&post).await, FetchOutcome::Passthrough));

    let foreign = FetchRequest::get("https://fonts.example.net/inter.woff2").unwrap();
    assert!(matches!(worker.on_fetch(&foreign).await, FetchOutcome::Passthrough));

    let stats = worker.metrics().get_stats();
    assert_eq!(stats.passthrough_requests, 2);
    assert_eq!(stats.handled_requests, 0);
}

#[tokio::test]
async fn test_upgrade_evicts_previous_version() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .mount(&server)
        .await;

    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());

    let v1 = OfflineWorker::new(config(&server, "v1"), Arc::clone(&storage), SwitchableFetcher::new())
        .unwrap();
    v1.start().await.unwrap();
    v1.on_fetch(&FetchRequest::get(&url(&server, "/api/profile")).unwrap()).await;
    v1.on_fetch(
        &FetchRequest::get(&url(&server, "/img/logo.png"))
            .unwrap()
            .with_destination(Destination::Image),
    )
    .await;
    assert_eq!(
        v1.registry().list_namespaces().await,
        vec!["dynamic-v1".to_string(), "image-v1".to_string(), "static-v1".to_string()]
    );

    let v2 = OfflineWorker::new(config(&server, "v2"), Arc::clone(&storage), SwitchableFetcher::new())
        .unwrap();
    let report = v2.on_install().await.unwrap();
    assert_eq!(report.namespace, "static-v2");
    let activation = v2.on_activate().await.unwrap();

    let mut deleted = activation.deleted.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec!["dynamic-v1".to_string(), "image-v1".to_string(), "static-v1".to_string()]
    );

    let allow = v2.registry().allow_list();
    let remaining = v2.registry().list_namespaces().await;
    assert!(remaining.iter().all(|name| allow.contains(name)));
    assert_eq!(remaining, vec!["static-v2".to_string()]);
}
