use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use imgshard_cache::{
    fingerprint,
    router,
    Dashboard,
    FetchConfig,
    FetchCoordinator,
    FetchError,
    HostStatus,
    NodeCache,
    Origin,
    WorkerState,
    WorkerStatistics,
};
use imgshard_node::test_utils::{test_node, StaticCluster};
use imgshard_node::NodeRole;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::json;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n', 0x00, 0x0D];
const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";

#[derive(Clone, Default)]
struct StaticOrigin {
    images: HashMap<String, Bytes>,
}

impl StaticOrigin {
    fn with_image(mut self, url: &str, data: &'static [u8]) -> Self {
        self.images.insert(url.to_string(), Bytes::from_static(data));
        self
    }
}

#[async_trait]
impl Origin for StaticOrigin {
    async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        if url == "https://example.com/broken.png" {
            return Err(FetchError::UpstreamStatus {
                url: url.to_string(),
                status: 500,
            });
        }

        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_string(),
            })
    }
}

struct TestWorker {
    addr: SocketAddr,
    cache: NodeCache,
    statistics: WorkerStatistics,
    cluster: Arc<StaticCluster>,
}

impl TestWorker {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn image_url(&self, source: &str) -> String {
        let encoded = utf8_percent_encode(source, NON_ALPHANUMERIC);
        self.url(&format!("/v1/image?url={}", encoded))
    }
}

fn start_worker(origin: StaticOrigin) -> TestWorker {
    let addr = test_helper::get_unused_addr();
    let statistics = WorkerStatistics::default();
    let cache = NodeCache::new();
    let coordinator = FetchCoordinator::new(
        cache.clone(),
        origin,
        FetchConfig::default(),
        statistics.clone(),
    );

    let cluster = Arc::new(StaticCluster::new(test_node(NodeRole::Worker, addr)));
    let state = WorkerState::new(coordinator, cluster.clone(), statistics.clone())
        .with_health_dial_timeout(Duration::from_millis(500));

    let server = axum::Server::bind(&addr).serve(router(state).into_make_service());
    tokio::spawn(server);

    TestWorker {
        addr,
        cache,
        statistics,
        cluster,
    }
}

async fn assert_round_trip(
    source: &str,
    data: &'static [u8],
    content_type: &str,
) -> anyhow::Result<()> {
    let worker = start_worker(StaticOrigin::default().with_image(source, data));
    let client = reqwest::Client::new();

    let resp = client.get(worker.image_url(source)).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(worker.url("/v1/cache"))
        .json(&json!({ "url": source }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CONTENT_TYPE], content_type);
    assert_eq!(resp.bytes().await?, Bytes::from_static(data));

    let resp = client.get(worker.image_url(source)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CONTENT_TYPE], content_type);
    assert_eq!(resp.bytes().await?, Bytes::from_static(data));

    assert_eq!(worker.cache.get(&fingerprint(source))?, Bytes::from_static(data));
    assert_eq!(worker.statistics.hits(), 1);
    assert_eq!(worker.statistics.misses(), 1);
    assert_eq!(worker.statistics.origin_fetches(), 1);
    Ok(())
}

#[tokio::test]
async fn test_jpeg_round_trip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    assert_round_trip("https://example.com/a.jpg", JPEG, "image/jpeg").await
}

#[tokio::test]
async fn test_png_round_trip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    assert_round_trip("https://example.com/a.png", PNG, "image/png").await
}

#[tokio::test]
async fn test_unknown_format_is_stored_but_not_served() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let source = "https://example.com/a.gif";
    let worker = start_worker(StaticOrigin::default().with_image(source, GIF));
    let client = reqwest::Client::new();

    let resp = client
        .post(worker.url("/v1/cache"))
        .json(&json!({ "url": source }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CONTENT_TYPE], "application/octet-stream");
    assert_eq!(resp.bytes().await?, Bytes::from_static(GIF));
    assert_eq!(worker.cache.count(), 1, "The payload should still be cached.");

    let resp = client.get(worker.image_url(source)).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_origin_failures() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let worker = start_worker(StaticOrigin::default());
    let client = reqwest::Client::new();

    let resp = client
        .post(worker.url("/v1/cache"))
        .json(&json!({ "url": "https://example.com/missing.png" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(worker.url("/v1/cache"))
        .json(&json!({ "url": "https://example.com/broken.png" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(worker.cache.count(), 0);
    assert_eq!(worker.statistics.errors(), 2);
    Ok(())
}

#[tokio::test]
async fn test_bad_requests() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let worker = start_worker(StaticOrigin::default());
    let client = reqwest::Client::new();

    let resp = client
        .post(worker.url("/v1/cache"))
        .body("{\"url\": ")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(worker.url("/v1/cache"))
        .json(&json!({ "link": "https://example.com/a.png" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.get(worker.url("/v1/image?url=https%zz")).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.get(worker.url("/v1/image")).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.post(worker.url("/v1/image")).send().await?;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let resp = client.get(worker.url("/v1/cache")).send().await?;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn test_health_dials_members() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let worker = start_worker(StaticOrigin::default());
    let dead_addr = test_helper::get_unused_addr();
    worker
        .cluster
        .add_member(test_node(NodeRole::Gateway, dead_addr));

    let mut hosts: Vec<HostStatus> = reqwest::get(worker.url("/health")).await?.json().await?;
    hosts.sort_by(|a, b| a.ip.cmp(&b.ip));

    let mut expected = vec![
        HostStatus {
            ip: worker.addr.to_string(),
            status: "UP".to_string(),
        },
        HostStatus {
            ip: dead_addr.to_string(),
            status: "DOWN".to_string(),
        },
    ];
    expected.sort_by(|a, b| a.ip.cmp(&b.ip));
    assert_eq!(hosts, expected);
    Ok(())
}

#[tokio::test]
async fn test_dashboard() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let worker = start_worker(StaticOrigin::default());
    worker
        .cluster
        .add_member(test_node(NodeRole::Gateway, test_helper::get_unused_addr()));
    worker.cache.set("some-key", Bytes::from_static(JPEG))?;

    let dashboard: Dashboard = reqwest::get(worker.url("/dashboard")).await?.json().await?;
    assert_eq!(dashboard.role, "worker");
    assert_eq!(dashboard.addr, worker.addr.to_string());
    assert_eq!(dashboard.worker_count, 1);
    assert_eq!(dashboard.gateway_count, 1);
    assert_eq!(dashboard.node_count, 2);
    assert_eq!(dashboard.image_count, 1);
    Ok(())
}
