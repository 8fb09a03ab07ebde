use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use imgshard_cache::CacheRequest;
use imgshard_node::ClusterNode;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use thiserror::Error;
use tracing::trace;

/// The default timeout for a single gateway to worker call.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("The worker does not have the image")]
    NotFound,

    #[error("The worker responded with status code {0}")]
    Status(u16),

    #[error("Failed to reach the worker: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for WorkerError {
    fn from(error: reqwest::Error) -> Self {
        WorkerError::Transport(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The bytes a worker returned along with the content type it declared.
pub struct WorkerImage {
    pub data: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
/// The calls a gateway makes against a worker.
pub trait WorkerApi: Send + Sync + 'static {
    /// Reads the image from the worker's cache.
    async fn get_image(
        &self,
        worker: &ClusterNode,
        url: &str,
    ) -> Result<WorkerImage, WorkerError>;

    /// Asks the worker to download the image and cache it.
    async fn cache_image(
        &self,
        worker: &ClusterNode,
        url: &str,
    ) -> Result<WorkerImage, WorkerError>;
}

#[derive(Debug, Clone)]
pub struct WorkerClientConfig {
    pub timeout: Duration,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

#[derive(Clone)]
/// A [WorkerApi] talking to the worker's HTTP API.
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(config: WorkerClientConfig) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkerApi for HttpWorkerClient {
    async fn get_image(
        &self,
        worker: &ClusterNode,
        url: &str,
    ) -> Result<WorkerImage, WorkerError> {
        trace!(worker_addr = %worker.service_addr, url = url, "Reading image from worker.");

        let resp = self
            .client
            .get(format!("http://{}/v1/image", worker.service_addr))
            .query(&[("url", url)])
            .send()
            .await?;

        read_image(resp).await
    }

    async fn cache_image(
        &self,
        worker: &ClusterNode,
        url: &str,
    ) -> Result<WorkerImage, WorkerError> {
        trace!(worker_addr = %worker.service_addr, url = url, "Asking worker to cache image.");

        let body = CacheRequest {
            url: url.to_string(),
        };
        let resp = self
            .client
            .post(format!("http://{}/v1/cache", worker.service_addr))
            .json(&body)
            .send()
            .await?;

        read_image(resp).await
    }
}

async fn read_image(resp: Response) -> Result<WorkerImage, WorkerError> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(WorkerError::NotFound);
    }
    if !status.is_success() {
        return Err(WorkerError::Status(status.as_u16()));
    }

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let data = resp.bytes().await?;

    Ok(WorkerImage { data, content_type })
}
