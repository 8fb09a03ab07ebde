use std::sync::Arc;

use imgshard_cache::url_param;
use imgshard_node::{ClusterNode, ClusterView};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{WorkerApi, WorkerError, WorkerImage};
use crate::router::{select_worker, RouteError};
use crate::statistics::GatewayStatistics;

static SECURE_SCHEME: &str = "https";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Only https urls are supported, got: {0}")]
    InsecureScheme(String),

    #[error("image not found")]
    NotFound,

    #[error("No workers are available in the cluster")]
    ClusterUnavailable,

    #[error("Worker request failed: {0}")]
    Upstream(#[from] WorkerError),
}

impl From<RouteError> for DispatchError {
    fn from(error: RouteError) -> Self {
        match error {
            RouteError::NoWorkersAvailable => DispatchError::ClusterUnavailable,
        }
    }
}

#[derive(Debug, Clone)]
/// A request served by a worker.
pub struct Dispatched {
    /// The index of the worker in the ordered snapshot it was picked from.
    pub worker_index: usize,
    pub worker: ClusterNode,
    pub image: WorkerImage,
}

#[derive(Clone)]
/// Routes client requests to the worker which owns the source URL.
pub struct GatewayDispatcher {
    cluster: Arc<dyn ClusterView>,
    workers: Arc<dyn WorkerApi>,
    statistics: GatewayStatistics,
}

impl GatewayDispatcher {
    pub fn new(cluster: Arc<dyn ClusterView>, workers: impl WorkerApi) -> Self {
        Self {
            cluster,
            workers: Arc::new(workers),
            statistics: GatewayStatistics::default(),
        }
    }

    #[inline]
    pub fn cluster(&self) -> &Arc<dyn ClusterView> {
        &self.cluster
    }

    #[inline]
    /// Gets the live request statistics.
    pub fn statistics(&self) -> GatewayStatistics {
        self.statistics.clone()
    }

    /// Serves the image named by the `url` parameter of the raw query.
    pub async fn dispatch(
        &self,
        raw_query: Option<&str>,
    ) -> Result<Dispatched, DispatchError> {
        let url = parse_source_url(raw_query)?;
        self.dispatch_url(&url).await
    }

    /// Serves an already decoded and validated source URL.
    ///
    /// The worker's cache is read first, on a miss the same worker is asked
    /// to populate it. Concurrent misses for the same URL each trigger their
    /// own populate call.
    pub async fn dispatch_url(&self, url: &str) -> Result<Dispatched, DispatchError> {
        let workers = self.cluster.worker_nodes().await;
        if workers.is_empty() {
            warn!(url = url, "No workers available to serve request.");
            return Err(DispatchError::ClusterUnavailable);
        }

        let decision = select_worker(url, &workers)?;
        info!(
            url = url,
            worker_index = decision.index,
            worker_addr = %decision.node.service_addr,
            num_workers = workers.len(),
            "Routing request.",
        );

        let image = match self.workers.get_image(&decision.node, url).await {
            Ok(image) => image,
            Err(WorkerError::NotFound) => {
                debug!(url = url, worker_addr = %decision.node.service_addr, "Worker cache miss.");
                self.workers
                    .cache_image(&decision.node, url)
                    .await
                    .map_err(|error| match error {
                        WorkerError::NotFound => DispatchError::NotFound,
                        other => DispatchError::Upstream(other),
                    })?
            },
            Err(error) => return Err(DispatchError::Upstream(error)),
        };

        Ok(Dispatched {
            worker_index: decision.index,
            worker: decision.node,
            image,
        })
    }
}

/// Decodes the `url` parameter and checks it is an absolute https URL.
pub fn parse_source_url(raw_query: Option<&str>) -> Result<String, DispatchError> {
    let url = url_param(raw_query).map_err(|e| DispatchError::InvalidUrl(e.to_string()))?;

    let parsed =
        Url::parse(&url).map_err(|e| DispatchError::InvalidUrl(format!("{}: {}", url, e)))?;
    if parsed.scheme() != SECURE_SCHEME {
        return Err(DispatchError::InsecureScheme(url));
    }

    Ok(url)
}
