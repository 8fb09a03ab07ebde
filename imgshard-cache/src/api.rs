use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::join_all;
use imgshard_node::{ClusterView, NodeRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::cache::{CacheError, NodeCache};
use crate::fetch::{FetchCoordinator, FetchError};
use crate::fingerprint::{fingerprint, ImageFormat};
use crate::query::{url_param, QueryError};
use crate::statistics::{WorkerStatistics, WorkerStatisticsInner};

/// How long `/health` waits for a member's service port to accept a connection.
pub const HEALTH_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
static OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error)]
/// A failed worker request, mapped to a status code only when it is returned.
pub enum ApiError {
    #[error("{0}")]
    Input(String),

    #[error("image not found")]
    NotFound,

    #[error("Unknown image type. Only jpeg and png are supported")]
    UnsupportedFormat,

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Input(_) | ApiError::UnsupportedFormat => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        ApiError::Input(error.to_string())
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::NotFound { .. } => ApiError::NotFound,
            FetchError::UpstreamStatus { .. } | FetchError::Transport(_) => {
                ApiError::Upstream(error.to_string())
            },
            FetchError::Cache(error) => ApiError::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Clone)]
/// Everything the worker's handlers share.
pub struct WorkerState {
    cache: NodeCache,
    coordinator: FetchCoordinator,
    cluster: Arc<dyn ClusterView>,
    statistics: WorkerStatistics,
    health_dial_timeout: Duration,
}

impl WorkerState {
    pub fn new(
        coordinator: FetchCoordinator,
        cluster: Arc<dyn ClusterView>,
        statistics: WorkerStatistics,
    ) -> Self {
        Self {
            cache: coordinator.cache().clone(),
            coordinator,
            cluster,
            statistics,
            health_dial_timeout: HEALTH_DIAL_TIMEOUT,
        }
    }

    /// Set how long the health check waits on each member.
    pub fn with_health_dial_timeout(mut self, timeout: Duration) -> Self {
        self.health_dial_timeout = timeout;
        self
    }
}

/// The worker's HTTP API.
pub fn router(state: WorkerState) -> Router {
    Router::new()
        .route("/v1/image", get(get_image))
        .route("/v1/cache", post(cache_image))
        .route("/health", get(health))
        .route("/dashboard", get(dashboard))
        .with_state(state)
}

async fn get_image(
    State(state): State<WorkerState>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let res = serve_cached(&state, query.as_deref());
    if let Err(ApiError::NotFound) = res {
        WorkerStatisticsInner::incr(&state.statistics.misses);
    } else if let Err(error) = &res {
        WorkerStatisticsInner::incr(&state.statistics.errors);
        error!(error = %error, "Failed to serve cached image.");
    }
    res
}

fn serve_cached(state: &WorkerState, query: Option<&str>) -> Result<Response, ApiError> {
    let url = url_param(query)?;
    let key = fingerprint(&url);

    let data = match state.cache.get(&key) {
        Ok(data) => data,
        Err(CacheError::NotFound(_)) => {
            debug!(url = %url, key = %key, "Cache miss.");
            return Err(ApiError::NotFound);
        },
        Err(error) => return Err(ApiError::Internal(error.to_string())),
    };

    WorkerStatisticsInner::incr(&state.statistics.hits);
    debug!(url = %url, key = %key, "Cache hit.");

    // Payloads are accepted whatever their type when they are stored,
    // so an unknown type is only rejected here.
    let format = ImageFormat::detect(&data).ok_or(ApiError::UnsupportedFormat)?;
    Ok(([(CONTENT_TYPE, format.content_type())], data).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheRequest {
    pub url: String,
}

async fn cache_image(
    State(state): State<WorkerState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let res = populate(&state, &body).await;
    if let Err(error) = &res {
        WorkerStatisticsInner::incr(&state.statistics.errors);
        error!(error = %error, "Failed to cache image.");
    }
    res
}

async fn populate(state: &WorkerState, body: &[u8]) -> Result<Response, ApiError> {
    let request: CacheRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::Input(format!("Failed to parse JSON body: {}", e)))?;

    if request.url.is_empty() {
        return Err(ApiError::Input("The url cannot be empty.".to_string()));
    }

    info!(url = %request.url, "Caching image.");
    let data = state.coordinator.fetch_and_cache(&request.url).await?;

    let content_type = ImageFormat::detect(&data)
        .map(|format| format.content_type())
        .unwrap_or(OCTET_STREAM);
    Ok(([(CONTENT_TYPE, content_type)], data).into_response())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostStatus {
    pub ip: String,
    pub status: String,
}

/// Reports every known member as `UP` or `DOWN` by dialing its service port.
///
/// The gossip liveness is deliberately not used here.
async fn health(State(state): State<WorkerState>) -> Json<Vec<HostStatus>> {
    let members = state.cluster.members().await;
    let timeout = state.health_dial_timeout;

    let checks = members
        .into_iter()
        .map(|member| async move {
            let up = is_reachable(member.service_addr, timeout).await;
            HostStatus {
                ip: member.service_addr.to_string(),
                status: if up { "UP" } else { "DOWN" }.to_string(),
            }
        });

    Json(join_all(checks).await)
}

async fn is_reachable(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dashboard {
    pub name: String,
    pub addr: String,
    pub role: String,
    pub gateway_count: usize,
    pub worker_count: usize,
    pub node_count: usize,
    pub image_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub origin_fetches: u64,
    pub errors: u64,
}

async fn dashboard(State(state): State<WorkerState>) -> Json<Dashboard> {
    let me = state.cluster.local_node();
    let members = state.cluster.members().await;
    let count_role =
        |role: NodeRole| members.iter().filter(|member| member.role == role).count();

    Json(Dashboard {
        name: me.node_id.clone(),
        addr: me.service_addr.to_string(),
        role: me.role.to_string(),
        gateway_count: count_role(NodeRole::Gateway),
        worker_count: count_role(NodeRole::Worker),
        node_count: members.len(),
        image_count: state.cache.count(),
        hits: state.statistics.hits(),
        misses: state.statistics.misses(),
        origin_fetches: state.statistics.origin_fetches(),
        errors: state.statistics.errors(),
    })
}
