use axum::extract::{RawQuery, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::client::WorkerError;
use crate::dispatcher::{DispatchError, GatewayDispatcher};
use crate::statistics::GatewayStatisticsInner;

/// The header naming the index of the worker which served the request.
pub static NODE_ID_HEADER: &str = "node-id";

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::InvalidUrl(_) | DispatchError::InsecureScheme(_) => {
                StatusCode::BAD_REQUEST
            },
            DispatchError::NotFound | DispatchError::Upstream(WorkerError::NotFound) => {
                StatusCode::NOT_FOUND
            },
            DispatchError::ClusterUnavailable | DispatchError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// The gateway's HTTP API.
pub fn router(dispatcher: GatewayDispatcher) -> Router {
    Router::new()
        .route("/image", get(get_image))
        .route("/health", get(health))
        .with_state(dispatcher)
}

async fn get_image(
    State(dispatcher): State<GatewayDispatcher>,
    RawQuery(query): RawQuery,
) -> Result<Response, DispatchError> {
    let statistics = dispatcher.statistics();
    GatewayStatisticsInner::incr(&statistics.requests);

    let dispatched = dispatcher.dispatch(query.as_deref()).await.map_err(|e| {
        GatewayStatisticsInner::incr(&statistics.errors);
        error!(error = %e, "Failed to serve image.");
        e
    })?;

    let mut resp = dispatched.image.data.into_response();
    let headers = resp.headers_mut();
    if let Some(content_type) = dispatched
        .image
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
    {
        headers.insert(CONTENT_TYPE, content_type);
    }
    headers.insert(
        HeaderName::from_static(NODE_ID_HEADER),
        HeaderValue::from(dispatched.worker_index),
    );

    Ok(resp)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayHealth {
    /// The service address of every known member.
    pub nodes: Vec<String>,
    pub score: usize,
}

async fn health(State(dispatcher): State<GatewayDispatcher>) -> Json<GatewayHealth> {
    let cluster = dispatcher.cluster();
    let nodes = cluster
        .members()
        .await
        .into_iter()
        .map(|member| member.service_addr.to_string())
        .collect();

    Json(GatewayHealth {
        nodes,
        score: cluster.health_score().await,
    })
}
