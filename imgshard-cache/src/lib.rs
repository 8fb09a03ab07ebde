//! # imgshard cache
//! The worker side of imgshard.
//!
//! A worker keeps a [NodeCache] mapping the [fingerprint] of a source URL to the
//! raw bytes downloaded from it. Gateways first ask the worker for the cached
//! image, and on a miss ask it to populate the cache through the
//! [FetchCoordinator], which downloads from the [Origin] exactly once per call.
//!
//! Content is cached verbatim, the [ImageFormat] of a payload is only checked
//! when it is served back.

mod api;
mod cache;
mod fetch;
mod fingerprint;
mod origin;
mod query;
mod statistics;

pub use api::{
    router,
    ApiError,
    CacheRequest,
    Dashboard,
    HostStatus,
    WorkerState,
    HEALTH_DIAL_TIMEOUT,
};
pub use cache::{CacheError, NodeCache};
pub use fetch::{FetchConfig, FetchCoordinator, FetchError};
pub use fingerprint::{fingerprint, ImageFormat};
pub use origin::{HttpOrigin, Origin, DEFAULT_ORIGIN_TIMEOUT};
pub use query::{percent_decode, url_param, QueryError};
pub use statistics::WorkerStatistics;
