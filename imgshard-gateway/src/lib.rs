//! # imgshard gateway
//! The client facing side of imgshard.
//!
//! Every request names a source URL. The gateway [route]s the URL onto one of
//! the live workers it currently knows of, reads the image from that worker's
//! cache and, on a miss, asks the same worker to populate its cache from the
//! origin.
//!
//! Routing is a plain modulo over the number of live workers, so any change
//! in membership moves most URLs to another worker. A worker which loses a
//! URL simply keeps its now unused entry, the new owner fetches it again.

mod api;
mod client;
mod dispatcher;
mod router;
mod statistics;

pub use api::{router, GatewayHealth, NODE_ID_HEADER};
pub use client::{
    HttpWorkerClient,
    WorkerApi,
    WorkerClientConfig,
    WorkerError,
    WorkerImage,
    DEFAULT_WORKER_TIMEOUT,
};
pub use dispatcher::{parse_source_url, DispatchError, Dispatched, GatewayDispatcher};
pub use router::{route, select_worker, RouteDecision, RouteError};
pub use statistics::GatewayStatistics;
