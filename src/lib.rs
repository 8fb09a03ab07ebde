//! # imgshard
//! A sharded, self-organising image caching proxy.
//!
//! This is a convenience package which includes all of the sub-projects within
//! imgshard:
//!
//! ### Features
//! - `imgshard_node` - Gossip based cluster membership with shared-secret authentication.
//! - `imgshard_cache` - The worker: an in-memory image cache populated from origins.
//! - `imgshard_gateway` - The gateway: deterministic routing of image requests to workers.

#[cfg(feature = "imgshard-node")]
pub use imgshard_node as node;
#[cfg(feature = "imgshard-cache")]
pub use imgshard_cache as cache;
#[cfg(feature = "imgshard-gateway")]
pub use imgshard_gateway as gateway;
