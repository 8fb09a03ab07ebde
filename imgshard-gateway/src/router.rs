use imgshard_node::ClusterNode;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("No workers are available to route to")]
    NoWorkersAvailable,
}

/// Selects the index of the worker which owns `key`.
///
/// The SHA-256 digest of the key is read as a big-endian unsigned integer and
/// reduced modulo `live_worker_count`. The same key and count always give the
/// same index, but almost every key moves when the count changes; there is
/// no ring or virtual-node bookkeeping.
pub fn route(key: &str, live_worker_count: usize) -> Result<usize, RouteError> {
    if live_worker_count == 0 {
        return Err(RouteError::NoWorkersAvailable);
    }

    let digest = Sha256::digest(key.as_bytes());
    let modulus = live_worker_count as u128;

    // Horner's rule over the digest bytes, the remainder stays below `modulus`.
    let index = digest
        .iter()
        .fold(0u128, |rem, byte| ((rem << 8) | *byte as u128) % modulus);

    Ok(index as usize)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub index: usize,
    pub node: ClusterNode,
}

/// Picks the worker from an ordered snapshot of the live workers.
pub fn select_worker(
    key: &str,
    workers: &[ClusterNode],
) -> Result<RouteDecision, RouteError> {
    let index = route(key, workers.len())?;
    Ok(RouteDecision {
        index,
        node: workers[index].clone(),
    })
}
