use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the gateway's image requests.
pub struct GatewayStatistics(Arc<GatewayStatisticsInner>);

impl Deref for GatewayStatistics {
    type Target = GatewayStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct GatewayStatisticsInner {
    pub(crate) requests: Counter,
    pub(crate) errors: Counter,
}

impl GatewayStatisticsInner {
    /// The number of image requests received.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// The number of image requests which were answered with an error.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn incr(counter: &Counter) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
