use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the worker's cache.
pub struct WorkerStatistics(Arc<WorkerStatisticsInner>);

impl Deref for WorkerStatistics {
    type Target = WorkerStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct WorkerStatisticsInner {
    pub(crate) hits: Counter,
    pub(crate) misses: Counter,
    /// The number of downloads started against origins.
    pub(crate) origin_fetches: Counter,
    /// The number of requests which failed, cache misses are not failures.
    pub(crate) errors: Counter,
}

impl WorkerStatisticsInner {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// The number of downloads started against origins.
    pub fn origin_fetches(&self) -> u64 {
        self.origin_fetches.load(Ordering::Relaxed)
    }

    /// The number of requests which failed, cache misses are not failures.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn incr(counter: &Counter) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
