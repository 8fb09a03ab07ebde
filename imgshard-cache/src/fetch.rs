use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, NodeCache};
use crate::fingerprint::fingerprint;
use crate::origin::Origin;
use crate::statistics::{WorkerStatistics, WorkerStatisticsInner};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("The origin has no resource at {url}")]
    /// The origin answered 404.
    NotFound { url: String },

    #[error("The origin responded to {url} with status code {status}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("Failed to reach the origin: {0}")]
    Transport(String),

    #[error("Failed to store the image: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    /// Let concurrent requests for the same URL share a single download.
    ///
    /// When disabled, every call downloads from the origin.
    pub single_flight: bool,
}

type InFlight = Shared<BoxFuture<'static, Result<Bytes, FetchError>>>;

#[derive(Clone)]
/// Populates the worker's cache from origins.
pub struct FetchCoordinator {
    inner: Arc<FetchCoordinatorInner>,
}

struct FetchCoordinatorInner {
    cache: NodeCache,
    origin: Box<dyn Origin>,
    config: FetchConfig,
    in_flight: Mutex<HashMap<String, InFlight>>,
    statistics: WorkerStatistics,
}

impl FetchCoordinator {
    pub fn new(
        cache: NodeCache,
        origin: impl Origin,
        config: FetchConfig,
        statistics: WorkerStatistics,
    ) -> Self {
        Self {
            inner: Arc::new(FetchCoordinatorInner {
                cache,
                origin: Box::new(origin),
                config,
                in_flight: Mutex::new(HashMap::new()),
                statistics,
            }),
        }
    }

    #[inline]
    pub fn cache(&self) -> &NodeCache {
        &self.inner.cache
    }

    /// Downloads the resource, stores it in the cache and returns its bytes.
    ///
    /// Exactly one origin attempt is made, failures are returned as-is and
    /// nothing is stored. The payload is stored whatever its format, it is
    /// only classified when it is served.
    ///
    /// With `single_flight` enabled, callers arriving while a download for
    /// the same URL is running wait for that download instead of starting
    /// their own.
    pub async fn fetch_and_cache(&self, url: &str) -> Result<Bytes, FetchError> {
        if !self.inner.config.single_flight {
            return self.fetch_once(url).await;
        }

        let key = fingerprint(url);
        let in_flight = {
            let mut lock = self.inner.in_flight.lock();
            lock.entry(key.clone())
                .or_insert_with(|| {
                    let coordinator = self.clone();
                    let url = url.to_string();

                    // The download runs on its own task so it completes and
                    // clears its entry even if every waiter goes away.
                    let download = tokio::spawn(async move {
                        let res = coordinator.fetch_once(&url).await;
                        coordinator.inner.in_flight.lock().remove(&key);
                        res
                    });

                    async move {
                        download.await.unwrap_or_else(|e| {
                            Err(FetchError::Transport(format!(
                                "The download task failed: {}",
                                e
                            )))
                        })
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        in_flight.await
    }

    async fn fetch_once(&self, url: &str) -> Result<Bytes, FetchError> {
        debug!(url = url, "Downloading from origin.");
        WorkerStatisticsInner::incr(&self.inner.statistics.origin_fetches);

        let data = match self.inner.origin.download(url).await {
            Ok(data) => data,
            Err(error) => {
                warn!(url = url, error = %error, "Origin download failed.");
                return Err(error);
            },
        };

        let key = fingerprint(url);
        self.inner.cache.set(&key, data.clone())?;

        info!(url = url, key = %key, num_bytes = data.len(), "Stored origin response.");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use super::*;

    struct CountingOrigin {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Origin for CountingOrigin {
        async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            match url {
                "https://example.com/missing.png" => Err(FetchError::NotFound {
                    url: url.to_string(),
                }),
                "https://example.com/broken.png" => Err(FetchError::UpstreamStatus {
                    url: url.to_string(),
                    status: 503,
                }),
                _ => Ok(Bytes::from(format!("image:{}", url))),
            }
        }
    }

    fn coordinator(single_flight: bool, delay: Duration) -> (FetchCoordinator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let origin = CountingOrigin {
            calls: calls.clone(),
            delay,
        };
        let coordinator = FetchCoordinator::new(
            NodeCache::new(),
            origin,
            FetchConfig { single_flight },
            WorkerStatistics::default(),
        );
        (coordinator, calls)
    }

    #[tokio::test]
    async fn test_fetch_stores_under_fingerprint() {
        let (coordinator, calls) = coordinator(false, Duration::ZERO);
        let url = "https://example.com/a.png";

        let data = coordinator.fetch_and_cache(url).await.unwrap();
        assert_eq!(data, Bytes::from(format!("image:{}", url)));
        assert_eq!(coordinator.cache().get(&fingerprint(url)), Ok(data));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refetch_overwrites() {
        let (coordinator, calls) = coordinator(false, Duration::ZERO);
        let url = "https://example.com/a.png";

        coordinator.cache().set(&fingerprint(url), Bytes::from_static(b"stale")).unwrap();
        coordinator.fetch_and_cache(url).await.unwrap();

        assert_eq!(
            coordinator.cache().get(&fingerprint(url)),
            Ok(Bytes::from(format!("image:{}", url))),
        );
        assert_eq!(coordinator.cache().count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached_or_retried() {
        let (coordinator, calls) = coordinator(false, Duration::ZERO);

        let err = coordinator
            .fetch_and_cache("https://example.com/missing.png")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));

        let err = coordinator
            .fetch_and_cache("https://example.com/broken.png")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UpstreamStatus { status: 503, .. }));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.cache().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_independent_by_default() {
        let (coordinator, calls) = coordinator(false, Duration::from_millis(100));
        let url = "https://example.com/a.png";

        let tasks = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.fetch_and_cache(url).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_concurrent_fetches() {
        let (coordinator, calls) = coordinator(true, Duration::from_millis(200));
        let url = "https://example.com/a.png";
        let barrier = Arc::new(Barrier::new(5));

        let tasks = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    coordinator.fetch_and_cache(url).await
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            let data = task.await.unwrap().unwrap();
            assert_eq!(data, Bytes::from(format!("image:{}", url)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Once the download is done, the next miss downloads again.
        coordinator.fetch_and_cache(url).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_flight_download_outlives_its_callers() {
        let (coordinator, calls) = coordinator(true, Duration::from_millis(200));
        let url = "https://example.com/a.png";

        let res =
            tokio::time::timeout(Duration::from_millis(50), coordinator.fetch_and_cache(url))
                .await;
        assert!(res.is_err(), "The caller should give up before the download ends.");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            coordinator.cache().get(&fingerprint(url)),
            Ok(Bytes::from(format!("image:{}", url))),
        );
        assert!(coordinator.inner.in_flight.lock().is_empty());

        let data = coordinator.fetch_and_cache(url).await.unwrap();
        assert_eq!(data, Bytes::from(format!("image:{}", url)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_flight_shares_errors() {
        let (coordinator, calls) = coordinator(true, Duration::from_millis(100));
        let url = "https://example.com/missing.png";

        let (a, b) = tokio::join!(
            coordinator.fetch_and_cache(url),
            coordinator.fetch_and_cache(url),
        );
        assert!(matches!(a, Err(FetchError::NotFound { .. })));
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
