use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use crate::fetch::FetchError;

/// The timeout for a single origin download.
pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
/// The authoritative source images are downloaded from on a cache miss.
pub trait Origin: Send + Sync + 'static {
    /// Downloads the full body of the resource.
    ///
    /// A missing resource must be reported as [FetchError::NotFound] so it can
    /// be told apart from any other failure.
    async fn download(&self, url: &str) -> Result<Bytes, FetchError>;
}

#[derive(Clone)]
/// An origin reached over HTTP(S).
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            return Err(FetchError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}
