//! HTTP fetcher for engine runtime artifacts.

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;
use twin_core::config::EngineConfig;
use twin_core::engine::{Artifact, ArtifactFetcher, FetchError};

use crate::error::BackendError;

/// Downloads artifacts by their absolute URL.
///
/// Every download is bounded by `engine.fetch_timeout_ms`, so a stalled
/// artifact host surfaces as a load failure instead of a load that never
/// settles.
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    /// Create a fetcher for the configured artifact host.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &EngineConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;
        Ok(Self { client })
    }

    /// Download one artifact.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport failure, timeout or a
    /// non-success status.
    pub async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, BackendError> {
        let response = self.client.get(&artifact.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::status(status.as_u16(), &status.to_string()));
        }
        let bytes = response.bytes().await?;
        debug!(artifact = %artifact.name, bytes = bytes.len(), "artifact downloaded");
        Ok(bytes.to_vec())
    }
}

impl ArtifactFetcher for HttpArtifactFetcher {
    fn fetch<'a>(&'a self, artifact: &'a Artifact) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        async move { self.download(artifact).await.map_err(FetchError::from) }.boxed()
    }
}
