//! Dashboard backend client.
//!
//! Two read-only endpoints are used:
//!
//! - `GET {base}/unity/realtime-data?companyCode={context}` -- the live
//!   snapshot pushed into the engine every sync tick.
//! - `GET {base}/click/{robot|station|product}/{id}` -- the detail record
//!   shown when an entity is clicked.

use futures::future::{BoxFuture, FutureExt};
use reqwest::Url;
use serde_json::Value;
use tracing::debug;
use twin_core::config::BackendConfig;
use twin_core::sources::{BackendSnapshot, DetailSource, SnapshotSource, SourceError};
use twin_types::{ContextKey, EntityId, EntityKind};

use crate::error::BackendError;

/// HTTP client for the dashboard backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] if the base URL does not parse or
    /// cannot carry path segments, or [`BackendError::Request`] if the HTTP
    /// client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base = parse_base(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, base })
    }

    /// URL of the live snapshot for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] for a base that cannot carry
    /// path segments.
    pub fn snapshot_url(&self, context: &ContextKey) -> Result<Url, BackendError> {
        let mut url = join(&self.base, &["unity", "realtime-data"])?;
        url.query_pairs_mut().append_pair("companyCode", context.as_str());
        Ok(url)
    }

    /// URL of the detail record for one entity.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] for a base that cannot carry
    /// path segments.
    pub fn detail_url(&self, kind: EntityKind, id: &EntityId) -> Result<Url, BackendError> {
        join(&self.base, &["click", kind.as_str(), id.as_str()])
    }

    /// Fetch the live snapshot for `context`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] on transport failure, non-success status
    /// or an undecodable body.
    pub async fn snapshot(&self, context: &ContextKey) -> Result<BackendSnapshot, BackendError> {
        let url = self.snapshot_url(context)?;
        let body = self.get_json(url).await?;
        serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Fetch the detail record for one entity.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] on transport failure, non-success status
    /// or an undecodable body.
    pub async fn detail(&self, kind: EntityKind, id: &EntityId) -> Result<Value, BackendError> {
        let url = self.detail_url(kind, id)?;
        self.get_json(url).await
    }

    async fn get_json(&self, url: Url) -> Result<Value, BackendError> {
        debug!(url = %url, "backend request");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(BackendError::status(status.as_u16(), &error_body));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl SnapshotSource for HttpBackend {
    fn fetch_snapshot<'a>(
        &'a self,
        context: &'a ContextKey,
    ) -> BoxFuture<'a, Result<BackendSnapshot, SourceError>> {
        async move { self.snapshot(context).await.map_err(SourceError::from) }.boxed()
    }
}

impl DetailSource for HttpBackend {
    fn fetch_detail<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a EntityId,
    ) -> BoxFuture<'a, Result<Value, SourceError>> {
        async move { self.detail(kind, id).await.map_err(SourceError::from) }.boxed()
    }
}

/// Parse a base URL that path segments can be appended to.
pub(crate) fn parse_base(raw: &str) -> Result<Url, BackendError> {
    let url = Url::parse(raw).map_err(|e| BackendError::InvalidUrl(format!("{raw} ({e})")))?;
    if url.cannot_be_a_base() {
        return Err(BackendError::InvalidUrl(raw.to_owned()));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn join(base: &Url, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| BackendError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
