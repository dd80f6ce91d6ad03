//! Scene asset downloads.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::catalog::Scene;
use crate::error::FetchError;

use super::retry::{is_retryable_status, with_retry, Attempt, RetryError, RetryPolicy};

/// Source of raw scene asset bytes.
///
/// The pipeline depends only on this trait, so tests can substitute an
/// in-memory implementation.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download the asset referenced by `scene.asset_ref`.
    async fn fetch(&self, scene: &Scene) -> Result<Bytes, FetchError>;
}

/// Downloads assets over HTTP(S) with bounded timeout and retries.
#[derive(Clone)]
pub struct HttpAssetFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpAssetFetcher {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, scene: &Scene) -> Result<Bytes, FetchError> {
        let url = scene.asset_ref.as_str();

        let result = with_retry(&self.policy, "asset", || async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| Attempt::Retryable(FetchError::Http(e.to_string())))?;

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let error = FetchError::Status {
                    status,
                    url: url.to_string(),
                };
                return Err(if is_retryable_status(status) {
                    Attempt::Retryable(error)
                } else {
                    Attempt::Permanent(error)
                });
            }

            response
                .bytes()
                .await
                .map_err(|e| Attempt::Retryable(FetchError::Http(e.to_string())))
        })
        .await;

        match result {
            Ok(bytes) => {
                debug!(scene_id = %scene.id, bytes = bytes.len(), "Fetched scene asset");
                Ok(bytes)
            }
            Err(RetryError::Timeout(timeout)) => Err(FetchError::Timeout(timeout)),
            Err(RetryError::Failed { error, .. }) => Err(error),
        }
    }
}
