//! Substitute data path used when the quorum path stalls
use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{QuorumError, Result};
use crate::package::SignedDataPackage;

/// Packages fetched outside the pub/sub path, keyed by feed id
pub type SignedPackagesResponse = BTreeMap<String, Vec<SignedDataPackage>>;

#[async_trait]
pub trait FallbackSource: Send + Sync {
    async fn fetch(&self) -> Result<SignedPackagesResponse>;
}

#[async_trait]
impl<F, Fut> FallbackSource for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<SignedPackagesResponse>> + Send,
{
    async fn fetch(&self) -> Result<SignedPackagesResponse> {
        (self)().await
    }
}

/// Fetches the latest packages for a data service from a cache gateway
#[derive(Clone, Debug)]
pub struct HttpFallbackSource {
    base_url: Url,
    data_service_id: String,
    data_package_ids: Vec<String>,
    http: reqwest::Client,
}

impl HttpFallbackSource {
    pub fn new(
        base_url: Url,
        data_service_id: impl Into<String>,
        data_package_ids: Vec<String>,
    ) -> Self {
        Self {
            base_url,
            data_service_id: data_service_id.into(),
            data_package_ids,
            http: reqwest::Client::new(),
        }
    }

    pub fn latest_url(&self) -> String {
        format!(
            "{}/data-packages/latest/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.data_service_id
        )
    }
}

#[async_trait]
impl FallbackSource for HttpFallbackSource {
    async fn fetch(&self) -> Result<SignedPackagesResponse> {
        let url = self.latest_url();
        debug!("Fetching fallback packages from {}", url);
        let mut response: SignedPackagesResponse = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| QuorumError::Fallback(format!("request to {} failed: {}", url, e)))?
            .json()
            .await
            .map_err(|e| QuorumError::Fallback(format!("bad response from {}: {}", url, e)))?;
        response.retain(|feed_id, _| self.data_package_ids.contains(feed_id));
        if response.is_empty() {
            return Err(QuorumError::Fallback(format!(
                "no configured feeds in response from {}",
                url
            )));
        }
        Ok(response)
    }
}
