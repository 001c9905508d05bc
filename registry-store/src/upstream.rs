//! Fallback lookups against a remote npm-compatible registry.
//!
//! Only consulted by [`Registry::package`](crate::registry::Registry::package)
//! after a local miss, and only when enabled in configuration.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Fetch a parsed JSON document from a remote registry.
#[async_trait]
pub trait UpstreamRegistry: Send + Sync {
    /// `Ok(None)` when the remote has no such document.
    async fn fetch(&self, path: &str) -> StoreResult<Option<Value>>;
}

/// Encode a package name as a single registry path segment (`@scope%2fname`).
pub fn package_path(name: &str) -> String {
    name.replace('/', "%2f")
}

/// reqwest-backed [`UpstreamRegistry`].
pub struct HttpUpstream {
    client: Client,
    base: Url,
}

impl HttpUpstream {
    pub fn new(base_url: &str, timeout: Duration) -> StoreResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| StoreError::Config(format!("Invalid upstream URL '{}': {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("registry-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base })
    }

    pub fn url_for(&self, path: &str) -> StoreResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| StoreError::Upstream(format!("Invalid upstream path '{}': {}", path, e)))
    }
}

#[async_trait]
impl UpstreamRegistry for HttpUpstream {
    async fn fetch(&self, path: &str) -> StoreResult<Option<Value>> {
        let url = self.url_for(path)?;
        debug!(url = %url, "Fetching from upstream registry");

        let response = self
            .client
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Upstream request failed");
                StoreError::Upstream(format!("Request to {} failed: {}", url, e))
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(url = %url, "Upstream miss");
                Ok(None)
            }
            status if status.is_success() => {
                let document = response.json().await.map_err(|e| {
                    StoreError::Upstream(format!("Failed to parse upstream response: {e}"))
                })?;
                info!(url = %url, "Fetched document from upstream");
                Ok(Some(document))
            }
            status => Err(StoreError::Upstream(format!(
                "Upstream answered {} for {}",
                status, url
            ))),
        }
    }
}
