//! HTTP client for the origin media API

use crate::error::{FetchFailure, ProxyError, Result};
use futures::StreamExt;
use gallery_cache::PartialFile;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("gallery-proxy/", env!("CARGO_PKG_VERSION"));

/// Strip the query string before logging; origin URLs may carry signatures
pub fn without_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub struct OriginClient {
    client: Client,
    requests: AtomicU64,
}

impl OriginClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            requests: AtomicU64::new(0),
        })
    }

    /// Requests issued to the origin since startup
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn send(&self, url: &str, timeout: Duration) -> reqwest::Result<reqwest::Response> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.client.get(url).timeout(timeout).send().await
    }

    /// Fetch and parse a JSON document
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url = %without_query(url), "Fetching manifest from origin");

        let response = self.send(url, MANIFEST_TIMEOUT).await.map_err(|e| {
            warn!(url = %without_query(url), error = %e, "Manifest request failed");
            ProxyError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %without_query(url), status = %status, "Origin rejected manifest request");
            return Err(ProxyError::OriginNonOk(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            warn!(url = %without_query(url), error = %e, "Origin returned invalid JSON");
            ProxyError::InvalidPayload(e.to_string())
        })
    }

    /// Stream a resource body into `partial` without buffering it in memory
    pub async fn download(
        &self,
        url: &str,
        partial: &mut PartialFile,
    ) -> std::result::Result<(), FetchFailure> {
        let response = self
            .send(url, DOWNLOAD_TIMEOUT)
            .await
            .map_err(|e| FetchFailure::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::NonOk(status.as_u16()));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchFailure::Unreachable(e.to_string()))?;
            partial.write_chunk(&chunk).await?;
        }

        Ok(())
    }

    /// Open a response for pass-through streaming to a client
    pub async fn open(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.send(url, DOWNLOAD_TIMEOUT).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::OriginNonOk(status.as_u16()));
        }
        Ok(response)
    }
}
