//! Image endpoint state machine
//!
//! Validates the hash, then lets the download coordinator decide between the
//! cached bytes, a synchronous download, or streaming the origin response
//! straight through while the real download happens in the background.

use crate::config::Settings;
use crate::coordinator::{DownloadCoordinator, Fallback, FetchMode, Servable};
use crate::error::{ProxyError, Result};
use crate::origin::OriginClient;
use gallery_cache::{derive_filename, CacheEntry, ContentHash, ContentStore, ResourceType};
use std::sync::Arc;
use tracing::{debug, warn};

const NOT_FOUND: &str = "Image not found";
const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";

/// Value of the `X-Cache` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

pub enum ImageBody {
    Bytes(Vec<u8>),
    /// Origin response relayed without being stored
    Stream(reqwest::Response),
}

pub struct ServedImage {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub cache: CacheStatus,
    pub body: ImageBody,
}

impl ServedImage {
    /// Whether the bytes came from the cache and may be treated as immutable
    pub fn is_cached(&self) -> bool {
        matches!(self.body, ImageBody::Bytes(_))
    }
}

pub struct ImageProxy {
    settings: Arc<Settings>,
    store: ContentStore,
    origin: Arc<OriginClient>,
    coordinator: Arc<DownloadCoordinator>,
}

impl ImageProxy {
    pub fn new(
        settings: Arc<Settings>,
        store: ContentStore,
        origin: Arc<OriginClient>,
        coordinator: Arc<DownloadCoordinator>,
    ) -> Self {
        Self {
            settings,
            store,
            origin,
            coordinator,
        }
    }

    pub async fn serve(&self, hash: &str, thumb: bool) -> Result<ServedImage> {
        let hash = ContentHash::parse(hash)?;
        let resource_type = ResourceType::from_thumb_flag(thumb);
        let api_path = resource_type.api_path(&hash);

        if self.settings.origin_base_url.is_none() {
            return self.serve_offline(resource_type, &api_path).await;
        }
        let origin_url = self.settings.origin_url(&api_path)?;

        let mode = if thumb && !self.settings.thumbnail_sync {
            FetchMode::Async
        } else {
            FetchMode::Sync
        };

        match self.coordinator.fetch(&origin_url, resource_type, mode).await {
            Servable::Hit(entry) => self.serve_entry(entry, CacheStatus::Hit).await,
            Servable::Stale(entry) => self.serve_entry(entry, CacheStatus::Stale).await,
            Servable::Downloaded(entry) => self.serve_entry(entry, CacheStatus::Miss).await,
            Servable::Origin { url, reason } => match reason {
                Fallback::CachingDisabled => self.relay(&url, CacheStatus::Bypass).await,
                Fallback::Scheduled => self.relay(&url, CacheStatus::Miss).await,
                Fallback::Failed(failure) => {
                    warn!(hash = %hash, thumb, error = %failure, "Image unavailable");
                    Err(ProxyError::NotFound(NOT_FOUND.to_string()))
                }
            },
        }
    }

    /// Without an origin the cache is all there is; entries are served at any age
    async fn serve_offline(&self, resource_type: ResourceType, api_path: &str) -> Result<ServedImage> {
        if self.settings.cache_enabled {
            let key = derive_filename(resource_type, api_path);
            if let Some(entry) = self.store.get(&key).await {
                let status = if entry.is_fresh(self.settings.cache_ttl) {
                    CacheStatus::Hit
                } else {
                    CacheStatus::Stale
                };
                return self.serve_entry(entry, status).await;
            }
        }
        Err(ProxyError::ConfigMissing)
    }

    async fn serve_entry(&self, entry: CacheEntry, cache: CacheStatus) -> Result<ServedImage> {
        let data = self.store.read(&entry).await?;
        debug!(key = %entry.key, size = data.len(), cache = cache.as_str(), "Serving cached image");
        Ok(ServedImage {
            content_type: entry.content_type,
            content_length: Some(data.len() as u64),
            cache,
            body: ImageBody::Bytes(data),
        })
    }

    async fn relay(&self, url: &str, cache: CacheStatus) -> Result<ServedImage> {
        let response = self.origin.open(url).await.map_err(|e| {
            warn!(error = %e, "Origin relay failed");
            ProxyError::NotFound(NOT_FOUND.to_string())
        })?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        Ok(ServedImage {
            content_type,
            content_length: response.content_length(),
            cache,
            body: ImageBody::Stream(response),
        })
    }
}
