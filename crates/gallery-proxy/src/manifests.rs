//! Manifest endpoints backed by the manifest cache

use crate::config::Settings;
use crate::error::{ProxyError, Result};
use crate::origin::OriginClient;
use crate::payload::{normalize_collections, normalize_dates, normalize_images};
use gallery_cache::ManifestCache;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub const DATES_KEY: &str = "manifest:dates";
pub const COLLECTIONS_KEY: &str = "manifest:collections";
pub const IMAGES_PREFIX: &str = "manifest:images:";

const DATES_PATH: &str = "/api/public/dates";
const COLLECTIONS_PATH: &str = "/api/public/collections";
const IMAGES_PATH: &str = "/api/public/images";

/// Filter for an images list; missing values are sent as nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageFilter {
    pub date: Option<String>,
    pub collection: Option<String>,
}

impl ImageFilter {
    fn date(&self) -> &str {
        self.date.as_deref().unwrap_or_default()
    }

    fn collection(&self) -> &str {
        self.collection.as_deref().unwrap_or_default()
    }

    /// Hex SHA-256 of the canonical `date=<d>&collection=<c>` form
    pub fn filter_hash(&self) -> String {
        let canonical = format!("date={}&collection={}", self.date(), self.collection());
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    pub fn cache_key(&self) -> String {
        format!("{}{}", IMAGES_PREFIX, self.filter_hash())
    }
}

pub struct ManifestProxy {
    settings: Arc<Settings>,
    origin: Arc<OriginClient>,
    cache: Arc<ManifestCache>,
}

impl ManifestProxy {
    pub fn new(settings: Arc<Settings>, origin: Arc<OriginClient>, cache: Arc<ManifestCache>) -> Self {
        Self {
            settings,
            origin,
            cache,
        }
    }

    pub async fn dates(&self, nocache: bool) -> Result<Value> {
        self.cached(DATES_KEY, nocache, move || async move {
            let raw = self.origin.get_json(&self.settings.origin_url(DATES_PATH)?).await?;
            to_json(normalize_dates(raw)?)
        })
        .await
    }

    pub async fn collections(&self, nocache: bool) -> Result<Value> {
        self.cached(COLLECTIONS_KEY, nocache, move || async move {
            let raw = self
                .origin
                .get_json(&self.settings.origin_url(COLLECTIONS_PATH)?)
                .await?;
            to_json(normalize_collections(raw)?)
        })
        .await
    }

    pub async fn images(&self, filter: &ImageFilter, nocache: bool) -> Result<Value> {
        self.cached(&filter.cache_key(), nocache, move || async move {
            let url = self.images_url(filter)?;
            let raw = self.origin.get_json(&url).await?;
            to_json(normalize_images(raw, &self.settings)?)
        })
        .await
    }

    fn images_url(&self, filter: &ImageFilter) -> Result<String> {
        let base = self.settings.origin_url(IMAGES_PATH)?;
        let mut url = Url::parse(&base)
            .map_err(|e| ProxyError::Config(format!("invalid origin URL: {}", e)))?;

        let pairs: Vec<(&str, &str)> = [("date", filter.date()), ("collection", filter.collection())]
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        Ok(url.into())
    }

    /// Serve `key` from the cache unless bypassed, otherwise load and store it
    async fn cached<F, Fut>(&self, key: &str, nocache: bool, load: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let use_cache = self.settings.cache_enabled;

        if use_cache && !nocache {
            if let Some(payload) = self.cache.get(key).await {
                debug!(key = %key, "Manifest cache hit");
                return Ok(payload.as_ref().clone());
            }
        }

        let value = load().await?;

        // An images list without items is answered but never cached
        let empty_list = value
            .get("items")
            .and_then(Value::as_array)
            .is_some_and(|items| items.is_empty());

        if use_cache
            && !empty_list
            && self.cache.set(key, value.clone(), self.settings.cache_ttl).await
        {
            info!(key = %key, nocache, "Cached manifest");
        }
        Ok(value)
    }

    pub async fn clear_dates(&self) -> usize {
        usize::from(self.cache.delete(DATES_KEY).await)
    }

    pub async fn clear_collections(&self) -> usize {
        usize::from(self.cache.delete(COLLECTIONS_KEY).await)
    }

    /// Drop every cached images list; returns how many were removed
    pub async fn clear_images(&self) -> usize {
        self.cache.delete_by_prefix(IMAGES_PREFIX).await
    }

    /// Drop every cached manifest; returns how many were stored
    pub async fn clear_all(&self) -> usize {
        let count = self.cache.len().await as usize;
        self.cache.clear().await;
        count
    }

    pub async fn cached_count(&self) -> u64 {
        self.cache.len().await
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ProxyError::InvalidPayload(e.to_string()))
}
