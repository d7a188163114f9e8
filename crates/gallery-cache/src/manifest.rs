//! TTL cache for whole manifest responses
//!
//! Freshness is checked lazily on read: an entry is fresh iff
//! `now < stored_at + ttl`, and a stale entry is dropped and reported absent.
//! Empty payloads are never stored, so the last good manifest survives an
//! origin that starts answering with nothing.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub payload: Arc<Value>,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl ManifestEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.stored_at).to_std() {
            Ok(age) => age < self.ttl,
            // stored_at is in the future, e.g. after a clock step
            Err(_) => true,
        }
    }
}

/// Key/value cache for manifest payloads
pub struct ManifestCache {
    entries: Cache<String, ManifestEntry>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .build();
        Self { entries }
    }

    /// Fresh payload for `key`, if any
    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        let entry = self.entries.get(key).await?;
        if entry.is_fresh_at(Utc::now()) {
            return Some(entry.payload);
        }

        debug!(key = %key, "Manifest entry expired");
        self.entries.invalidate(key).await;
        None
    }

    /// Store `value` under `key`; empty values are ignored and `false` is returned
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        if is_empty_payload(&value) {
            debug!(key = %key, "Not caching empty manifest");
            return false;
        }

        let entry = ManifestEntry {
            payload: Arc::new(value),
            stored_at: Utc::now(),
            ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached manifest");
        true
    }

    /// Drop `key`; returns whether an entry was present
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).await.is_some()
    }

    /// Drop every entry whose key starts with `prefix`; returns how many went
    pub async fn delete_by_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        for key in &keys {
            self.entries.invalidate(key.as_str()).await;
        }
        debug!(prefix = %prefix, removed = keys.len(), "Dropped manifests by prefix");
        keys.len()
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    /// Number of stored entries, including ones not yet found to be stale
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new()
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = ManifestCache::new();
        assert!(cache.set("manifest:dates", json!(["2024-05-01"]), WEEK).await);

        let value = cache.get("manifest:dates").await.unwrap();
        assert_eq!(*value, json!(["2024-05-01"]));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let cache = ManifestCache::new();
        assert!(cache.get("manifest:collections").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = ManifestCache::new();
        cache
            .set("manifest:dates", json!(["2024-05-01"]), Duration::ZERO)
            .await;
        assert!(cache.get("manifest:dates").await.is_none());
    }

    #[tokio::test]
    async fn test_empty_value_keeps_previous() {
        let cache = ManifestCache::new();
        cache.set("manifest:dates", json!(["2024-05-01"]), WEEK).await;

        for empty in [json!(null), json!([]), json!({}), json!("")] {
            assert!(!cache.set("manifest:dates", empty, WEEK).await);
        }

        let value = cache.get("manifest:dates").await.unwrap();
        assert_eq!(*value, json!(["2024-05-01"]));
    }

    #[tokio::test]
    async fn test_empty_value_not_stored_when_absent() {
        let cache = ManifestCache::new();
        cache.set("manifest:dates", json!([]), WEEK).await;
        assert!(cache.get("manifest:dates").await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = ManifestCache::new();
        cache.set("manifest:dates", json!(["a"]), WEEK).await;
        assert!(cache.delete("manifest:dates").await);
        assert!(cache.get("manifest:dates").await.is_none());
        assert!(!cache.delete("manifest:dates").await);
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let cache = ManifestCache::new();
        cache.set("manifest:images:aaa", json!({"items": [1]}), WEEK).await;
        cache.set("manifest:images:bbb", json!({"items": [2]}), WEEK).await;
        cache.set("manifest:dates", json!(["d"]), WEEK).await;

        assert_eq!(cache.delete_by_prefix("manifest:images:").await, 2);

        assert!(cache.get("manifest:images:aaa").await.is_none());
        assert!(cache.get("manifest:images:bbb").await.is_none());
        assert!(cache.get("manifest:dates").await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = ManifestCache::new();
        cache.set("manifest:dates", json!(["d"]), WEEK).await;
        cache.set("manifest:collections", json!(["c"]), WEEK).await;
        cache.clear().await;

        assert!(cache.get("manifest:dates").await.is_none());
        assert!(cache.get("manifest:collections").await.is_none());
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let entry = ManifestEntry {
            payload: Arc::new(json!(["x"])),
            stored_at: now - chrono::Duration::seconds(60),
            ttl: Duration::from_secs(60),
        };
        assert!(!entry.is_fresh_at(now));
        assert!(entry.is_fresh_at(now - chrono::Duration::seconds(1)));
    }
}
