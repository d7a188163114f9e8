//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A valid image entry as found on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl CacheEntry {
    /// Age of the entry relative to `now`, clamped at zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.modified).to_std().unwrap_or_default()
    }

    /// An entry is fresh while its age is strictly below `ttl`
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age(Utc::now()) < ttl
    }
}

/// File count and size of the image store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub files: usize,
    pub total_size: u64,
}
