//! Cache key derivation
//!
//! Every gallery image is addressed by the content hash embedded in its origin
//! API path (`/api/media/public/{hash}` or `/api/media/public/thumbnail/{hash}`).
//! Local cache files are named `{resource_type}-{stem}.{ext}`, so the full-size
//! image and the thumbnail of the same origin object are independent entries.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use url::Url;

const HASH_LEN: usize = 64;
const PLACEHOLDER_FILENAME: &str = "image.jpg";
const DEFAULT_EXTENSION: &str = "jpg";

/// Which rendition of an origin image a cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Media,
    Thumb,
}

impl ResourceType {
    pub fn from_thumb_flag(thumb: bool) -> Self {
        if thumb {
            ResourceType::Thumb
        } else {
            ResourceType::Media
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Media => "media",
            ResourceType::Thumb => "thumb",
        }
    }

    /// Origin API path for this rendition of `hash`
    pub fn api_path(&self, hash: &ContentHash) -> String {
        match self {
            ResourceType::Media => format!("/api/media/public/{}", hash),
            ResourceType::Thumb => format!("/api/media/public/thumbnail/{}", hash),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated 64 character lowercase hex content hash
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(value: &str) -> Result<Self> {
        let valid = value.len() == HASH_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(CacheError::InvalidHash(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Extract the content hash from an origin API path.
///
/// The hash is the final path segment; the query string, if any, is ignored.
pub fn extract_hash(path: &str) -> Result<ContentHash> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let last = path
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    ContentHash::parse(last).map_err(|_| CacheError::InvalidHash(path.to_string()))
}

/// Derive the cache filename for an origin URL.
///
/// Only the basename of the URL path takes part, so two origin resources that
/// share a basename in different directories map to the same cache entry.
pub fn derive_filename(resource_type: ResourceType, origin_url: &str) -> String {
    let path = match Url::parse(origin_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => origin_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let basename = path.rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(basename).unwrap_or(Cow::Borrowed(basename));
    let mut filename = sanitize_filename(&decoded);
    if filename.is_empty() {
        filename = PLACEHOLDER_FILENAME.to_string();
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
        _ => (filename.as_str(), DEFAULT_EXTENSION),
    };

    format!("{}-{}.{}", resource_type, stem, ext)
}

/// Reduce a path segment to a filesystem-safe name
fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            c
        } else if c.is_whitespace() {
            '-'
        } else {
            continue;
        };

        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }

    out.trim_matches(|c| c == '.' || c == '-' || c == '_')
        .to_string()
}
