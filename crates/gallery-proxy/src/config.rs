use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ProxyError, Result};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Read-only configuration snapshot, built once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    /// Origin media API base URL, without a trailing slash
    pub origin_base_url: Option<String>,
    pub cache_dir: PathBuf,
    pub cache_enabled: bool,
    /// Freshness window for cached images and manifests
    pub cache_ttl: Duration,
    /// Fetch missing thumbnails inside the request instead of in the background
    pub thumbnail_sync: bool,
    pub refresh_workers: usize,
    /// Prefix for proxy URLs written into manifests, e.g. `/gallery`
    pub public_base_path: String,
    pub admin_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3005,
            origin_base_url: None,
            cache_dir: PathBuf::from("./cache/gallery"),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(7 * DAY_SECS),
            thumbnail_sync: true,
            refresh_workers: 2,
            public_base_path: String::new(),
            admin_token: None,
        }
    }
}

impl Settings {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let origin_base_url = lookup("GALLERY_BASE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let cache_dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let cache_enabled = lookup("CACHE_ENABLED")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.cache_enabled);

        let cache_ttl = lookup("CACHE_TTL_DAYS")
            .and_then(|d| d.parse::<u64>().ok())
            .map(|days| Duration::from_secs(days * DAY_SECS))
            .unwrap_or(defaults.cache_ttl);

        let thumbnail_sync = lookup("THUMBNAIL_CACHE_SYNC")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.thumbnail_sync);

        let refresh_workers = lookup("REFRESH_WORKERS")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.refresh_workers);

        let public_base_path = lookup("PUBLIC_BASE_PATH")
            .map(|p| p.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.public_base_path);

        let admin_token = lookup("ADMIN_TOKEN").filter(|t| !t.is_empty());

        Self {
            port,
            origin_base_url,
            cache_dir,
            cache_enabled,
            cache_ttl,
            thumbnail_sync,
            refresh_workers,
            public_base_path,
            admin_token,
        }
    }

    /// Absolute origin URL for an API path
    pub fn origin_url(&self, path: &str) -> Result<String> {
        let base = self
            .origin_base_url
            .as_deref()
            .ok_or(ProxyError::ConfigMissing)?;
        Ok(format!("{}{}", base, path))
    }

    /// Local proxy URL that serves the image with `hash`
    pub fn image_proxy_url(&self, hash: &str, thumb: bool) -> String {
        let query = if thumb { "?thumb=1" } else { "" };
        format!("{}/image/{}{}", self.public_base_path, hash, query)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
