//! Error types for the gallery proxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gallery_cache::CacheError;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    /// No origin base URL is configured
    ConfigMissing,
    OriginUnreachable(Box<reqwest::Error>),
    OriginNonOk(u16),
    InvalidPayload(String),
    InvalidKey(String),
    NotFound(String),
    Unauthorized,
    Cache(CacheError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::ConfigMissing => write!(f, "Origin base URL not configured"),
            ProxyError::OriginUnreachable(err) => write!(f, "Origin unreachable: {}", err),
            ProxyError::OriginNonOk(status) => write!(f, "Origin returned status {}", status),
            ProxyError::InvalidPayload(msg) => write!(f, "Invalid payload: {}", msg),
            ProxyError::InvalidKey(key) => write!(f, "Invalid key: {}", key),
            ProxyError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ProxyError::Unauthorized => write!(f, "Unauthorized"),
            ProxyError::Cache(err) => write!(f, "Cache error: {}", err),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::OriginUnreachable(err) => Some(err.as_ref()),
            ProxyError::Cache(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ConfigMissing | ProxyError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients; never carries URLs or paths
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::ConfigMissing => "Base URL not configured".to_string(),
            ProxyError::InvalidKey(_) => "Invalid key".to_string(),
            ProxyError::NotFound(msg) => msg.clone(),
            ProxyError::Unauthorized => "Authentication required".to_string(),
            ProxyError::OriginUnreachable(_) | ProxyError::OriginNonOk(_) => {
                "Upstream API error".to_string()
            }
            ProxyError::InvalidPayload(_) => "Invalid upstream response".to_string(),
            ProxyError::Cache(_) | ProxyError::Io(_) | ProxyError::Config(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, axum::Json(json!({ "error": self.public_message() }))).into_response()
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::OriginUnreachable(Box::new(err))
    }
}

impl From<CacheError> for ProxyError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidHash(value) => ProxyError::InvalidKey(value),
            other => ProxyError::Cache(other),
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Why a single origin download did not produce a cache entry.
///
/// Cloneable so one outcome can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Unreachable(String),
    NonOk(u16),
    TooSmall(u64),
    InvalidFormat,
    Storage(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Unreachable(msg) => write!(f, "origin unreachable: {}", msg),
            FetchFailure::NonOk(status) => write!(f, "origin returned HTTP {}", status),
            FetchFailure::TooSmall(size) => write!(f, "download too small ({} bytes)", size),
            FetchFailure::InvalidFormat => write!(f, "download is not a recognised image"),
            FetchFailure::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for FetchFailure {}

impl From<CacheError> for FetchFailure {
    fn from(err: CacheError) -> Self {
        FetchFailure::Storage(err.to_string())
    }
}
