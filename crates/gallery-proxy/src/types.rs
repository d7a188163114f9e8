//! Response bodies for the service endpoints

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheHealth,
    /// Origin downloads currently running
    pub in_flight: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheHealth {
    pub files: usize,
    pub total_size: u64,
    pub manifests: u64,
}

/// Result of an admin clear action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearResponse {
    pub files: usize,
    pub manifests: usize,
}
