//! Gallery proxy - caching front for gallery images and manifests

use gallery_proxy::{
    spawn_workers, start_server, JobQueue, ProxyError, Result, ServerState, Settings,
    SharedState,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("gallery_proxy=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting gallery proxy...");

    let settings = Settings::from_env();
    info!("Port: {}", settings.port);
    info!("Cache dir: {:?}", settings.cache_dir);
    info!("Cache enabled: {}", settings.cache_enabled);
    info!("Cache TTL: {} days", settings.cache_ttl.as_secs() / 86_400);
    match settings.origin_base_url.as_deref() {
        Some(url) => info!("Origin: {}", url),
        None => info!("Origin not configured; serving cached images only"),
    }

    let port = settings.port;
    let workers = settings.refresh_workers;

    let (queue, receiver) = JobQueue::new();
    let state: SharedState = Arc::new(ServerState::new(settings, Arc::new(queue))?);
    state.store.init().await?;

    let _workers = spawn_workers(receiver, Arc::clone(&state.coordinator), workers);

    // Start HTTP server (blocking)
    start_server(state, port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
