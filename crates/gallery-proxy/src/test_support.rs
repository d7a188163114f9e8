//! Shared fixtures for unit tests

use crate::config::Settings;
use crate::scheduler::{RefreshScheduler, ScheduledJob};
use crate::server::ServerState;
use axum::Router;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HASH: &str = "ab12cd34ef56ab12cd34ef56ab12cd34ef56ab12cd34ef56ab12cd34ef56ef34";

/// A JPEG-signed body of exactly `len` bytes
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    if len >= 2 {
        data[0] = 0xFF;
        data[1] = 0xD8;
    }
    data
}

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn_origin(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub struct CountingOrigin {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl CountingOrigin {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Origin answering every path with `body` after `delay`, counting requests
pub async fn counting_origin(body: Vec<u8>, delay: Duration) -> CountingOrigin {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let router = Router::new().fallback(move || {
        let counter = Arc::clone(&counter);
        let body = body.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            body
        }
    });

    CountingOrigin {
        base_url: spawn_origin(router).await,
        hits,
    }
}

pub fn test_settings(dir: &Path, base: Option<&str>) -> Settings {
    Settings {
        origin_base_url: base.map(str::to_string),
        cache_dir: dir.to_path_buf(),
        ..Settings::default()
    }
}

pub async fn test_state(
    dir: &Path,
    base: Option<&str>,
    scheduler: Arc<dyn RefreshScheduler>,
) -> Arc<ServerState> {
    test_state_with(test_settings(dir, base), scheduler).await
}

pub async fn test_state_with(
    settings: Settings,
    scheduler: Arc<dyn RefreshScheduler>,
) -> Arc<ServerState> {
    let state = ServerState::new(settings, scheduler).unwrap();
    state.store.init().await.unwrap();
    Arc::new(state)
}

/// Scheduler that records jobs instead of running them
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl RecordingScheduler {
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl RefreshScheduler for RecordingScheduler {
    fn schedule(&self, job: ScheduledJob) -> Result<(), ScheduledJob> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
