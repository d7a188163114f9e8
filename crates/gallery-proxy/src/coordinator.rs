//! Download coordination
//!
//! Decides between serving a cached entry, serving it stale while a refresh
//! is queued, deferring a first download to the background, or downloading
//! now. Downloads are single-flight per cache key: concurrent callers for the
//! same key share one origin request and receive the same outcome.

use crate::config::Settings;
use crate::error::FetchFailure;
use crate::origin::{without_query, OriginClient};
use crate::scheduler::{RefreshScheduler, ScheduledJob};
use chrono::Utc;
use futures::FutureExt;
use gallery_cache::{derive_filename, CacheEntry, ContentStore, ImageFormat, ResourceType};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Anything shorter is an error page or a truncated body, not an image
pub const MIN_IMAGE_BYTES: u64 = 100;

/// How long a queued job blocks another for the same key. A job the
/// scheduler loses must not pin its key forever.
pub const QUEUED_GRACE: Duration = Duration::from_secs(10 * 60);

type Outcome = Result<CacheEntry, FetchFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Download inside the caller on a miss
    Sync,
    /// Queue the download and fall back to the origin URL on a miss
    Async,
}

/// Where the caller should get the bytes from
#[derive(Debug, Clone, PartialEq)]
pub enum Servable {
    /// Fresh cache entry, no network involved
    Hit(CacheEntry),
    /// Expired entry served as-is while a refresh is queued
    Stale(CacheEntry),
    /// Entry written by this call's download
    Downloaded(CacheEntry),
    Origin { url: String, reason: Fallback },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    CachingDisabled,
    Scheduled,
    Failed(FetchFailure),
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CoordinatorStats {
    pub downloads: u64,
    pub failures: u64,
    pub coalesced: u64,
    pub in_flight: usize,
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    downloads: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

pub struct DownloadCoordinator {
    store: ContentStore,
    origin: Arc<OriginClient>,
    scheduler: Arc<dyn RefreshScheduler>,
    settings: Arc<Settings>,
    in_flight: Mutex<HashMap<String, broadcast::Sender<Outcome>>>,
    /// Keys with a background job queued but not yet started, and when
    queued: Mutex<HashMap<String, Instant>>,
    queue_grace: Duration,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DownloadCoordinator {
    pub fn new(
        store: ContentStore,
        origin: Arc<OriginClient>,
        scheduler: Arc<dyn RefreshScheduler>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            origin,
            scheduler,
            settings,
            in_flight: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            queue_grace: QUEUED_GRACE,
            counters: Counters::default(),
        }
    }

    pub fn with_queue_grace(mut self, grace: Duration) -> Self {
        self.queue_grace = grace;
        self
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            downloads: self.counters.downloads.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            in_flight: lock(&self.in_flight).len(),
            queued: lock(&self.queued).len(),
        }
    }

    /// Resolve `origin_url` to something servable, downloading or queueing as needed
    pub async fn fetch(
        self: &Arc<Self>,
        origin_url: &str,
        resource_type: ResourceType,
        mode: FetchMode,
    ) -> Servable {
        if !self.settings.cache_enabled {
            debug!(url = %without_query(origin_url), "Caching disabled, serving origin");
            return Servable::Origin {
                url: origin_url.to_string(),
                reason: Fallback::CachingDisabled,
            };
        }

        let key = derive_filename(resource_type, origin_url);

        if let Some(entry) = self.store.get(&key).await {
            if entry.is_fresh(self.settings.cache_ttl) {
                debug!(key = %key, size = entry.size, "Cache hit");
                return Servable::Hit(entry);
            }

            let age_secs = entry.age(Utc::now()).as_secs();
            debug!(key = %key, age_secs, "Cache entry stale, queueing refresh");
            self.schedule_once(&key, resource_type, origin_url);
            return Servable::Stale(entry);
        }

        match mode {
            FetchMode::Async => {
                debug!(key = %key, "Cache miss, queueing background download");
                self.schedule_once(&key, resource_type, origin_url);
                Servable::Origin {
                    url: origin_url.to_string(),
                    reason: Fallback::Scheduled,
                }
            }
            FetchMode::Sync => match self.fetch_now(&key, origin_url).await {
                Ok(entry) => Servable::Downloaded(entry),
                Err(failure) => Servable::Origin {
                    url: origin_url.to_string(),
                    reason: Fallback::Failed(failure),
                },
            },
        }
    }

    /// Queue a background job for `key` unless one is already waiting
    pub fn schedule_once(&self, key: &str, resource_type: ResourceType, origin_url: &str) -> bool {
        {
            let mut queued = lock(&self.queued);
            let now = Instant::now();
            if let Some(since) = queued.get(key) {
                if now.duration_since(*since) < self.queue_grace {
                    debug!(key = %key, "Background job already queued");
                    return false;
                }
                warn!(key = %key, "Queued job never ran, queueing again");
            }
            queued.insert(key.to_string(), now);
        }

        let job = ScheduledJob {
            resource_key: key.to_string(),
            resource_type,
            origin_url: origin_url.to_string(),
            due_at: Utc::now(),
        };

        if let Err(job) = self.scheduler.schedule(job) {
            warn!(key = %job.resource_key, "Scheduler rejected background job");
            lock(&self.queued).remove(&job.resource_key);
            return false;
        }
        true
    }

    /// Execute a background job. Safe under duplicate delivery: an entry that
    /// is already fresh is left alone.
    pub async fn run_job(self: &Arc<Self>, job: ScheduledJob) {
        lock(&self.queued).remove(&job.resource_key);

        if !self.settings.cache_enabled {
            debug!(key = %job.resource_key, "Caching disabled, dropping job");
            return;
        }

        if let Some(entry) = self.store.get(&job.resource_key).await {
            if entry.is_fresh(self.settings.cache_ttl) {
                debug!(key = %job.resource_key, "Entry already fresh, skipping job");
                return;
            }
        }

        info!(
            key = %job.resource_key,
            resource_type = %job.resource_type,
            "Background download starting"
        );
        if let Err(failure) = self.fetch_now(&job.resource_key, &job.origin_url).await {
            warn!(key = %job.resource_key, error = %failure, "Background download failed");
        }
    }

    /// Download `origin_url` into `key` now, joining any download already in flight
    pub async fn fetch_now(self: &Arc<Self>, key: &str, origin_url: &str) -> Outcome {
        let mut rx = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some(tx) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Joining in-flight download");
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    in_flight.insert(key.to_string(), tx);

                    // Detached so a caller going away does not cancel the download
                    let this = Arc::clone(self);
                    let key = key.to_string();
                    let url = origin_url.to_string();
                    tokio::spawn(async move {
                        let outcome = AssertUnwindSafe(this.download(&key, &url))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                error!(key = %key, "Download task panicked");
                                Err(FetchFailure::Storage("download task panicked".to_string()))
                            });
                        this.complete(&key, outcome);
                    });
                    rx
                }
            }
        };

        rx.recv().await.unwrap_or_else(|_| {
            Err(FetchFailure::Storage(
                "download finished without a result".to_string(),
            ))
        })
    }

    fn complete(&self, key: &str, outcome: Outcome) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(tx) = in_flight.remove(key) {
            let _ = tx.send(outcome);
        }
    }

    /// Fetch, validate and publish one resource
    async fn download(&self, key: &str, origin_url: &str) -> Outcome {
        // Another flight may have finished between the caller's lookup and ours
        if let Some(entry) = self.store.get(key).await {
            if entry.is_fresh(self.settings.cache_ttl) {
                return Ok(entry);
            }
        }

        let started = Instant::now();
        let url = without_query(origin_url);
        info!(key = %key, url = %url, "Downloading from origin");

        let result = self.download_validated(key, origin_url).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(entry) => {
                self.counters.downloads.fetch_add(1, Ordering::Relaxed);
                info!(key = %key, size = entry.size, elapsed_ms, "Cached download");
            }
            Err(failure) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, url = %url, elapsed_ms, error = %failure, "Download failed");
                self.discard_invalid(key).await;
            }
        }

        result
    }

    async fn download_validated(&self, key: &str, origin_url: &str) -> Outcome {
        let mut partial = self.store.create_partial(key).await?;
        self.origin.download(origin_url, &mut partial).await?;

        let size = partial.written();
        if size < MIN_IMAGE_BYTES {
            return Err(FetchFailure::TooSmall(size));
        }
        if ImageFormat::sniff(partial.head()).is_none() {
            return Err(FetchFailure::InvalidFormat);
        }

        Ok(self.store.publish(partial).await?)
    }

    /// Remove a file at `key` that does not qualify as a valid entry
    async fn discard_invalid(&self, key: &str) {
        if self.store.get(key).await.is_some() {
            return;
        }
        match self.store.delete(key).await {
            Ok(true) => info!(key = %key, "Removed invalid cache file"),
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to remove invalid cache file"),
        }
    }
}
