//! Deferred download jobs
//!
//! Jobs travel over an unbounded channel to a small pool of workers. Each
//! worker waits until the job is due and hands it to the download
//! coordinator, detached from whichever request queued it.

use crate::coordinator::DownloadCoordinator;
use chrono::{DateTime, Utc};
use gallery_cache::ResourceType;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A background fetch or refresh of one cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub resource_key: String,
    pub resource_type: ResourceType,
    pub origin_url: String,
    pub due_at: DateTime<Utc>,
}

/// Accepts jobs to run at or after their due time, once, in no particular order
pub trait RefreshScheduler: Send + Sync {
    /// Queue `job`; a rejected job is handed back
    fn schedule(&self, job: ScheduledJob) -> Result<(), ScheduledJob>;
}

/// Sending half of the in-process job queue
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<ScheduledJob>,
}

/// Receiving half, consumed by [`spawn_workers`]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<ScheduledJob>,
}

impl JobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, JobReceiver { rx })
    }
}

impl RefreshScheduler for JobQueue {
    fn schedule(&self, job: ScheduledJob) -> Result<(), ScheduledJob> {
        debug!(key = %job.resource_key, due_at = %job.due_at, "Queued background job");
        self.tx.send(job).map_err(|e| e.0)
    }
}

/// Start `workers` tasks draining `receiver` into `coordinator`
pub fn spawn_workers(
    receiver: JobReceiver,
    coordinator: Arc<DownloadCoordinator>,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(receiver.rx));
    info!(workers, "Starting background download workers");

    (0..workers.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        debug!(worker, "Job queue closed, worker exiting");
                        break;
                    };

                    if let Ok(wait) = (job.due_at - Utc::now()).to_std() {
                        tokio::time::sleep(wait).await;
                    }
                    coordinator.run_job(job).await;
                }
            })
        })
        .collect()
}
