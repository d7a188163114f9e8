//! Gallery proxy
//!
//! Serves gallery manifests and images from a local cache in front of a remote
//! media API. Images are stored on disk under keys derived from their origin
//! paths and downloaded at most once at a time per key; manifests are kept in
//! memory with a TTL.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod image;
pub mod manifests;
pub mod origin;
pub mod payload;
pub mod scheduler;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Settings;
pub use coordinator::{DownloadCoordinator, Fallback, FetchMode, Servable};
pub use error::{FetchFailure, ProxyError, Result};
pub use scheduler::{spawn_workers, JobQueue, RefreshScheduler, ScheduledJob};
pub use server::{create_router, start_server, ServerState, SharedState};
