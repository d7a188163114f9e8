//! Gallery cache primitives
//!
//! Disk-backed, content-addressed image storage plus a TTL cache for whole
//! manifest responses. Key derivation binds origin media paths to stable
//! cache filenames. Nothing in here talks to the network.

pub mod error;
pub mod keys;
pub mod manifest;
pub mod signature;
pub mod store;
pub mod types;

pub use error::{CacheError, Result};
pub use keys::{derive_filename, extract_hash, ContentHash, ResourceType};
pub use manifest::{ManifestCache, ManifestEntry};
pub use signature::ImageFormat;
pub use store::{ContentStore, PartialFile};
pub use types::{CacheEntry, CacheStats};
