//! Disk-backed content store
//!
//! Maps cache keys to files in a single directory. Writers stream into a
//! hidden partial file next to the target and rename it into place, so a
//! reader sees either the previous complete file or the new complete file.
//! Dot-files are housekeeping and never count as entries.

use crate::error::{CacheError, Result};
use crate::signature::{ImageFormat, SNIFF_LEN};
use crate::types::{CacheEntry, CacheStats};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task;
use tracing::{debug, info, warn};

const KEEP_FILE: &str = ".keep";
const PARTIAL_PREFIX: &str = ".partial-";

/// An in-progress write that only becomes visible once published.
///
/// Dropping it without publishing removes the partial file.
pub struct PartialFile {
    key: String,
    file: fs::File,
    path: TempPath,
    written: u64,
    head: Vec<u8>,
}

impl PartialFile {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Leading bytes of the content, enough to sniff the format
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - self.head.len()).min(chunk.len());
            self.head.extend_from_slice(&chunk[..take]);
        }
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }
}

/// Key to file mapping rooted at one cache directory
#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory, drop the housekeeping marker and sweep
    /// partial files left behind by an interrupted process
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let keep = self.dir.join(KEEP_FILE);
        if fs::metadata(&keep).await.is_err() {
            fs::write(&keep, b"").await?;
        }

        let mut swept = 0usize;
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            if item.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
                if let Err(e) = fs::remove_file(item.path()).await {
                    warn!(path = ?item.path(), error = %e, "Failed to remove stale partial file");
                } else {
                    swept += 1;
                }
            }
        }

        info!(cache_dir = ?self.dir, swept, "Content store initialized");
        Ok(())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(['/', '\\'])
            && key != "..";
        if !valid {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    /// Look up a valid entry: a non-empty regular file with an image signature
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let path = self.path_for(key).ok()?;
        let metadata = fs::metadata(&path).await.ok()?;
        if !metadata.is_file() || metadata.len() == 0 {
            return None;
        }

        let mut head = [0u8; SNIFF_LEN];
        let mut file = fs::File::open(&path).await.ok()?;
        if file.read_exact(&mut head).await.is_err() {
            debug!(key = %key, "Cached file too short to sniff");
            return None;
        }

        let Some(format) = ImageFormat::sniff(&head) else {
            debug!(key = %key, "Cached file has no image signature");
            return None;
        };

        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Some(CacheEntry {
            key: key.to_string(),
            path,
            content_type: format.content_type().to_string(),
            size: metadata.len(),
            modified,
        })
    }

    /// Read the full contents of an entry
    pub async fn read(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        Ok(fs::read(&entry.path).await?)
    }

    /// Start a new write for `key`
    pub async fn create_partial(&self, key: &str) -> Result<PartialFile> {
        self.path_for(key)?;

        let dir = self.dir.clone();
        let suffix = format!("-{}", key);
        let named = task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(PARTIAL_PREFIX)
                .suffix(&suffix)
                .tempfile_in(&dir)
        })
        .await
        .map_err(join_error)??;
        let (file, path) = named.into_parts();

        Ok(PartialFile {
            key: key.to_string(),
            file: fs::File::from_std(file),
            path,
            written: 0,
            head: Vec::with_capacity(SNIFF_LEN),
        })
    }

    /// Atomically move a finished partial file into place
    pub async fn publish(&self, partial: PartialFile) -> Result<CacheEntry> {
        let target = self.path_for(&partial.key)?;
        let PartialFile {
            key,
            mut file,
            path,
            written,
            head,
        } = partial;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let destination = target.clone();
        task::spawn_blocking(move || path.persist(&destination))
            .await
            .map_err(join_error)??;

        let content_type = ImageFormat::sniff(&head)
            .map(|f| f.content_type())
            .unwrap_or("application/octet-stream");

        debug!(key = %key, size = written, "Published cache entry");

        Ok(CacheEntry {
            key,
            path: target,
            content_type: content_type.to_string(),
            size: written,
            modified: Utc::now(),
        })
    }

    /// Write a complete value for `key`, replacing any previous entry
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<CacheEntry> {
        let mut partial = self.create_partial(key).await?;
        partial.write_chunk(data).await?;
        self.publish(partial).await
    }

    /// Remove one entry; returns whether a file was removed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry, keeping housekeeping files
    pub async fn clear_all(&self) -> Result<usize> {
        let mut removed = 0usize;
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            if is_housekeeping(&item.file_name().to_string_lossy()) {
                continue;
            }
            if !item.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(item.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?item.path(), error = %e, "Failed to remove cached file"),
            }
        }

        info!(removed, "Content store cleared");
        Ok(removed)
    }

    /// Count entries and their total size
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            if is_housekeeping(&item.file_name().to_string_lossy()) {
                continue;
            }
            let metadata = item.metadata().await?;
            if metadata.is_file() {
                stats.files += 1;
                stats.total_size += metadata.len();
            }
        }

        Ok(stats)
    }
}

fn join_error(err: task::JoinError) -> CacheError {
    CacheError::from(std::io::Error::other(err))
}

fn is_housekeeping(name: &str) -> bool {
    name.starts_with('.')
}
