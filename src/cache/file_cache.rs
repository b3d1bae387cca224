//! Whole-file cache
//!
//! Downloads original files on demand into a single shared cache
//! directory, keyed by the source file's UUID. The filesystem is the
//! authoritative index: entry mtimes record last access, shared flocks pin
//! entries that are being read, and an exclusive flock on a sidecar
//! `<key>.lock` file makes population mutually exclusive across worker
//! processes. Promotion into the cache is a single atomic rename of a
//! fully written temp file, so partially fetched content is never visible
//! under the final key.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, warn};

use super::eviction::{self, EvictionCandidate, SweepOutcome};
use super::lock::{self, FileLock};
use super::stats::{CacheStats, StatsTracker};
use crate::config::FileCacheConfig;
use crate::entity::SourceFile;
use crate::error::Error;
use crate::storage::StorageRegistry;

/// What `get_stream` hands back to the web tier
#[derive(Debug)]
pub enum FileStream {
    /// The caller should redirect the client to fetch from origin
    Redirect(String),
    /// A locally cached copy, pinned against eviction while held
    Local(LocalFile),
}

/// An open, shared-locked cached file
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    file: tokio::fs::File,
    _guard: FileLock,
}

impl LocalFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsyncRead for LocalFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

pub struct FileCache {
    config: FileCacheConfig,
    storage: Arc<StorageRegistry>,
    stats: Arc<StatsTracker>,
}

impl FileCache {
    pub fn new(config: FileCacheConfig, storage: Arc<StorageRegistry>) -> Result<Self, Error> {
        config.validate().map_err(Error::Config)?;
        std::fs::create_dir_all(&config.path)?;
        Ok(Self {
            config,
            storage,
            stats: Arc::new(StatsTracker::new()),
        })
    }

    /// Get a byte stream for the source file.
    ///
    /// Remote files are redirected to origin unless the cache runs in
    /// offline mode. Everything else is served from the local cache,
    /// populating it first if needed.
    pub async fn get_stream(&self, source: &SourceFile) -> Result<FileStream, Error> {
        if source.is_remote() && !self.config.offline_mode {
            return Ok(FileStream::Redirect(source.url.clone()));
        }

        let (path, guard) = self.retrieve(source).await?;
        let std_file = guard.file().try_clone().map_err(Error::from)?;
        Ok(FileStream::Local(LocalFile {
            path,
            file: tokio::fs::File::from_std(std_file),
            _guard: guard,
        }))
    }

    /// Guarantee a local copy for the duration of `callback` only.
    ///
    /// The callback runs on the blocking thread pool (consumers need
    /// random local disk access, usually for CPU-heavy work). Afterwards
    /// the cache slot is deleted again unless other readers still hold
    /// it; cleanup happens whether the callback succeeds or fails.
    pub async fn get_once<T, F>(&self, source: &SourceFile, callback: F) -> Result<T, Error>
    where
        F: FnOnce(&SourceFile, &Path) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let (path, guard) = self.retrieve(source).await?;

        let source_clone = source.clone();
        let callback_path = path.clone();
        let result = tokio::task::spawn_blocking(move || callback(&source_clone, &callback_path))
            .await
            .map_err(Error::from);

        drop(guard);
        self.discard(&source.key).await;

        result?
    }

    /// Whether a cached copy currently exists
    pub async fn exists(&self, source: &SourceFile) -> Result<bool, Error> {
        Ok(tokio::fs::try_exists(self.entry_path(&source.key)).await?)
    }

    /// Run an eviction sweep over the cache directory
    pub async fn prune(&self) -> Result<SweepOutcome, Error> {
        let root = self.config.path.clone();
        let max_size = self.config.max_size_bytes;
        let outcome = tokio::task::spawn_blocking(move || -> io::Result<SweepOutcome> {
            let candidates = scan_entries(&root)?;
            Ok(eviction::sweep(candidates, max_size))
        })
        .await
        .map_err(Error::from)??;

        self.stats
            .record_evictions(outcome.evicted, outcome.bytes_freed);
        Ok(outcome)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.config.path.join(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.config.path.join(format!("{}.lock", key))
    }

    /// Return the cached entry under a shared lock, fetching it first on
    /// a miss. The mtime refresh on every hit is what drives LRU order.
    async fn retrieve(&self, source: &SourceFile) -> Result<(PathBuf, FileLock), Error> {
        let path = self.entry_path(&source.key);

        match lock::shared(path.clone()).await {
            Ok(guard) => {
                if let Some(guard) = still_linked(&path, guard)? {
                    let _ = guard.touch();
                    self.stats.record_hit();
                    return Ok((path, guard));
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.stats.record_miss();
        self.populate(source, path).await
    }

    async fn populate(&self, source: &SourceFile, path: PathBuf) -> Result<(PathBuf, FileLock), Error> {
        let sidecar = self.sidecar_path(&source.key);

        // A concurrent sweep can remove the entry between promotion and
        // the shared-lock acquisition below, hence the bounded retry.
        for _attempt in 0..2 {
            let populate_guard = lock::exclusive(sidecar.clone()).await?;

            // Another worker may have finished the fetch while this one
            // waited on the lock
            if !tokio::fs::try_exists(&path).await? {
                self.fetch(source, &path).await?;
            }

            match lock::shared(path.clone()).await {
                Ok(guard) => match still_linked(&path, guard)? {
                    Some(guard) => {
                        let _ = guard.touch();
                        drop(populate_guard);
                        if let Err(err) = self.prune().await {
                            warn!(error = %err, "File cache eviction sweep failed");
                        }
                        return Ok((path, guard));
                    }
                    None => {
                        drop(populate_guard);
                        continue;
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    drop(populate_guard);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::Transient(format!(
            "Cache entry for {} disappeared during population",
            source.key
        )))
    }

    async fn fetch(&self, source: &SourceFile, path: &Path) -> Result<(), Error> {
        let tmp = self.config.path.join(format!(
            "{}.tmp-{}",
            source.key,
            uuid::Uuid::new_v4().simple()
        ));
        let backend = self.storage.resolve(&source.url)?;

        let result = if source.is_remote() {
            match tokio::time::timeout(self.config.timeout(), backend.download(&source.url, &tmp))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Transient(format!(
                    "Fetch of {} timed out after {}s",
                    source.url, self.config.timeout_seconds
                ))),
            }
        } else {
            backend.download(&source.url, &tmp).await
        };

        match result {
            Ok(bytes) => {
                debug!(key = %source.key, bytes, "Fetched source file into cache");
                if let Err(err) = tokio::fs::rename(&tmp, path).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(err.into());
                }
                Ok(())
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(err)
            }
        }
    }

    /// Best-effort removal of a cache slot after `get_once`. Slots with
    /// remaining readers are left for the eviction sweep.
    async fn discard(&self, key: &str) {
        let path = self.entry_path(key);
        let sidecar = self.sidecar_path(key);
        let result = tokio::task::spawn_blocking(move || -> io::Result<()> {
            if let Some(_guard) = FileLock::try_exclusive(&path)? {
                std::fs::remove_file(&path)?;
                let _ = std::fs::remove_file(&sidecar);
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(key, error = %err, "Could not discard cache slot"),
            Err(err) => debug!(key, error = %err, "Could not discard cache slot"),
        }
    }
}

/// Confirm a freshly acquired shared lock still refers to a linked
/// entry. A discard or sweep can unlink the file between the open and
/// the flock inside `lock::shared`; a lock on an unlinked inode must
/// not count as a hit, or callers that reopen by path would see the
/// entry vanish mid-use.
fn still_linked(path: &Path, guard: FileLock) -> Result<Option<FileLock>, Error> {
    if path.try_exists()? {
        Ok(Some(guard))
    } else {
        Ok(None)
    }
}

/// Collect evictable entries in the flat cache directory, skipping
/// sidecar locks and in-progress temp files
fn scan_entries(root: &Path) -> io::Result<Vec<EvictionCandidate>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".lock") || name.contains(".tmp-") {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let path = entry.path();
        candidates.push(EvictionCandidate {
            probe_path: path.clone(),
            extra_paths: vec![root.join(format!("{}.lock", name))],
            create_probe: false,
            size: metadata.len(),
            modified: metadata.modified()?,
            path,
        });
    }
    Ok(candidates)
}
