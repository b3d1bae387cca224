//! Extracted-tile cache
//!
//! Tile archives live zip-packed on durable storage; the web server needs
//! plain files it can serve directly. This cache extracts an image's
//! archive on demand into a sharded slot directory
//! (`<root>/<ab>/<cd>/<key>/<level>/<x>_<y>.jpg`) and enforces the same
//! soft byte budget and LRU eviction as the file cache. Slot directory
//! mtimes record last access; a sidecar `<key>.lock` makes extraction
//! mutually exclusive across workers and shields in-flight extractions
//! from the sweep.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::eviction::{self, EvictionCandidate, SweepOutcome};
use crate::cache::lock::{self};
use crate::cache::stats::{CacheStats, StatsTracker};
use crate::config::TileConfig;
use crate::entity::{fragment_key_path, SourceFile};
use crate::error::Error;
use crate::storage::StorageRegistry;

pub struct TileCache {
    config: TileConfig,
    storage: Arc<StorageRegistry>,
    stats: Arc<StatsTracker>,
}

impl TileCache {
    pub fn new(config: TileConfig, storage: Arc<StorageRegistry>) -> Result<Self, Error> {
        config.validate().map_err(Error::Config)?;
        std::fs::create_dir_all(&config.cache.path)?;
        Ok(Self {
            config,
            storage,
            stats: Arc::new(StatsTracker::new()),
        })
    }

    /// Durable storage locator of an image's tile archive
    pub fn archive_locator(&self, key: &str) -> String {
        crate::entity::archive_locator(&self.config.storage, key)
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.config.cache.path.join(fragment_key_path(key))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        let slot = self.slot_path(key);
        slot.with_file_name(format!("{}.lock", key))
    }

    /// Return the directory holding the extracted tile set for the
    /// image, extracting the archive first on a miss. The path is ready
    /// for direct static-file serving.
    pub async fn get(&self, source: &SourceFile) -> Result<PathBuf, Error> {
        if !source.tiled {
            return Err(Error::NotRetrievable(format!(
                "No tile archive exists for {}",
                source.key
            )));
        }

        let slot = self.slot_path(&source.key);
        if tokio::fs::try_exists(&slot).await? {
            touch_dir(&slot).await;
            self.stats.record_hit();
            return Ok(slot);
        }

        self.stats.record_miss();
        self.extract(source, slot).await
    }

    /// Remove an image's extracted tiles from the local cache. A no-op
    /// when nothing is extracted, so at-least-once delivery of deletion
    /// events is safe.
    pub async fn invalidate(&self, key: &str) -> Result<(), Error> {
        let slot = self.slot_path(key);
        let sidecar = self.sidecar_path(key);
        if let Some(parent) = sidecar.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Waits for an in-flight extraction of the same key to finish
        // rather than pulling the slot out from under it
        let guard = lock::exclusive(sidecar.clone()).await?;
        match tokio::fs::remove_dir_all(&slot).await {
            Ok(()) => debug!(key, "Invalidated extracted tiles"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        drop(guard);
        let _ = tokio::fs::remove_file(&sidecar).await;
        Ok(())
    }

    /// Run an eviction sweep over the extracted slots
    pub async fn prune(&self) -> Result<SweepOutcome, Error> {
        let root = self.config.cache.path.clone();
        let max_size = self.config.cache.max_size_bytes;
        let outcome = tokio::task::spawn_blocking(move || -> io::Result<SweepOutcome> {
            let candidates = scan_slots(&root)?;
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

    async fn extract(&self, source: &SourceFile, slot: PathBuf) -> Result<PathBuf, Error> {
        if let Some(parent) = slot.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sidecar = self.sidecar_path(&source.key);
        let guard = lock::exclusive(sidecar).await?;

        // Another worker may have extracted while this one waited
        if tokio::fs::try_exists(&slot).await? {
            touch_dir(&slot).await;
            drop(guard);
            return Ok(slot);
        }

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let locator = self.archive_locator(&source.key);
        let backend = self.storage.resolve(&locator)?;
        let tmp_zip = self
            .config
            .cache
            .path
            .join(format!("{}.zip.tmp-{}", source.key, nonce));
        let tmp_dir = slot.with_file_name(format!("{}.tmp-{}", source.key, nonce));

        let result: Result<(), Error> = async {
            backend.download(&locator, &tmp_zip).await?;

            let archive = tmp_zip.clone();
            let dest = tmp_dir.clone();
            tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
                .await
                .map_err(Error::from)??;

            tokio::fs::rename(&tmp_dir, &slot).await?;
            Ok(())
        }
        .await;

        let _ = tokio::fs::remove_file(&tmp_zip).await;
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
        }
        result?;

        touch_dir(&slot).await;
        drop(guard);

        if let Err(err) = self.prune().await {
            warn!(error = %err, "Tile cache eviction sweep failed");
        }
        Ok(slot)
    }
}

/// Refresh a slot directory's mtime, which is its last-access record
async fn touch_dir(path: &Path) {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> io::Result<()> {
        std::fs::File::open(&path)?.set_modified(std::time::SystemTime::now())
    })
    .await;
    if let Ok(Err(err)) = result {
        debug!(error = %err, "Could not refresh tile slot mtime");
    }
}

/// Extract every archive member into `dest`, rejecting members whose
/// names escape the destination
fn extract_archive(archive_path: &Path, dest: &Path) -> Result<(), Error> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    std::fs::create_dir_all(dest)?;
    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let relative = member
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Corrupt(format!("Unsafe archive member: {}", member.name())))?;
        let out_path = dest.join(relative);

        if member.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&out_path)?;
            std::io::copy(&mut member, &mut out)?;
        }
    }
    Ok(())
}

/// Collect evictable slot directories two shard levels below the root
fn scan_slots(root: &Path) -> io::Result<Vec<EvictionCandidate>> {
    let mut candidates = Vec::new();
    for first in read_dirs(root)? {
        for second in read_dirs(&first)? {
            for entry in std::fs::read_dir(&second)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy().into_owned();
                if name.ends_with(".lock") || name.contains(".tmp-") {
                    continue;
                }
                let metadata = match entry.metadata() {
                    Ok(metadata) if metadata.is_dir() => metadata,
                    _ => continue,
                };
                let path = entry.path();
                candidates.push(EvictionCandidate {
                    probe_path: second.join(format!("{}.lock", name)),
                    extra_paths: vec![second.join(format!("{}.lock", name))],
                    create_probe: true,
                    size: eviction::dir_size(&path)?,
                    modified: metadata.modified()?,
                    path,
                });
            }
        }
    }
    Ok(candidates)
}

fn read_dirs(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains(".tmp-") || name.ends_with(".lock") {
            continue;
        }
        if entry.metadata()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}
