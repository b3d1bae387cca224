//! Background work units and their seams
//!
//! The cache core never schedules work itself: the embedding application
//! owns the queue and the retry policy. This module defines the seams —
//! `JobQueue` for scheduling, `SourceStore` for flipping the tiled flag —
//! and the two units of work the application runs through them:
//! `GenerateTilesJob` (blocking tile generation and upload) and
//! `CleanupTilesHandler` (idempotent processing of deletion events).
//! `TileDispatcher` keeps generation scheduled at most once per image.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::FileCache;
use crate::config::TileConfig;
use crate::entity::{archive_locator, SourceFile};
use crate::error::Error;
use crate::storage::StorageRegistry;
use crate::tile::generate::generate_archive;
use crate::tile::TileCache;

/// Scheduling seam: the application's queue accepts a source file for
/// asynchronous tile generation and retries failed jobs with a bounded
/// attempt count.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(&self, source: SourceFile) -> Result<(), Error>;
}

/// Persistence seam: flips a source file's tiled flag once its archive
/// is durably stored.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn mark_tiled(&self, key: &str) -> Result<(), Error>;
}

/// Generates the tile archive for one image and uploads it.
///
/// Blocking unit of work meant to run inside a queue worker. On any
/// failure the temp archive is removed and the source stays untiled, so
/// the queue can retry with normal job-retry semantics.
pub struct GenerateTilesJob {
    file_cache: Arc<FileCache>,
    config: TileConfig,
    storage: Arc<StorageRegistry>,
    store: Arc<dyn SourceStore>,
}

impl GenerateTilesJob {
    pub fn new(
        file_cache: Arc<FileCache>,
        config: TileConfig,
        storage: Arc<StorageRegistry>,
        store: Arc<dyn SourceStore>,
    ) -> Self {
        Self {
            file_cache,
            config,
            storage,
            store,
        }
    }

    fn temp_path(&self, source: &SourceFile) -> PathBuf {
        self.config.tmp_dir.join(format!("{}.zip", source.key))
    }

    pub async fn run(&self, source: &SourceFile) -> anyhow::Result<()> {
        let temp = self.temp_path(source);
        let result = self.run_inner(source, temp.clone()).await;
        // The temp archive never outlives the job, success or not
        let _ = tokio::fs::remove_file(&temp).await;
        result?;
        Ok(())
    }

    async fn run_inner(&self, source: &SourceFile, temp: PathBuf) -> Result<(), Error> {
        let tile_size = self.config.tile_size;
        let archive = temp.clone();
        let info = self
            .file_cache
            .get_once(source, move |_source, path| {
                generate_archive(path, &archive, tile_size)
            })
            .await?;

        let locator = archive_locator(&self.config.storage, &source.key);
        let backend = self.storage.resolve(&locator)?;
        backend.put_file(&temp, &locator).await?;
        self.store.mark_tiled(&source.key).await?;

        info!(
            key = %source.key,
            levels = info.levels,
            tiles = info.tile_count,
            "Tile archive generated and stored"
        );
        Ok(())
    }
}

/// Schedules tile generation at most once per image.
///
/// The tiled flag covers completed generations; the in-flight set covers
/// the window between submission and completion. Per-process only — a
/// resubmission from another worker is caught by the queue's own
/// deduplication or ends up as a redundant but harmless job, since the
/// archive upload is deterministic per key.
pub struct TileDispatcher {
    queue: Arc<dyn JobQueue>,
    threshold: u32,
    pending: Mutex<HashSet<String>>,
}

impl TileDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, threshold: u32) -> Self {
        Self {
            queue,
            threshold,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Submit generation for the source if it needs tiling and none is
    /// in flight. Returns whether a job was submitted.
    pub async fn ensure_scheduled(&self, source: &SourceFile) -> Result<bool, Error> {
        if source.tiled || !source.needs_tiling(self.threshold) {
            return Ok(false);
        }
        if !self.pending.lock().insert(source.key.clone()) {
            debug!(key = %source.key, "Tile generation already in flight");
            return Ok(false);
        }

        match self.queue.submit(source.clone()).await {
            Ok(()) => Ok(true),
            Err(err) => {
                self.pending.lock().remove(&source.key);
                Err(err)
            }
        }
    }

    /// Called by the queue worker when a job finished (or exhausted its
    /// retries), allowing a later re-request to schedule again.
    pub fn mark_finished(&self, key: &str) {
        self.pending.lock().remove(key);
    }
}

/// Consumes deletion events for batches of keys.
///
/// Delivery is at-least-once and may arrive long after the deletion
/// itself, so every step tolerates already-removed state.
pub struct CleanupTilesHandler {
    tile_cache: Arc<TileCache>,
    storage: Arc<StorageRegistry>,
    storage_prefix: String,
}

impl CleanupTilesHandler {
    pub fn new(tile_cache: Arc<TileCache>, storage: Arc<StorageRegistry>, config: &TileConfig) -> Self {
        Self {
            tile_cache,
            storage,
            storage_prefix: config.storage.clone(),
        }
    }

    pub async fn handle(&self, keys: &[String]) -> Result<(), Error> {
        for key in keys {
            self.tile_cache.invalidate(key).await?;

            let locator = archive_locator(&self.storage_prefix, key);
            let backend = self.storage.resolve(&locator)?;
            if let Err(err) = backend.delete(&locator).await {
                warn!(key, error = %err, "Failed to delete tile archive");
                return Err(err);
            }
            debug!(key, "Cleaned up tiles for deleted source");
        }
        Ok(())
    }
}
