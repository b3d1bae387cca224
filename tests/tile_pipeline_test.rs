// Tile pipeline integration tests
//
// The full path of a large image: scheduling, archive generation and
// upload, extraction on demand, and cleanup after deletion.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use reeftile::cache::FileCache;
use reeftile::config::{FileCacheConfig, TileCacheConfig, TileConfig};
use reeftile::entity::SourceFile;
use reeftile::error::Error;
use reeftile::jobs::{
    CleanupTilesHandler, GenerateTilesJob, JobQueue, SourceStore, TileDispatcher,
};
use reeftile::storage::{MemoryBackend, StorageBackend, StorageRegistry};
use reeftile::tile::TileCache;

struct RecordingQueue {
    submitted: Mutex<Vec<SourceFile>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn submit(&self, source: SourceFile) -> Result<(), Error> {
        self.submitted.lock().push(source);
        Ok(())
    }
}

struct InMemoryStore {
    tiled: Mutex<HashSet<String>>,
}

#[async_trait]
impl SourceStore for InMemoryStore {
    async fn mark_tiled(&self, key: &str) -> Result<(), Error> {
        self.tiled.lock().insert(key.to_string());
        Ok(())
    }
}

struct Pipeline {
    backend: MemoryBackend,
    storage: Arc<StorageRegistry>,
    file_cache: Arc<FileCache>,
    tile_cache: Arc<TileCache>,
    tile_config: TileConfig,
    store: Arc<InMemoryStore>,
    queue: Arc<RecordingQueue>,
    dispatcher: TileDispatcher,
}

fn make_pipeline(root: &Path) -> Pipeline {
    let backend = MemoryBackend::new();
    let mut registry = StorageRegistry::new(Duration::from_secs(5)).unwrap();
    registry.register("mem", Arc::new(backend.clone()));
    let storage = Arc::new(registry);

    let file_cache = Arc::new(
        FileCache::new(
            FileCacheConfig {
                path: root.join("files"),
                max_size_bytes: 10_000_000,
                timeout_seconds: 5,
                offline_mode: false,
            },
            storage.clone(),
        )
        .unwrap(),
    );
    let tile_config = TileConfig {
        threshold: 400,
        tile_size: 128,
        tmp_dir: root.join("tmp"),
        storage: "mem://tiles".to_string(),
        cache: TileCacheConfig {
            path: root.join("tiles"),
            max_size_bytes: 10_000_000,
        },
    };
    std::fs::create_dir_all(root.join("tmp")).unwrap();
    let tile_cache = Arc::new(TileCache::new(tile_config.clone(), storage.clone()).unwrap());

    let queue = Arc::new(RecordingQueue {
        submitted: Mutex::new(Vec::new()),
    });
    let dispatcher = TileDispatcher::new(queue.clone(), tile_config.threshold);

    Pipeline {
        backend,
        storage,
        file_cache,
        tile_cache,
        tile_config,
        store: Arc::new(InMemoryStore {
            tiled: Mutex::new(HashSet::new()),
        }),
        queue,
        dispatcher,
    }
}

fn seed_image(pipeline: &Pipeline, key: &str, width: u32, height: u32) -> SourceFile {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 77])
    });
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageOutputFormat::Png)
        .unwrap();
    pipeline
        .backend
        .put(&format!("mem://images/{}", key), bytes.into_inner());

    SourceFile {
        key: key.to_string(),
        url: format!("mem://images/{}", key),
        size: 0,
        mime_type: "image/png".to_string(),
        width: Some(width),
        height: Some(height),
        tiled: false,
    }
}

fn make_job(pipeline: &Pipeline) -> GenerateTilesJob {
    GenerateTilesJob::new(
        pipeline.file_cache.clone(),
        pipeline.tile_config.clone(),
        pipeline.storage.clone(),
        pipeline.store.clone(),
    )
}

#[tokio::test]
async fn test_large_image_flows_from_schedule_to_served_tiles() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let pipeline = make_pipeline(root);

    // A 600x500 image against a 400px threshold needs tiling
    let mut source = seed_image(&pipeline, "abcd0001", 600, 500);

    // Tiles cannot be served before generation; exactly one job is
    // scheduled for the image no matter how often it is requested.
    let err = pipeline.tile_cache.get(&source).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(pipeline.dispatcher.ensure_scheduled(&source).await.unwrap());
    assert!(!pipeline.dispatcher.ensure_scheduled(&source).await.unwrap());
    assert_eq!(pipeline.queue.submitted.lock().len(), 1);

    // The queue worker runs the job
    let job = make_job(&pipeline);
    job.run(&source).await.unwrap();
    pipeline.dispatcher.mark_finished(&source.key);
    assert!(pipeline.store.tiled.lock().contains("abcd0001"));

    // The archive landed under the sharded locator
    assert!(pipeline
        .backend
        .exists("mem://tiles/ab/cd/abcd0001")
        .await
        .unwrap());
    // Nothing was left behind in the staging or file cache directories
    assert!(std::fs::read_dir(root.join("tmp")).unwrap().next().is_none());
    assert!(!root.join("files/abcd0001").exists());

    // Serving: the extracted slot contains the descriptor and the
    // full-resolution corner tile
    source.tiled = true;
    let slot = pipeline.tile_cache.get(&source).await.unwrap();
    assert!(slot.join("ImageProperties.xml").exists());
    // 600x500 at tile 128: levels 0..=3, level 3 is full resolution
    assert!(slot.join("3/0_0.jpg").exists());
    assert!(slot.join("3/4_3.jpg").exists());
    assert!(slot.join("0/0_0.jpg").exists());

    let tile = image::open(slot.join("3/4_3.jpg")).unwrap();
    assert_eq!(tile.width(), 600 - 4 * 128);
    assert_eq!(tile.height(), 500 - 3 * 128);
}

#[tokio::test]
async fn test_small_image_is_never_scheduled() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = make_pipeline(temp_dir.path());

    let source = seed_image(&pipeline, "small001", 300, 200);
    assert!(!pipeline.dispatcher.ensure_scheduled(&source).await.unwrap());
    assert!(pipeline.queue.submitted.lock().is_empty());
}

#[tokio::test]
async fn test_failed_generation_leaves_no_archive_and_source_untiled() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let pipeline = make_pipeline(root);

    let source = seed_image(&pipeline, "abcd0002", 600, 500);
    pipeline.backend.set_fail_uploads(true);

    let job = make_job(&pipeline);
    assert!(job.run(&source).await.is_err());

    assert!(!pipeline.store.tiled.lock().contains("abcd0002"));
    assert!(!pipeline
        .backend
        .exists("mem://tiles/ab/cd/abcd0002")
        .await
        .unwrap());
    assert!(std::fs::read_dir(root.join("tmp")).unwrap().next().is_none());

    // The queue retries: a later attempt succeeds
    pipeline.backend.set_fail_uploads(false);
    job.run(&source).await.unwrap();
    assert!(pipeline.store.tiled.lock().contains("abcd0002"));
}

#[tokio::test]
async fn test_cleanup_after_deletion_is_complete_and_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = make_pipeline(temp_dir.path());

    let mut source = seed_image(&pipeline, "abcd0003", 600, 500);
    let job = make_job(&pipeline);
    job.run(&source).await.unwrap();

    source.tiled = true;
    let slot = pipeline.tile_cache.get(&source).await.unwrap();
    assert!(slot.exists());

    let handler = CleanupTilesHandler::new(
        pipeline.tile_cache.clone(),
        pipeline.storage.clone(),
        &pipeline.tile_config,
    );
    let keys = vec!["abcd0003".to_string()];
    handler.handle(&keys).await.unwrap();

    assert!(!slot.exists());
    assert!(!pipeline
        .backend
        .exists("mem://tiles/ab/cd/abcd0003")
        .await
        .unwrap());

    // A redelivered deletion event changes nothing
    handler.handle(&keys).await.unwrap();
    assert!(!slot.exists());
}
