//! Configuration types
//!
//! A single explicit configuration struct is passed into each component at
//! construction. There is no dynamic config store: the embedding
//! application deserializes `CacheConfig` from its own settings source and
//! hands it down.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_SECONDS, DEFAULT_FILE_CACHE_MAX_SIZE, DEFAULT_TILE_CACHE_MAX_SIZE,
    DEFAULT_TILE_SIZE, DEFAULT_TILING_THRESHOLD,
};

/// Top-level configuration for the cache core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub file_cache: FileCacheConfig,
    #[serde(default)]
    pub tiles: TileConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_cache: FileCacheConfig::default(),
            tiles: TileConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Validate the whole configuration tree
    pub fn validate(&self) -> Result<(), String> {
        self.file_cache.validate()?;
        self.tiles.validate()?;
        Ok(())
    }
}

/// Configuration for the whole-file cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCacheConfig {
    /// Directory the cached files live in
    pub path: PathBuf,
    /// Soft maximum total size in bytes
    #[serde(default = "default_file_cache_max_size")]
    pub max_size_bytes: u64,
    /// Timeout for a single remote fetch in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,
    /// In offline mode remote files are downloaded and cached like local
    /// ones; otherwise requests for remote files are redirected to origin
    #[serde(default)]
    pub offline_mode: bool,
}

fn default_file_cache_max_size() -> u64 {
    DEFAULT_FILE_CACHE_MAX_SIZE
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECONDS
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("reeftile-files"),
            max_size_bytes: DEFAULT_FILE_CACHE_MAX_SIZE,
            timeout_seconds: DEFAULT_FETCH_TIMEOUT_SECONDS,
            offline_mode: false,
        }
    }
}

impl FileCacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size_bytes == 0 {
            return Err("file cache max_size_bytes must be greater than 0".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("file cache timeout_seconds must be greater than 0".to_string());
        }
        if self.path.as_os_str().is_empty() {
            return Err("file cache path cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Configuration for tile generation and the tile cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileConfig {
    /// Tile a local image when its longest edge exceeds this many pixels
    #[serde(default = "default_tiling_threshold")]
    pub threshold: u32,
    /// Edge length of a single tile in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    /// Directory to hold archives while they are generated
    pub tmp_dir: PathBuf,
    /// Storage locator prefix for the durable tile archives, e.g.
    /// `/var/lib/reeftile/tiles` or `s3://tiles`
    pub storage: String,
    #[serde(default)]
    pub cache: TileCacheConfig,
}

fn default_tiling_threshold() -> u32 {
    DEFAULT_TILING_THRESHOLD
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_TILING_THRESHOLD,
            tile_size: DEFAULT_TILE_SIZE,
            tmp_dir: std::env::temp_dir(),
            storage: std::env::temp_dir()
                .join("reeftile-tile-archives")
                .to_string_lossy()
                .into_owned(),
            cache: TileCacheConfig::default(),
        }
    }
}

impl TileConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.threshold == 0 {
            return Err("tiling threshold must be greater than 0".to_string());
        }
        if self.storage.is_empty() {
            return Err("tile storage locator cannot be empty".to_string());
        }
        self.cache.validate()
    }
}

/// Configuration for the extracted-tile cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileCacheConfig {
    /// Directory the extracted tile sets live in
    pub path: PathBuf,
    /// Soft maximum total size in bytes
    #[serde(default = "default_tile_cache_max_size")]
    pub max_size_bytes: u64,
}

fn default_tile_cache_max_size() -> u64 {
    DEFAULT_TILE_CACHE_MAX_SIZE
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("reeftile-tiles"),
            max_size_bytes: DEFAULT_TILE_CACHE_MAX_SIZE,
        }
    }
}

impl TileCacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size_bytes == 0 {
            return Err("tile cache max_size_bytes must be greater than 0".to_string());
        }
        if self.path.as_os_str().is_empty() {
            return Err("tile cache path cannot be empty".to_string());
        }
        Ok(())
    }
}
