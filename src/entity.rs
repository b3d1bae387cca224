//! Source file descriptor
//!
//! `SourceFile` is the view of an image record that the cache core needs:
//! a stable key (UUID), where the original bytes live, and enough metadata
//! to decide whether the image must be tiled. The surrounding application
//! owns the full record; it hands this descriptor into the caches.

use serde::{Deserialize, Serialize};

/// Descriptor of a source image file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Stable identifier, typically a UUID
    pub key: String,
    /// Storage locator of the original bytes: an absolute local path,
    /// an `http(s)://` URL or an `s3://bucket/key` identifier
    pub url: String,
    /// Logical size of the original in bytes
    pub size: u64,
    /// MIME type of the original
    pub mime_type: String,
    /// Pixel dimensions, if known
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Whether a tile archive exists for this file
    pub tiled: bool,
}

impl SourceFile {
    /// Whether the original lives on a remote backend
    pub fn is_remote(&self) -> bool {
        self.url.starts_with("http://")
            || self.url.starts_with("https://")
            || self.url.starts_with("s3://")
    }

    /// Whether this image should be tiled: its longest edge exceeds the
    /// configured threshold. Images with unknown dimensions are never
    /// tiled.
    pub fn needs_tiling(&self, threshold: u32) -> bool {
        let longest = self.width.unwrap_or(0).max(self.height.unwrap_or(0));
        longest > threshold
    }

    /// Sharded storage path of this file's tile archive, relative to the
    /// tiles storage root.
    pub fn fragment_path(&self) -> String {
        fragment_key_path(&self.key)
    }
}

/// Split a key into a two-level directory sharding scheme: the first two
/// and next two characters become directories, the full key the file name.
/// Bounds the size of any single storage directory.
pub fn fragment_key_path(key: &str) -> String {
    if key.len() < 4 {
        // Degenerate keys are stored flat
        return key.to_string();
    }
    format!("{}/{}/{}", &key[0..2], &key[2..4], key)
}

/// Durable storage locator of a key's tile archive under the configured
/// tiles storage prefix.
pub fn archive_locator(storage_prefix: &str, key: &str) -> String {
    format!(
        "{}/{}",
        storage_prefix.trim_end_matches('/'),
        fragment_key_path(key)
    )
}
