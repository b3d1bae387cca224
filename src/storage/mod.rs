//! Storage backend adapters
//!
//! A `StorageBackend` is a uniform interface over the places original
//! files and tile archives can live: the local filesystem, an HTTP(S)
//! origin, or an S3-compatible object store. Backends supply existence
//! checks and whole-file transfer; they never retry — retry policy belongs
//! to callers (the job scheduler for generation, nobody for interactive
//! reads).
//!
//! Locators are either plain filesystem paths or `scheme://` identifiers.
//! 4xx responses and missing files surface as `Error::NotRetrievable`;
//! 5xx responses and timeouts as `Error::Transient`.

pub mod factory;
pub mod http;
pub mod local;
pub mod memory;
pub mod s3;

pub use factory::StorageRegistry;
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use s3::S3Backend;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Error;

/// Uniform interface over file storage locations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Check whether a file exists at the locator
    async fn exists(&self, locator: &str) -> Result<bool, Error>;

    /// Stream the file at the locator into `dest`, returning the number
    /// of bytes written. Nothing is left at `dest` on failure.
    async fn download(&self, locator: &str, dest: &Path) -> Result<u64, Error>;

    /// Upload a local file to the destination locator
    async fn put_file(&self, local: &Path, dest: &str) -> Result<(), Error>;

    /// Delete the file at the locator. Deleting a missing file succeeds.
    async fn delete(&self, locator: &str) -> Result<(), Error>;
}

/// A parsed storage locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Plain filesystem path
    Local(std::path::PathBuf),
    /// `http://` or `https://` URL
    Http(String),
    /// `s3://bucket/key`
    S3 { bucket: String, key: String },
}

impl Locator {
    /// Parse a locator string. Anything without a recognized scheme is a
    /// local path.
    pub fn parse(locator: &str) -> Result<Self, Error> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Ok(Locator::Http(locator.to_string()));
        }
        if let Some(rest) = locator.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| Error::Config(format!("S3 locator has no key: {}", locator)))?;
            if bucket.is_empty() || key.is_empty() {
                return Err(Error::Config(format!("Invalid S3 locator: {}", locator)));
            }
            return Ok(Locator::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if let Some((scheme, _)) = locator.split_once("://") {
            return Err(Error::Config(format!(
                "Unsupported storage scheme: {}",
                scheme
            )));
        }
        Ok(Locator::Local(std::path::PathBuf::from(locator)))
    }
}
