//! In-memory backend for testing
//!
//! Stores files in a HashMap keyed by the full locator string, counts
//! downloads (for at-most-once-fetch assertions) and can simulate
//! transient fetch and upload failures.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::StorageBackend;
use crate::error::Error;

#[derive(Clone)]
pub struct MemoryBackend {
    files: Arc<RwLock<HashMap<String, Bytes>>>,
    downloads: Arc<AtomicU64>,
    deletes: Arc<RwLock<Vec<String>>>,
    fail_downloads: Arc<RwLock<bool>>,
    fail_uploads: Arc<RwLock<bool>>,
    download_delay: Arc<RwLock<Option<Duration>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            downloads: Arc::new(AtomicU64::new(0)),
            deletes: Arc::new(RwLock::new(Vec::new())),
            fail_downloads: Arc::new(RwLock::new(false)),
            fail_uploads: Arc::new(RwLock::new(false)),
            download_delay: Arc::new(RwLock::new(None)),
        }
    }

    /// Seed a file under a locator
    pub fn put(&self, locator: &str, data: impl Into<Bytes>) {
        self.files.write().insert(locator.to_string(), data.into());
    }

    /// Number of download calls observed so far
    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Locators passed to delete, in call order
    pub fn deleted_locators(&self) -> Vec<String> {
        self.deletes.read().clone()
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Make every download fail with a transient error
    pub fn set_fail_downloads(&self, enabled: bool) {
        *self.fail_downloads.write() = enabled;
    }

    /// Make every upload fail with a transient error
    pub fn set_fail_uploads(&self, enabled: bool) {
        *self.fail_uploads.write() = enabled;
    }

    /// Stall every download for `delay` before serving, to exercise
    /// caller-side fetch timeouts
    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.write() = Some(delay);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn exists(&self, locator: &str) -> Result<bool, Error> {
        Ok(self.files.read().contains_key(locator))
    }

    async fn download(&self, locator: &str, dest: &Path) -> Result<u64, Error> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.download_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_downloads.read() {
            return Err(Error::Transient("simulated network failure".to_string()));
        }
        let data = self
            .files
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::NotRetrievable(format!("No such file: {}", locator)))?;
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    async fn put_file(&self, local: &Path, dest: &str) -> Result<(), Error> {
        if *self.fail_uploads.read() {
            return Err(Error::Transient("simulated upload failure".to_string()));
        }
        let data = tokio::fs::read(local).await?;
        self.files.write().insert(dest.to_string(), Bytes::from(data));
        Ok(())
    }

    async fn delete(&self, locator: &str) -> Result<(), Error> {
        self.deletes.write().push(locator.to_string());
        self.files.write().remove(locator);
        Ok(())
    }
}
