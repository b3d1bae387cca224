//! Local filesystem backend

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::StorageBackend;
use crate::error::Error;

/// Backend serving files straight from the local filesystem.
///
/// Locators are interpreted as paths; relative locators resolve against
/// the optional root directory.
pub struct LocalBackend {
    root: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolve relative locators against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = PathBuf::from(locator);
        match (&self.root, path.is_absolute()) {
            (Some(root), false) => root.join(path),
            _ => path,
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn exists(&self, locator: &str) -> Result<bool, Error> {
        Ok(tokio::fs::try_exists(self.resolve(locator)).await?)
    }

    async fn download(&self, locator: &str, dest: &Path) -> Result<u64, Error> {
        let src = self.resolve(locator);
        match tokio::fs::copy(&src, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                let _ = tokio::fs::remove_file(dest).await;
                if err.kind() == std::io::ErrorKind::NotFound {
                    Err(Error::NotRetrievable(format!(
                        "Local file missing: {}",
                        src.display()
                    )))
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn put_file(&self, local: &Path, dest: &str) -> Result<(), Error> {
        let target = self.resolve(dest);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        Ok(())
    }

    async fn delete(&self, locator: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.resolve(locator)).await {
            Ok(()) => Ok(()),
            // Idempotent: deleting a missing file is fine
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
