//! HTTP(S) origin backend
//!
//! Read-only: original files on remote web servers can be fetched and
//! checked for existence, but never written or deleted. The request
//! timeout covers the whole transfer; a timed-out download leaves nothing
//! behind at the destination.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::StorageBackend;
use crate::error::Error;

pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Config(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self { client })
    }

    fn classify_status(status: reqwest::StatusCode, url: &str) -> Error {
        if status.is_client_error() {
            Error::NotRetrievable(format!("HTTP {} for {}", status, url))
        } else {
            Error::Transient(format!("HTTP {} for {}", status, url))
        }
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    async fn exists(&self, locator: &str) -> Result<bool, Error> {
        let response = self.client.head(locator).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status.is_client_error() {
            Ok(false)
        } else {
            Err(Self::classify_status(status, locator))
        }
    }

    async fn download(&self, locator: &str, dest: &Path) -> Result<u64, Error> {
        let result = async {
            let mut response = self.client.get(locator).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Self::classify_status(status, locator));
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut written: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn put_file(&self, _local: &Path, dest: &str) -> Result<(), Error> {
        Err(Error::Config(format!(
            "HTTP backend is read-only, cannot write {}",
            dest
        )))
    }

    async fn delete(&self, locator: &str) -> Result<(), Error> {
        Err(Error::Config(format!(
            "HTTP backend is read-only, cannot delete {}",
            locator
        )))
    }
}
