//! S3 object store backend
//!
//! Tile archives (and original files on cloud volumes) are addressed as
//! `s3://bucket/key` locators. Missing keys surface as `NotRetrievable`;
//! everything else the SDK reports is treated as transient and left to the
//! caller's retry policy.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;

use super::{Locator, StorageBackend};
use crate::error::Error;

pub struct S3Backend {
    client: aws_sdk_s3::Client,
}

impl S3Backend {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build a backend from the ambient AWS environment (credentials,
    /// region, endpoint overrides).
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }

    fn parse(locator: &str) -> Result<(String, String), Error> {
        match Locator::parse(locator)? {
            Locator::S3 { bucket, key } => Ok((bucket, key)),
            _ => Err(Error::Config(format!("Not an S3 locator: {}", locator))),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn exists(&self, locator: &str) -> Result<bool, Error> {
        let (bucket, key) = Self::parse(locator)?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(Error::Transient(service_err.to_string()))
                }
            }
        }
    }

    async fn download(&self, locator: &str, dest: &Path) -> Result<u64, Error> {
        let (bucket, key) = Self::parse(locator)?;
        let result = async {
            let response = self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|err| {
                    let service_err = err.into_service_error();
                    if service_err.is_no_such_key() {
                        Error::NotRetrievable(format!("No such key: {}", locator))
                    } else {
                        Error::Transient(service_err.to_string())
                    }
                })?;

            let mut reader = response.body.into_async_read();
            let mut file = tokio::fs::File::create(dest).await?;
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn put_file(&self, local: &Path, dest: &str) -> Result<(), Error> {
        let (bucket, key) = Self::parse(dest)?;
        let body = ByteStream::from_path(local)
            .await
            .map_err(|err| Error::Transient(format!("Failed to read {}: {}", local.display(), err)))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transient(err.into_service_error().to_string()))?;
        Ok(())
    }

    async fn delete(&self, locator: &str) -> Result<(), Error> {
        let (bucket, key) = Self::parse(locator)?;
        // DeleteObject succeeds for missing keys, which keeps cleanup
        // idempotent for free
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| Error::Transient(err.into_service_error().to_string()))?;
        Ok(())
    }
}
