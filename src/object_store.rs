//! Object storage access.
//!
//! The pipeline only needs whole-object reads and writes, so the
//! [`ObjectStore`] seam stays small. [`S3Store`] is the production
//! implementation on top of the AWS SDK.

use crate::error::{Result, TwitterSearchError};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tracing::{debug, info};

/// Whole-object reads and writes against a bucket/key namespace.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` to `bucket/key`, replacing any existing object.
    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Read the whole object at `bucket/key`.
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Upload a local file to `bucket/key`.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| TwitterSearchError::path_error("read", path, e))?;
        self.put_bytes(bucket, key, body).await
    }
}

/// Split `s3://bucket/key/parts` into `("bucket", "key/parts")`.
///
/// # Errors
///
/// Returns [`TwitterSearchError::InvalidS3Url`] when the scheme, bucket or
/// key is missing.
pub fn parse_s3_url(url: &str) -> Result<(String, String)> {
    let invalid = || TwitterSearchError::InvalidS3Url {
        url: url.to_string(),
    };
    let rest = url.strip_prefix("s3://").ok_or_else(invalid)?;
    let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
    if bucket.is_empty() || key.is_empty() {
        return Err(invalid());
    }
    Ok((bucket.to_string(), key.to_string()))
}

/// Amazon S3 backed [`ObjectStore`].
#[derive(Clone)]
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Build a store from a loaded SDK configuration.
    #[must_use]
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: S3Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                TwitterSearchError::object_store(
                    "upload",
                    bucket,
                    key,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;
        info!(bucket, key, size, "Uploaded object");
        Ok(())
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                TwitterSearchError::object_store(
                    "download",
                    bucket,
                    key,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;
        let data = output.body.collect().await.map_err(|e| {
            TwitterSearchError::object_store("read", bucket, key, e.to_string())
        })?;
        let bytes = data.into_bytes().to_vec();
        debug!(bucket, key, size = bytes.len(), "Downloaded object");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_url() {
        let (bucket, key) = parse_s3_url("s3://admin-bucket/config/twitter.toml").unwrap();
        assert_eq!(bucket, "admin-bucket");
        assert_eq!(key, "config/twitter.toml");
    }

    #[test]
    fn parse_rejects_malformed_urls() {
        for url in ["http://bucket/key", "s3://bucket", "s3:///key", "s3://bucket/"] {
            assert!(
                matches!(parse_s3_url(url), Err(TwitterSearchError::InvalidS3Url { .. })),
                "{url} should be rejected"
            );
        }
    }
}
