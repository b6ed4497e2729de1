use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::contracts::{validate_blob_key, BlobStore, BlobStoreInfo, StorageError};
use crate::s3_retry;
use crate::storage::retry::RetryConfig;

/// S3-backed blob store for generated and signed documents.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    /// Key prefix prepended to every blob key (no trailing slash)
    prefix: String,
    /// Retry configuration for S3 operations
    retry_config: RetryConfig,
}

impl S3BlobStore {
    /// Creates a new S3 blob store with default AWS configuration and retry settings.
    pub async fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self, StorageError> {
        Self::new_with_retry(bucket, prefix, RetryConfig::from_env()).await
    }

    /// Creates a new S3 blob store with custom retry configuration.
    pub async fn new_with_retry(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, StorageError> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = Client::new(&config);

        Ok(Self {
            client,
            bucket: bucket.into(),
            prefix: normalize_prefix(prefix.into()),
            retry_config,
        })
    }

    /// Creates a new S3 blob store with a custom endpoint (for MinIO/LocalStack).
    pub async fn with_endpoint(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let endpoint = endpoint.into();
        let region = region.into();

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .load()
            .await;

        let s3_config = S3ConfigBuilder::from(&config)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.into(),
            prefix: normalize_prefix(prefix.into()),
            retry_config: RetryConfig::from_env(),
        })
    }

    /// Returns the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Maps a blob key onto the full object key.
    fn object_key(&self, key: &str) -> Result<String, StorageError> {
        validate_blob_key(key)?;
        Ok(if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        })
    }
}

fn normalize_prefix(prefix: String) -> String {
    prefix.trim_matches('/').to_string()
}

impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String, StorageError> {
        let object_key = self.object_key(key)?;
        let size = body.len();

        let client = &self.client;
        let bucket = &self.bucket;
        s3_retry!(
            operation = {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(&object_key)
                    .body(ByteStream::from(body.clone())) // Bytes::clone is cheap (ref-counted)
                    .content_type(content_type)
                    .send()
                    .await
            },
            retry_config = self.retry_config,
            context = format!("PUT {}", object_key),
        )?;

        tracing::debug!(bucket = %bucket, key = %object_key, bytes = size, "Stored blob in S3");
        Ok(format!("s3://{}/{}", bucket, object_key))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let object_key = self.object_key(key)?;

        let client = &self.client;
        let bucket = &self.bucket;
        let response = s3_retry!(
            operation = {
                match client
                    .get_object()
                    .bucket(bucket)
                    .key(&object_key)
                    .send()
                    .await
                {
                    Ok(output) => Ok(Some(output)),
                    Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => Ok(None),
                    Err(e) => Err(e),
                }
            },
            retry_config = self.retry_config,
            context = format!("GET {}", object_key),
        )?;

        let Some(response) = response else {
            return Ok(None);
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?
            .into_bytes();
        Ok(Some(bytes))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let object_key = self.object_key(key)?;

        let client = &self.client;
        let bucket = &self.bucket;
        s3_retry!(
            operation = {
                match client
                    .head_object()
                    .bucket(bucket)
                    .key(&object_key)
                    .send()
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
                    Err(e) => Err(e),
                }
            },
            retry_config = self.retry_config,
            context = format!("HEAD {}", object_key),
        )
    }

    fn storage_info(&self) -> BlobStoreInfo {
        BlobStoreInfo {
            storage_type: "s3".into(),
            bucket: Some(self.bucket.clone()),
            base_path: self.prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_normalized() {
        assert_eq!(normalize_prefix("/contracts/".into()), "contracts");
        assert_eq!(normalize_prefix(String::new()), "");
    }
}
