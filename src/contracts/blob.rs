use std::future::Future;

use bytes::Bytes;
use serde::Serialize;

use crate::contracts::error::StorageError;

/// Information about the blob storage backend.
#[derive(Debug, Clone, Serialize)]
pub struct BlobStoreInfo {
    /// Storage type identifier (e.g., "local", "s3")
    pub storage_type: String,
    /// S3 bucket name, if any
    pub bucket: Option<String>,
    /// Root directory or key prefix
    pub base_path: String,
}

/// Storage for generated and uploaded documents.
///
/// Keys are relative, `/`-separated paths such as `contracts/foo.pdf`.
pub trait BlobStore: Send + Sync {
    /// Stores a blob, replacing any previous content. Returns the storage location.
    fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;

    /// Reads a blob, or `None` if it does not exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, StorageError>> + Send;

    /// Returns true if the blob exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Returns information about the storage backend.
    fn storage_info(&self) -> BlobStoreInfo;
}

/// Rejects keys that could escape the storage root.
pub fn validate_blob_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_relative_keys() {
        assert!(validate_blob_key("contracts/ivanov_20250923-001.html").is_ok());
        assert!(validate_blob_key("signed-contracts/signed_20250923-001_1.pdf").is_ok());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_blob_key("").is_err());
        assert!(validate_blob_key("/etc/passwd").is_err());
        assert!(validate_blob_key("contracts/../secret").is_err());
        assert!(validate_blob_key("contracts//a").is_err());
        assert!(validate_blob_key("contracts\\a").is_err());
    }
}
