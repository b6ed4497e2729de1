//! Unified blob store that dispatches to local disk or S3.

use bytes::Bytes;

use crate::contracts::{BlobStore, BlobStoreInfo, StorageError};
use crate::storage::{LocalBlobStore, S3BlobStore};

/// Blob store backed by either a local directory or an S3 bucket.
pub enum BlobBackend {
    Local(LocalBlobStore),
    S3(S3BlobStore),
}

impl BlobBackend {
    pub fn local(store: LocalBlobStore) -> Self {
        Self::Local(store)
    }

    pub fn s3(store: S3BlobStore) -> Self {
        Self::S3(store)
    }
}

impl BlobStore for BlobBackend {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String, StorageError> {
        match self {
            Self::Local(s) => s.put(key, body, content_type).await,
            Self::S3(s) => s.put(key, body, content_type).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        match self {
            Self::Local(s) => s.get(key).await,
            Self::S3(s) => s.get(key).await,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            Self::Local(s) => s.exists(key).await,
            Self::S3(s) => s.exists(key).await,
        }
    }

    fn storage_info(&self) -> BlobStoreInfo {
        match self {
            Self::Local(s) => s.storage_info(),
            Self::S3(s) => s.storage_info(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_variant_dispatches() {
        let dir = TempDir::new().unwrap();
        let backend = BlobBackend::local(LocalBlobStore::open(dir.path()).unwrap());

        backend
            .put("contracts/x.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        assert!(backend.exists("contracts/x.txt").await.unwrap());
        assert_eq!(backend.storage_info().storage_type, "local");
    }
}
