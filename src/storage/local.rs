use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::contracts::{validate_blob_key, BlobStore, BlobStoreInfo, StorageError};

/// Blob store rooted at a local directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates the store, creating `root` if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_blob_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = key, bytes = body.len(), "Stored blob on local disk");
        Ok(path.display().to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn storage_info(&self) -> BlobStoreInfo {
        BlobStoreInfo {
            storage_type: "local".into(),
            bucket: None,
            base_path: self.root.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();

        store
            .put("contracts/a.html", Bytes::from_static(b"<p>hi</p>"), "text/html")
            .await
            .unwrap();

        assert!(store.exists("contracts/a.html").await.unwrap());
        let body = store.get("contracts/a.html").await.unwrap().unwrap();
        assert_eq!(&body[..], b"<p>hi</p>");
    }

    #[tokio::test]
    async fn missing_blob_is_none() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        assert!(store.get("contracts/missing.pdf").await.unwrap().is_none());
        assert!(!store.exists("contracts/missing.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path().join("root")).unwrap();
        let result = store.put("../outside", Bytes::new(), "text/plain").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
