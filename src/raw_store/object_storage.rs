//! Object-storage boundary: `save(bucket_path, bytes) -> url` and
//! `download(url) -> bytes`, backed by the `object_store` crate.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use url::Url;

use crate::error::StorageError;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Writes `bytes` under `bucket_path` and returns the object's URL.
    async fn save(&self, bucket_path: &str, bytes: Bytes) -> Result<String, StorageError>;
    async fn download(&self, url: &str) -> Result<Bytes, StorageError>;
}

/// `gs://bucket[/prefix]`, `file:///dir` or `memory://`.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    base_url: String,
    prefix: Option<String>,
}

impl ObjectStoreBackend {
    pub fn from_url(raw: &str) -> Result<Self, StorageError> {
        let url = Url::parse(raw).map_err(|_| StorageError::InvalidUrl(raw.to_string()))?;
        let base_url = raw.trim_end_matches('/').to_string();
        match url.scheme() {
            "gs" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| StorageError::InvalidUrl(raw.to_string()))?;
                let prefix = url.path().trim_matches('/');
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()?;
                Ok(Self {
                    store: Arc::new(store),
                    base_url,
                    prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
                })
            }
            "file" => {
                let dir = url
                    .to_file_path()
                    .map_err(|_| StorageError::InvalidUrl(raw.to_string()))?;
                std::fs::create_dir_all(&dir)?;
                Ok(Self {
                    store: Arc::new(LocalFileSystem::new_with_prefix(dir)?),
                    base_url,
                    prefix: None,
                })
            }
            "memory" => Ok(Self::in_memory()),
            _ => Err(StorageError::InvalidUrl(raw.to_string())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            base_url: "memory:/".to_string(),
            prefix: None,
        }
    }

    fn key(&self, bucket_path: &str) -> Path {
        match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{bucket_path}")),
            None => Path::from(bucket_path),
        }
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn save(&self, bucket_path: &str, bytes: Bytes) -> Result<String, StorageError> {
        self.store.put(&self.key(bucket_path), bytes.into()).await?;
        Ok(format!("{}/{}", self.base_url, bucket_path))
    }

    async fn download(&self, url: &str) -> Result<Bytes, StorageError> {
        let bucket_path = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;
        let object = self.store.get(&self.key(bucket_path)).await?;
        Ok(object.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_round_trips_through_url() {
        let backend = ObjectStoreBackend::in_memory();
        let url = backend
            .save("raw/MGS/ab/abcdef", Bytes::from_static(b"<html>"))
            .await
            .unwrap();
        assert_eq!(url, "memory://raw/MGS/ab/abcdef");
        assert_eq!(backend.download(&url).await.unwrap(), Bytes::from_static(b"<html>"));
    }

    #[tokio::test]
    async fn foreign_urls_are_rejected() {
        let backend = ObjectStoreBackend::in_memory();
        let err = backend.download("gs://other/raw/x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));
    }

    #[test]
    fn unknown_scheme_is_invalid() {
        assert!(matches!(
            ObjectStoreBackend::from_url("ftp://host/dir"),
            Err(StorageError::InvalidUrl(_))
        ));
    }
}
