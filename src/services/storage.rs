use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ServiceError, ServiceResult, StorageClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Object storage held in memory, addressed as `memory://<bucket>/<key>`
#[derive(Debug)]
pub struct InMemoryStorage {
    bucket: String,
    objects: DashMap<String, StoredObject>,
    available: AtomicBool,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new("conveyor")
    }
}

impl InMemoryStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Seed an object without going through [`StorageClient::upload`]
    pub fn put(&self, key: impl Into<String>, bytes: Vec<u8>, content_type: impl Into<String>) {
        self.objects.insert(
            key.into(),
            StoredObject {
                bytes,
                content_type: content_type.into(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> ServiceResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::unavailable("storage", "in-memory storage marked unavailable"))
        }
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn upload(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> ServiceResult<String> {
        self.ensure_available()?;
        self.put(key, bytes, content_type);
        Ok(format!("memory://{}/{}", self.bucket, key))
    }

    async fn download(&self, key: &str) -> ServiceResult<Vec<u8>> {
        self.ensure_available()?;
        self.objects
            .get(key)
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| ServiceError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_then_download() {
        let storage = InMemoryStorage::new("proofs");
        let url = storage
            .upload(b"hello".to_vec(), "docs/a.csv", "text/csv")
            .await
            .unwrap();

        assert_eq!(url, "memory://proofs/docs/a.csv");
        assert_eq!(storage.download("docs/a.csv").await.unwrap(), b"hello");
        assert_eq!(storage.get("docs/a.csv").unwrap().content_type, "text/csv");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_retryable() {
        let storage = InMemoryStorage::default();
        let err = storage.download("nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_outage_is_retryable() {
        let storage = InMemoryStorage::default();
        storage.set_available(false);
        assert!(storage.download("x").await.unwrap_err().is_retryable());
    }
}
