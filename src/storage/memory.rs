//! In-memory object store used by tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;

use super::ObjectStore;

/// In-memory `ObjectStore` with the same key semantics as the bucket.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), body.into());
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_all_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.keys().await)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects.lock().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
