//! Blob storage for binary image payloads.
//!
//! A blob is written under a key and addressed afterwards by the reference
//! returned from [`BlobStore::put`]. References stay resolvable until the key
//! is deleted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Reference scheme used by [`MemoryBlobStore`].
pub const MEMORY_SCHEME: &str = "mem://";

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning a reference that resolves to them.
    ///
    /// `mime_type` is advisory; backends that serve blobs over HTTP use it
    /// as the content type.
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String, StoreError>;

    /// Fetch the bytes behind a reference returned by `put`.
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete the blob at `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Map a reference back to its key, if it belongs to this store.
    ///
    /// A bare key (no `scheme://`) is accepted as its own reference so that
    /// static assets can be addressed by relative path.
    fn key_for_ref(&self, blob_ref: &str) -> Option<String>;
}

/// Reject keys that could escape a backend's namespace.
pub fn validate_blob_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local blob store with `mem://<key>` references.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _mime_type: &str) -> Result<String, StoreError> {
        validate_blob_key(key)?;
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(format!("{MEMORY_SCHEME}{key}"))
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, StoreError> {
        let key = self
            .key_for_ref(blob_ref)
            .ok_or_else(|| StoreError::InvalidKey(blob_ref.to_string()))?;
        self.blobs
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(blob_ref.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn key_for_ref(&self, blob_ref: &str) -> Option<String> {
        match blob_ref.strip_prefix(MEMORY_SCHEME) {
            Some(key) => Some(key.to_string()),
            None if !blob_ref.contains("://") => Some(blob_ref.to_string()),
            None => None,
        }
    }
}
