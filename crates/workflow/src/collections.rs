//! Durable per-pose collection records.
//!
//! Each pose's collection is kept under its own key so that the background
//! editor can write one pose without rewriting the whole session snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use lookbook_core::collection::Collection;
use lookbook_core::types::PoseId;
use lookbook_store::{load_json, save_json, KeyValueStore, StoreError};

use crate::error::WorkflowError;
use crate::keys::SessionKeys;

/// Result of scanning every collection record of an owner.
#[derive(Debug, Default)]
pub struct LoadedCollections {
    pub collections: BTreeMap<PoseId, Collection>,
    /// Keys that failed to parse and were removed.
    pub dropped: Vec<String>,
}

#[derive(Clone)]
pub struct CollectionStore {
    keys: SessionKeys,
    store: Arc<dyn KeyValueStore>,
}

impl CollectionStore {
    pub fn new(keys: SessionKeys, store: Arc<dyn KeyValueStore>) -> Self {
        Self { keys, store }
    }

    pub async fn save(&self, pose_id: &str, collection: &Collection) -> Result<(), StoreError> {
        save_json(self.store.as_ref(), &self.keys.collection(pose_id), collection).await
    }

    pub async fn load(&self, pose_id: &str) -> Result<Option<Collection>, StoreError> {
        load_json(self.store.as_ref(), &self.keys.collection(pose_id)).await
    }

    /// Read every collection record of the owner.
    ///
    /// Unparseable records are removed so they are not reported again. A
    /// record that cannot be read for another reason is skipped. Only a
    /// failed key listing is an error.
    pub async fn load_all(&self) -> Result<LoadedCollections, StoreError> {
        let mut loaded = LoadedCollections::default();
        let keys = self
            .store
            .keys_with_prefix(&self.keys.collection_prefix())
            .await?;

        for key in keys {
            let Some(pose_id) = self.keys.pose_of_collection_key(&key) else {
                continue;
            };
            match load_json::<Collection>(self.store.as_ref(), &key).await {
                Ok(Some(collection)) => {
                    loaded.collections.insert(pose_id.to_string(), collection);
                }
                Ok(None) => {}
                Err(e) if e.is_corrupt() => {
                    let err = WorkflowError::corrupt(&key, &e);
                    tracing::warn!(error = %err, "Dropping corrupt collection record");
                    if let Err(e) = self.store.remove(&key).await {
                        tracing::warn!(key = %key, error = %e, "Failed to remove corrupt record");
                    }
                    loaded.dropped.push(key);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable collection record");
                }
            }
        }
        Ok(loaded)
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("owner_id", &self.keys.owner_id())
            .finish_non_exhaustive()
    }
}
