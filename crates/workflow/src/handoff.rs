//! One-shot handoff between the workflow and the background editor.
//!
//! Both directions are single records in the durable tier, so the editor
//! may run in another process than the workflow:
//!
//! - outbound: written by [`HandoffChannel::publish`] when the user asks to
//!   change a pose's background, consumed once by the editor
//! - return: written by the editor when it hands control back, read once by
//!   the merge engine on the next load
//!
//! Reading a record removes it, so a reload never applies it twice.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lookbook_core::collection::Collection;
use lookbook_core::types::{ImageRef, OwnerId, PoseId, Timestamp};
use lookbook_store::{load_json, save_json, KeyValueStore};

use crate::error::{WorkflowError, WorkflowResult};
use crate::keys::SessionKeys;

/// Sent to the background editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffPayload {
    pub pose_id: PoseId,
    /// The pose's current result image.
    pub source_image_ref: ImageRef,
    pub owner_id: OwnerId,
    pub existing_collection: Collection,
    pub published_at: Timestamp,
}

/// Sent back to the workflow when the editor finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffReturn {
    pub pose_id: PoseId,
    pub owner_id: OwnerId,
    pub collection: Collection,
    /// Newest image produced by the editor, if it produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_image_ref: Option<ImageRef>,
    /// Images the editor replaced or removed. Deleted by the merge engine
    /// once the return is saved and nothing references them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired_refs: Vec<ImageRef>,
    pub returned_at: Timestamp,
}

#[derive(Clone)]
pub struct HandoffChannel {
    keys: SessionKeys,
    store: Arc<dyn KeyValueStore>,
}

impl HandoffChannel {
    /// `store` must be the durable tier.
    pub fn new(keys: SessionKeys, store: Arc<dyn KeyValueStore>) -> Self {
        Self { keys, store }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Publish a pose for background editing, replacing any unconsumed
    /// outbound record.
    pub async fn publish(
        &self,
        pose_id: &str,
        source_image_ref: &str,
        existing_collection: Collection,
    ) -> WorkflowResult<HandoffPayload> {
        let payload = HandoffPayload {
            pose_id: pose_id.to_string(),
            source_image_ref: source_image_ref.to_string(),
            owner_id: self.keys.owner_id().to_string(),
            existing_collection,
            published_at: Utc::now(),
        };
        save_json(self.store.as_ref(), &self.keys.handoff_outbound(), &payload).await?;
        tracing::info!(
            owner_id = %payload.owner_id,
            pose_id = %payload.pose_id,
            items = payload.existing_collection.len(),
            "Published background handoff",
        );
        Ok(payload)
    }

    /// Take the outbound record, if any.
    pub async fn consume(&self) -> WorkflowResult<Option<HandoffPayload>> {
        let payload: Option<HandoffPayload> = self.take(&self.keys.handoff_outbound()).await?;
        Ok(payload.filter(|p| self.owned(&p.owner_id, &p.pose_id)))
    }

    /// Hand the final collection back to the workflow.
    ///
    /// Clears any outbound record before writing the return record.
    pub async fn return_to_workflow(
        &self,
        pose_id: &str,
        collection: Collection,
        last_image_ref: Option<ImageRef>,
        retired_refs: Vec<ImageRef>,
    ) -> WorkflowResult<HandoffReturn> {
        self.store.remove(&self.keys.handoff_outbound()).await?;
        let ret = HandoffReturn {
            pose_id: pose_id.to_string(),
            owner_id: self.keys.owner_id().to_string(),
            collection,
            last_image_ref,
            retired_refs,
            returned_at: Utc::now(),
        };
        save_json(self.store.as_ref(), &self.keys.handoff_return(), &ret).await?;
        tracing::info!(
            owner_id = %ret.owner_id,
            pose_id = %ret.pose_id,
            items = ret.collection.len(),
            has_new_image = ret.last_image_ref.is_some(),
            retired = ret.retired_refs.len(),
            "Returned background handoff",
        );
        Ok(ret)
    }

    /// Take the return record, if any.
    pub async fn take_return(&self) -> WorkflowResult<Option<HandoffReturn>> {
        let ret: Option<HandoffReturn> = self.take(&self.keys.handoff_return()).await?;
        Ok(ret.filter(|r| self.owned(&r.owner_id, &r.pose_id)))
    }

    /// Read and remove `key`. An unparseable record is removed and treated
    /// as absent.
    async fn take<T: DeserializeOwned>(&self, key: &str) -> WorkflowResult<Option<T>> {
        let result = load_json::<T>(self.store.as_ref(), key).await;
        let value = match result {
            Ok(None) => return Ok(None),
            Ok(Some(value)) => Some(value),
            Err(e) if e.is_corrupt() => {
                let err = WorkflowError::corrupt(key, &e);
                tracing::warn!(error = %err, "Dropping corrupt handoff record");
                None
            }
            Err(e) => return Err(e.into()),
        };
        self.store.remove(key).await?;
        Ok(value)
    }

    fn owned(&self, owner_id: &str, pose_id: &str) -> bool {
        if owner_id == self.keys.owner_id() {
            return true;
        }
        tracing::warn!(
            owner_id = %self.keys.owner_id(),
            payload_owner = %owner_id,
            pose_id = %pose_id,
            "Ignoring handoff record for another owner",
        );
        false
    }
}

impl std::fmt::Debug for HandoffChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffChannel")
            .field("owner_id", &self.keys.owner_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use lookbook_core::collection::CollectionItem;
    use lookbook_store::MemoryKvStore;

    use super::*;

    fn channel(owner: &str, kv: Arc<MemoryKvStore>) -> HandoffChannel {
        HandoffChannel::new(SessionKeys::new(owner).unwrap(), kv)
    }

    #[tokio::test]
    async fn outbound_is_consumed_once() {
        let kv = Arc::new(MemoryKvStore::new());
        let ch = channel("u1", kv);
        ch.publish("p1", "r1", Collection::new()).await.unwrap();

        let payload = ch.consume().await.unwrap().unwrap();
        assert_eq!(payload.pose_id, "p1");
        assert_eq!(payload.source_image_ref, "r1");
        assert_eq!(payload.owner_id, "u1");
        assert!(ch.consume().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn return_is_read_once_and_clears_outbound() {
        let kv = Arc::new(MemoryKvStore::new());
        let ch = channel("u1", kv.clone());
        ch.publish("p1", "r1", Collection::new()).await.unwrap();

        let collection = Collection::from_items(vec![
            CollectionItem::original("r1"),
            CollectionItem::variant("beach", "r2"),
        ]);
        ch.return_to_workflow("p1", collection.clone(), Some("r2".to_string()), vec!["r0".to_string()])
            .await
            .unwrap();

        assert!(kv.load("u1:handoff_outbound").await.unwrap().is_none());
        let ret = ch.take_return().await.unwrap().unwrap();
        assert_eq!(ret.collection, collection);
        assert_eq!(ret.last_image_ref.as_deref(), Some("r2"));
        assert_eq!(ret.retired_refs, vec!["r0"]);
        assert!(ch.take_return().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_return_is_dropped() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.save("u1:handoff_return", "{\"pose_id\":").await.unwrap();

        let ch = channel("u1", kv.clone());
        assert!(ch.take_return().await.unwrap().is_none());
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn foreign_owner_payload_is_ignored() {
        let kv = Arc::new(MemoryKvStore::new());
        let ret = HandoffReturn {
            pose_id: "p1".to_string(),
            owner_id: "intruder".to_string(),
            collection: Collection::new(),
            last_image_ref: None,
            retired_refs: Vec::new(),
            returned_at: Utc::now(),
        };
        save_json(kv.as_ref(), "u1:handoff_return", &ret).await.unwrap();

        let ch = channel("u1", kv.clone());
        assert!(ch.take_return().await.unwrap().is_none());
        assert!(kv.is_empty().await);
    }
}
