//! The background-edit screen.
//!
//! Opened from a published handoff, it composites the pose image onto
//! chosen backgrounds and writes each accepted variant straight to the
//! durable per-pose record. [`BackgroundEditor::finish`] hands the final
//! collection back through the channel.
//!
//! The editor never deletes blobs: the workflow's pose record may still
//! point at a variant it replaces. Replaced images travel in the return and
//! are deleted by the merge engine after it has saved the merged state.

use std::sync::Arc;

use uuid::Uuid;

use lookbook_core::collection::{Collection, CollectionItem, ORIGINAL_ITEM_ID};
use lookbook_core::error::CoreError;
use lookbook_core::naming::{image_extension, image_mime_type, validate_key_segment};
use lookbook_core::types::{ImageRef, PoseId};
use lookbook_genai::{CompositeRequest, ImageGenerator, ImagePart};
use lookbook_store::{BlobStore, StateStores};

use crate::collections::CollectionStore;
use crate::error::{WorkflowError, WorkflowResult};
use crate::handoff::{HandoffChannel, HandoffReturn};
use crate::keys::SessionKeys;

pub struct BackgroundEditor {
    keys: SessionKeys,
    channel: HandoffChannel,
    collections: CollectionStore,
    blobs: Arc<dyn BlobStore>,
    generator: Arc<dyn ImageGenerator>,
    pose_id: PoseId,
    source_image_ref: ImageRef,
    collection: Collection,
    retired: Vec<ImageRef>,
}

impl BackgroundEditor {
    /// Consume the pending handoff for `keys`' owner.
    ///
    /// Returns `None` when nothing was published. A collection without an
    /// `original` item gets one built from the source image, written to the
    /// durable record before the editor is returned.
    pub async fn open(
        keys: SessionKeys,
        stores: &StateStores,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn ImageGenerator>,
    ) -> WorkflowResult<Option<Self>> {
        let channel = HandoffChannel::new(keys.clone(), stores.durable.clone());
        let Some(payload) = channel.consume().await? else {
            return Ok(None);
        };
        let collections = CollectionStore::new(keys.clone(), stores.durable.clone());

        let mut collection = payload.existing_collection;
        if collection.ensure_original(&payload.source_image_ref) {
            collections.save(&payload.pose_id, &collection).await?;
            tracing::info!(
                owner_id = %keys.owner_id(),
                pose_id = %payload.pose_id,
                "Synthesized original collection item",
            );
        }

        Ok(Some(Self {
            keys,
            channel,
            collections,
            blobs,
            generator,
            pose_id: payload.pose_id,
            source_image_ref: payload.source_image_ref,
            collection,
            retired: Vec::new(),
        }))
    }

    pub fn pose_id(&self) -> &str {
        &self.pose_id
    }

    pub fn source_image_ref(&self) -> &str {
        &self.source_image_ref
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Images replaced or removed so far, awaiting deletion.
    pub fn retired_refs(&self) -> &[ImageRef] {
        &self.retired
    }

    /// Composite the original pose image onto `background` and record the
    /// result as the newest item for `background_id`.
    pub async fn apply_background(
        &mut self,
        background_id: &str,
        background: ImagePart,
    ) -> WorkflowResult<&CollectionItem> {
        validate_key_segment("background id", background_id)?;
        if background_id == ORIGINAL_ITEM_ID {
            return Err(WorkflowError::validation(format!(
                "'{ORIGINAL_ITEM_ID}' is reserved and cannot be used as a background id"
            )));
        }

        let subject_ref = self
            .collection
            .original()
            .map(|item| item.image_ref.clone())
            .unwrap_or_else(|| self.source_image_ref.clone());
        let subject_bytes = self.blobs.get(&subject_ref).await?;
        let subject = ImagePart::new(subject_bytes.clone(), image_mime_type(&subject_bytes));

        let composite = self
            .generator
            .compose(CompositeRequest {
                subject,
                background,
            })
            .await?;

        let file_name = format!(
            "{background_id}-{}.{}",
            Uuid::new_v4(),
            image_extension(&composite.bytes)
        );
        let key = self.keys.pose_blob(&self.pose_id, &file_name);
        let image_ref = self
            .blobs
            .put(&key, composite.bytes, &composite.mime_type)
            .await?;

        let replaced = self.collection.push_variant(background_id, image_ref);
        self.collections
            .save(&self.pose_id, &self.collection)
            .await?;
        if let Some(old) = replaced {
            self.retired.push(old.image_ref);
        }

        tracing::info!(
            owner_id = %self.keys.owner_id(),
            pose_id = %self.pose_id,
            background_id,
            items = self.collection.len(),
            "Background applied",
        );
        self.collection
            .last()
            .ok_or_else(|| CoreError::Internal("collection empty after push".to_string()).into())
    }

    /// Drop the variant for `background_id`. Returns `false` when there was
    /// none. The `original` item is never removed.
    pub async fn remove_variant(&mut self, background_id: &str) -> WorkflowResult<bool> {
        let Some(removed) = self.collection.remove_variant(background_id) else {
            return Ok(false);
        };
        self.collections
            .save(&self.pose_id, &self.collection)
            .await?;
        self.retired.push(removed.image_ref);
        Ok(true)
    }

    /// Hand the collection back to the workflow.
    ///
    /// The last item is reported as the pose's new image unless it is still
    /// the source image.
    pub async fn finish(self) -> WorkflowResult<HandoffReturn> {
        let last_image_ref = self
            .collection
            .last()
            .map(|item| item.image_ref.clone())
            .filter(|r| *r != self.source_image_ref);
        self.channel
            .return_to_workflow(&self.pose_id, self.collection, last_image_ref, self.retired)
            .await
    }
}

impl std::fmt::Debug for BackgroundEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundEditor")
            .field("owner_id", &self.keys.owner_id())
            .field("pose_id", &self.pose_id)
            .field("items", &self.collection.len())
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}
