//! Reconciles persisted state fragments into one [`WorkflowState`].
//!
//! Load overlays three sources in fixed precedence:
//!
//! 1. the session snapshot (volatile copy first, else the durable copy)
//! 2. every durable per-pose collection record, found by prefix scan
//! 3. a pending handoff return from the background editor
//!
//! Images the editor retired are deleted only after the merged state has
//! been saved, and only when nothing in it still points at them.
//!
//! Save writes garments to blob storage, the snapshot to both tiers and
//! every collection to its per-pose key. Save is a no-op until the first
//! load has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use lookbook_core::state::{GarmentImage, GarmentView, WorkflowState};
use lookbook_core::types::{ImageRef, PoseId};
use lookbook_store::{load_json, save_json, BlobStore, StateStores, StoreError, StoreTier};

use crate::collections::CollectionStore;
use crate::error::{WorkflowError, WorkflowResult};
use crate::handoff::{HandoffChannel, HandoffReturn};
use crate::keys::SessionKeys;
use crate::snapshot::{StoredGarment, WorkflowSnapshot};

/// What a load found and what it had to skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Tier the baseline snapshot came from.
    pub snapshot_tier: Option<StoreTier>,
    /// Poses whose collection came from a per-pose record.
    pub overlaid_poses: Vec<PoseId>,
    /// Pose updated from a handoff return.
    pub handoff_pose: Option<PoseId>,
    /// Keys or records discarded as unreadable.
    pub dropped: Vec<String>,
    /// Images retired by the editor and deleted after the merge was saved.
    pub retired_blobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Load has not completed; nothing was written.
    Suppressed,
    Written {
        garments_uploaded: usize,
        collections: usize,
    },
}

/// What `clear` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub blobs_deleted: usize,
    pub keys_removed: usize,
    /// Deletes that failed and were skipped.
    pub failures: usize,
}

/// What this engine knows about one garment view's blob.
#[derive(Debug, Clone, Default)]
enum GarmentSlot {
    /// A blob may exist under the key.
    #[default]
    Unknown,
    /// The key was deleted by this engine.
    Absent,
    Stored(StoredGarment),
}

impl GarmentSlot {
    fn stored(&self) -> Option<&StoredGarment> {
        match self {
            Self::Stored(stored) => Some(stored),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct GarmentSlots {
    front: GarmentSlot,
    back: GarmentSlot,
}

impl GarmentSlots {
    fn slot(&mut self, view: GarmentView) -> &mut GarmentSlot {
        match view {
            GarmentView::Front => &mut self.front,
            GarmentView::Back => &mut self.back,
        }
    }
}

pub struct MergeEngine {
    keys: SessionKeys,
    stores: StateStores,
    blobs: Arc<dyn BlobStore>,
    collections: CollectionStore,
    handoff: HandoffChannel,
    loaded: AtomicBool,
    garments: Mutex<GarmentSlots>,
}

impl MergeEngine {
    pub fn new(keys: SessionKeys, stores: StateStores, blobs: Arc<dyn BlobStore>) -> Self {
        let collections = CollectionStore::new(keys.clone(), stores.durable.clone());
        let handoff = HandoffChannel::new(keys.clone(), stores.durable.clone());
        Self {
            keys,
            stores,
            blobs,
            collections,
            handoff,
            loaded: AtomicBool::new(false),
            garments: Mutex::new(GarmentSlots::default()),
        }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub fn collections(&self) -> &CollectionStore {
        &self.collections
    }

    pub fn handoff(&self) -> &HandoffChannel {
        &self.handoff
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    // ---- load ----

    /// Build the authoritative state from every persisted source.
    ///
    /// Never fails: an unreadable source is logged and skipped. When a
    /// handoff was applied the merged state is saved straight away, so a
    /// second load yields the same state.
    pub async fn load(&self) -> (WorkflowState, LoadReport) {
        let mut report = LoadReport::default();
        let mut state = self.load_baseline(&mut report).await;

        match self.collections.load_all().await {
            Ok(loaded) => {
                report.dropped.extend(loaded.dropped);
                for (pose_id, collection) in loaded.collections {
                    state.collections.insert(pose_id.clone(), collection);
                    report.overlaid_poses.push(pose_id);
                }
            }
            Err(e) => {
                tracing::warn!(owner_id = %self.keys.owner_id(), error = %e, "Skipping per-pose collection records");
            }
        }

        let handoff = match self.handoff.take_return().await {
            Ok(ret) => ret,
            Err(e) => {
                tracing::warn!(owner_id = %self.keys.owner_id(), error = %e, "Skipping handoff return");
                None
            }
        };
        let mut retired = Vec::new();
        if let Some(ret) = handoff {
            retired = self.apply_handoff(&mut state, ret, &mut report).await;
        }

        self.loaded.store(true, Ordering::Release);

        tracing::info!(
            owner_id = %self.keys.owner_id(),
            snapshot = report.snapshot_tier.map(StoreTier::as_str).unwrap_or("none"),
            poses = state.pose_states.len(),
            collections = state.collections.len(),
            handoff_pose = report.handoff_pose.as_deref().unwrap_or(""),
            dropped = report.dropped.len(),
            "Workflow state loaded",
        );

        if report.handoff_pose.is_some() {
            match self.save(&state).await {
                Ok(_) => report.retired_blobs = self.delete_retired(&state, retired).await,
                Err(e) => {
                    tracing::warn!(owner_id = %self.keys.owner_id(), error = %e, "Failed to persist merged handoff");
                }
            }
        }
        (state, report)
    }

    async fn load_baseline(&self, report: &mut LoadReport) -> WorkflowState {
        let key = self.keys.snapshot();
        for tier in [StoreTier::Volatile, StoreTier::Durable] {
            let store = self.stores.tier(tier);
            match load_json::<WorkflowSnapshot>(store, &key).await {
                Ok(Some(mut snapshot)) => {
                    report.snapshot_tier = Some(tier);
                    for pose_id in snapshot.retain_consistent_poses() {
                        tracing::warn!(pose_id = %pose_id, "Dropping inconsistent pose record");
                        report.dropped.push(format!("{key}#{pose_id}"));
                    }
                    return self.restore(snapshot).await;
                }
                Ok(None) => {}
                Err(e) if e.is_corrupt() => {
                    let err = WorkflowError::corrupt(&key, &e);
                    tracing::warn!(tier = tier.as_str(), error = %err, "Dropping corrupt snapshot");
                    if let Err(e) = store.remove(&key).await {
                        tracing::warn!(key = %key, error = %e, "Failed to remove corrupt snapshot");
                    }
                    report.dropped.push(key.clone());
                }
                Err(e) => {
                    tracing::warn!(tier = tier.as_str(), key = %key, error = %e, "Skipping unreadable snapshot");
                }
            }
        }
        WorkflowState::default()
    }

    /// Turn a snapshot into state, fetching garment bytes from blob storage.
    async fn restore(&self, snapshot: WorkflowSnapshot) -> WorkflowState {
        let mut state = WorkflowState {
            gender: snapshot.gender,
            model_id: snapshot.model_id.clone(),
            pose_states: snapshot.pose_states.clone(),
            collections: snapshot.collections.clone(),
            ..Default::default()
        };

        let mut slots = self.garments.lock().await;
        for view in GarmentView::ALL {
            let Some(stored) = snapshot.garment(view) else {
                continue;
            };
            match self.blobs.get(&stored.blob_ref).await {
                Ok(bytes) => {
                    let image = GarmentImage {
                        bytes,
                        mime_type: stored.mime_type.clone(),
                        file_name: stored.file_name.clone(),
                    };
                    state.set_garment(view, Some(image));
                    *slots.slot(view) = GarmentSlot::Stored(stored.clone());
                }
                Err(e) => {
                    tracing::warn!(view = %view, blob_ref = %stored.blob_ref, error = %e, "Garment image unavailable");
                }
            }
        }
        state
    }

    async fn apply_handoff(
        &self,
        state: &mut WorkflowState,
        ret: HandoffReturn,
        report: &mut LoadReport,
    ) -> Vec<ImageRef> {
        let pose_id = ret.pose_id;

        if let Err(e) = self.collections.save(&pose_id, &ret.collection).await {
            tracing::warn!(pose_id = %pose_id, error = %e, "Failed to mirror handoff collection");
        }
        state.collections.insert(pose_id.clone(), ret.collection);

        if let Some(last) = ret.last_image_ref {
            let updated = state
                .pose_states
                .get(&pose_id)
                .and_then(|record| record.with_result(last));
            match updated {
                Some(record) => {
                    state.pose_states.insert(pose_id.clone(), record);
                }
                None => {
                    tracing::warn!(pose_id = %pose_id, "Handoff image ignored: pose has no source view");
                }
            }
        }
        report.handoff_pose = Some(pose_id);
        ret.retired_refs
    }

    /// Delete retired images of this owner that nothing in `state` points at.
    async fn delete_retired(&self, state: &WorkflowState, retired: Vec<ImageRef>) -> usize {
        let prefix = self.keys.blob_prefix();
        let mut deleted = 0;
        for image_ref in retired {
            if state.references(&image_ref) {
                continue;
            }
            let Some(key) = self.blobs.key_for_ref(&image_ref) else {
                continue;
            };
            if !key.starts_with(&prefix) {
                tracing::warn!(key = %key, "Ignoring retired image outside the owner's namespace");
                continue;
            }
            match self.blobs.delete(&key).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to delete retired image");
                }
            }
        }
        deleted
    }

    // ---- save ----

    /// Persist `state` to every tier.
    pub async fn save(&self, state: &WorkflowState) -> WorkflowResult<SaveOutcome> {
        if !self.is_loaded() {
            tracing::debug!(owner_id = %self.keys.owner_id(), "Save suppressed before load");
            return Ok(SaveOutcome::Suppressed);
        }

        let (front, back, garments_uploaded) = self.save_garments(state).await?;
        let snapshot = WorkflowSnapshot::capture(state, front, back);
        let key = self.keys.snapshot();
        save_json(self.stores.durable.as_ref(), &key, &snapshot).await?;
        save_json(self.stores.volatile.as_ref(), &key, &snapshot).await?;

        for (pose_id, collection) in &state.collections {
            self.collections.save(pose_id, collection).await?;
        }

        tracing::debug!(
            owner_id = %self.keys.owner_id(),
            poses = state.pose_states.len(),
            collections = state.collections.len(),
            garments_uploaded,
            "Workflow state saved",
        );
        Ok(SaveOutcome::Written {
            garments_uploaded,
            collections: state.collections.len(),
        })
    }

    /// Upload changed garments and delete cleared ones.
    async fn save_garments(
        &self,
        state: &WorkflowState,
    ) -> Result<(Option<StoredGarment>, Option<StoredGarment>, usize), StoreError> {
        let mut slots = self.garments.lock().await;
        let mut uploaded = 0;

        for view in GarmentView::ALL {
            let key = self.keys.garment_blob(view);
            let slot = slots.slot(view);
            match state.garment(view) {
                Some(image) => {
                    let digest = image.digest();
                    if slot.stored().is_some_and(|s| s.digest == digest) {
                        continue;
                    }
                    let blob_ref = self
                        .blobs
                        .put(&key, image.bytes.clone(), &image.mime_type)
                        .await?;
                    *slot = GarmentSlot::Stored(StoredGarment {
                        blob_ref,
                        mime_type: image.mime_type.clone(),
                        file_name: image.file_name.clone(),
                        digest,
                    });
                    uploaded += 1;
                }
                None => {
                    if !matches!(slot, GarmentSlot::Absent) {
                        self.blobs.delete(&key).await?;
                        *slot = GarmentSlot::Absent;
                    }
                }
            }
        }
        Ok((
            slots.front.stored().cloned(),
            slots.back.stored().cloned(),
            uploaded,
        ))
    }

    // ---- cleanup ----

    /// Delete every blob and key-value record of the owner, best effort.
    pub async fn clear(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let owner_id = self.keys.owner_id();

        let blob_prefix = self.keys.blob_prefix();
        match self.blobs.keys_with_prefix(&blob_prefix).await {
            Ok(keys) => {
                for key in keys {
                    match self.blobs.delete(&key).await {
                        Ok(()) => report.blobs_deleted += 1,
                        Err(e) => {
                            tracing::warn!(owner_id, key = %key, error = %e, "Blob delete failed");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(owner_id, error = %e, "Blob listing failed");
                report.failures += 1;
            }
        }

        let prefix = self.keys.owner_prefix();
        for tier in [StoreTier::Volatile, StoreTier::Durable] {
            let store = self.stores.tier(tier);
            let keys = match store.keys_with_prefix(&prefix).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(owner_id, tier = tier.as_str(), error = %e, "Key listing failed");
                    report.failures += 1;
                    continue;
                }
            };
            for key in keys {
                match store.remove(&key).await {
                    Ok(()) => report.keys_removed += 1,
                    Err(e) => {
                        tracing::warn!(owner_id, key = %key, error = %e, "Key remove failed");
                        report.failures += 1;
                    }
                }
            }
        }

        *self.garments.lock().await = GarmentSlots::default();

        tracing::info!(
            owner_id,
            blobs_deleted = report.blobs_deleted,
            keys_removed = report.keys_removed,
            failures = report.failures,
            "Workflow storage cleared",
        );
        report
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("owner_id", &self.keys.owner_id())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
