//! The session snapshot record.
//!
//! Garment images are not embedded: the snapshot carries a blob reference
//! and digest per view, and the image bytes live in the blob store.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use lookbook_core::catalog::Gender;
use lookbook_core::collection::Collection;
use lookbook_core::state::{GarmentView, PoseGenerationRecord, WorkflowState};
use lookbook_core::types::{ImageRef, PoseId, Timestamp};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A garment image persisted to the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGarment {
    pub blob_ref: ImageRef,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Hex SHA-256 of the image bytes.
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garment_front: Option<StoredGarment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garment_back: Option<StoredGarment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub pose_states: BTreeMap<PoseId, PoseGenerationRecord>,
    #[serde(default)]
    pub collections: BTreeMap<PoseId, Collection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<Timestamp>,
}

impl WorkflowSnapshot {
    /// Capture `state`, with garments already written to blob storage.
    pub fn capture(
        state: &WorkflowState,
        garment_front: Option<StoredGarment>,
        garment_back: Option<StoredGarment>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            garment_front,
            garment_back,
            gender: state.gender,
            model_id: state.model_id.clone(),
            pose_states: state.pose_states.clone(),
            collections: state.collections.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    pub fn garment(&self, view: GarmentView) -> Option<&StoredGarment> {
        match view {
            GarmentView::Front => self.garment_front.as_ref(),
            GarmentView::Back => self.garment_back.as_ref(),
        }
    }

    /// Drop pose records that violate the record invariants.
    ///
    /// Returns the ids of the dropped records.
    pub fn retain_consistent_poses(&mut self) -> Vec<PoseId> {
        let dropped: Vec<PoseId> = self
            .pose_states
            .iter()
            .filter(|(_, record)| !record.is_consistent())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dropped {
            self.pose_states.remove(id);
        }
        dropped
    }
}
