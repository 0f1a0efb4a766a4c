//! Per-user workflow state: garments, model selection, pose records and
//! per-pose collections.
//!
//! Pose record transitions: `idle -> loading -> {success, error}`, and both
//! terminal states may go back to `loading`. `idle` is never re-entered.
//! A record's `result_ref` always comes with a `source_view`; the view may
//! outlive the result while a fix is loading or after it failed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{Gender, ModelCatalog};
use crate::collection::Collection;
use crate::naming::image_mime_type;
use crate::types::{ImageRef, PoseId};

// ---------------------------------------------------------------------------
// Garments
// ---------------------------------------------------------------------------

/// Which side of the garment an image shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentView {
    Front,
    Back,
}

impl GarmentView {
    pub const ALL: [GarmentView; 2] = [GarmentView::Front, GarmentView::Back];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
        }
    }
}

impl std::fmt::Display for GarmentView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GarmentView {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            other => Err(crate::error::CoreError::Validation(format!(
                "Unknown garment view '{other}'. Must be one of: front, back"
            ))),
        }
    }
}

/// An uploaded garment image with its metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct GarmentImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl GarmentImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    /// Build from raw upload bytes, detecting the MIME type from content.
    pub fn from_upload(bytes: Vec<u8>, file_name: Option<String>) -> Self {
        let mime_type = image_mime_type(&bytes).to_string();
        Self {
            bytes,
            mime_type,
            file_name,
        }
    }

    /// SHA-256 hex digest of the payload, used for change detection.
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

impl std::fmt::Debug for GarmentImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarmentImage")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pose records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Generation state of a single pose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseGenerationRecord {
    status: PoseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result_ref: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_view: Option<GarmentView>,
}

impl PoseGenerationRecord {
    /// A fresh generation in flight. Any earlier history is discarded.
    pub fn loading() -> Self {
        Self {
            status: PoseStatus::Loading,
            result_ref: None,
            source_view: None,
        }
    }

    pub fn success(result_ref: impl Into<ImageRef>, source_view: GarmentView) -> Self {
        Self {
            status: PoseStatus::Success,
            result_ref: Some(result_ref.into()),
            source_view: Some(source_view),
        }
    }

    /// A fix in flight: the result is cleared, the source view is kept.
    pub fn refining(&self) -> Self {
        Self {
            status: PoseStatus::Loading,
            result_ref: None,
            source_view: self.source_view,
        }
    }

    /// The operation failed: the source view, if any, is kept.
    pub fn failed(&self) -> Self {
        Self {
            status: PoseStatus::Error,
            result_ref: None,
            source_view: self.source_view,
        }
    }

    /// Replace the result with a newer image, keeping the source view.
    ///
    /// Returns `None` when no source view was ever recorded, since a result
    /// without a view would break the record's invariant.
    pub fn with_result(&self, result_ref: impl Into<ImageRef>) -> Option<Self> {
        let view = self.source_view?;
        Some(Self::success(result_ref, view))
    }

    pub fn status(&self) -> PoseStatus {
        self.status
    }

    pub fn result_ref(&self) -> Option<&ImageRef> {
        self.result_ref.as_ref()
    }

    pub fn source_view(&self) -> Option<GarmentView> {
        self.source_view
    }

    pub fn is_loading(&self) -> bool {
        self.status == PoseStatus::Loading
    }

    /// Check the record invariants, used when reading persisted records.
    ///
    /// - a result is present iff the status is `success`
    /// - a result always has a source view
    pub fn is_consistent(&self) -> bool {
        let has_result = self.result_ref.is_some();
        let success = self.status == PoseStatus::Success;
        has_result == success && (!has_result || self.source_view.is_some())
    }
}

// ---------------------------------------------------------------------------
// Aggregate state
// ---------------------------------------------------------------------------

/// One entry of the derived "final images" view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalImage {
    pub pose_id: PoseId,
    pub source_view: GarmentView,
    pub image_ref: ImageRef,
}

/// Everything the workflow knows about one user's campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowState {
    pub garment_front: Option<GarmentImage>,
    pub garment_back: Option<GarmentImage>,
    pub gender: Option<Gender>,
    pub model_id: Option<String>,
    pub pose_states: BTreeMap<PoseId, PoseGenerationRecord>,
    pub collections: BTreeMap<PoseId, Collection>,
}

impl WorkflowState {
    pub fn garment(&self, view: GarmentView) -> Option<&GarmentImage> {
        match view {
            GarmentView::Front => self.garment_front.as_ref(),
            GarmentView::Back => self.garment_back.as_ref(),
        }
    }

    pub fn set_garment(&mut self, view: GarmentView, image: Option<GarmentImage>) {
        match view {
            GarmentView::Front => self.garment_front = image,
            GarmentView::Back => self.garment_back = image,
        }
    }

    pub fn pose_state(&self, pose_id: &str) -> Option<&PoseGenerationRecord> {
        self.pose_states.get(pose_id)
    }

    pub fn collection(&self, pose_id: &str) -> Option<&Collection> {
        self.collections.get(pose_id)
    }

    /// Successful poses, in the selected model's pose order.
    ///
    /// Poses that belong to no selected model are listed afterwards in id
    /// order, so a result is never hidden by a catalog change.
    pub fn final_images(&self, catalog: &ModelCatalog) -> Vec<FinalImage> {
        let ordered: Vec<&str> = self
            .model_id
            .as_deref()
            .and_then(|id| catalog.model(id))
            .map(|m| m.poses.iter().map(|p| p.id.as_str()).collect())
            .unwrap_or_default();

        let entry = |pose_id: &str| {
            let record = self.pose_states.get(pose_id)?;
            if record.status() != PoseStatus::Success {
                return None;
            }
            Some(FinalImage {
                pose_id: pose_id.to_string(),
                source_view: record.source_view()?,
                image_ref: record.result_ref()?.clone(),
            })
        };

        let mut images: Vec<FinalImage> = ordered.iter().filter_map(|id| entry(*id)).collect();
        images.extend(
            self.pose_states
                .keys()
                .filter(|id| !ordered.contains(&id.as_str()))
                .filter_map(|id| entry(id.as_str())),
        );
        images
    }

    /// Whether any pose result or collection item points at `image_ref`.
    pub fn references(&self, image_ref: &str) -> bool {
        self.pose_states
            .values()
            .any(|r| r.result_ref().is_some_and(|x| x == image_ref))
            || self
                .collections
                .values()
                .any(|c| c.iter().any(|item| item.image_ref == image_ref))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
