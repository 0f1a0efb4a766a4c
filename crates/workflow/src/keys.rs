//! Storage key conventions, all scoped by owner id.
//!
//! Key-value records are named `<owner>:<name>` and per-pose collection
//! records `<owner>:collection_<poseId>`, so one prefix scan finds every
//! collection of an owner. Blobs live under `users/<owner>/`.

use lookbook_core::error::CoreError;
use lookbook_core::naming::validate_key_segment;
use lookbook_core::state::GarmentView;
use lookbook_core::types::OwnerId;

const SNAPSHOT_NAME: &str = "state";
const COLLECTION_NAME: &str = "collection_";
const HANDOFF_OUTBOUND_NAME: &str = "handoff_outbound";
const HANDOFF_RETURN_NAME: &str = "handoff_return";

/// Key builder for one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    owner_id: OwnerId,
}

impl SessionKeys {
    pub fn new(owner_id: &str) -> Result<Self, CoreError> {
        validate_key_segment("owner id", owner_id)?;
        Ok(Self {
            owner_id: owner_id.to_string(),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Prefix shared by every key-value record of this owner.
    pub fn owner_prefix(&self) -> String {
        format!("{}:", self.owner_id)
    }

    pub fn snapshot(&self) -> String {
        format!("{}:{SNAPSHOT_NAME}", self.owner_id)
    }

    pub fn collection_prefix(&self) -> String {
        format!("{}:{COLLECTION_NAME}", self.owner_id)
    }

    pub fn collection(&self, pose_id: &str) -> String {
        format!("{}{pose_id}", self.collection_prefix())
    }

    /// Recover the pose id from a per-pose collection key.
    pub fn pose_of_collection_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.collection_prefix())
            .filter(|pose| !pose.is_empty())
    }

    pub fn handoff_outbound(&self) -> String {
        format!("{}:{HANDOFF_OUTBOUND_NAME}", self.owner_id)
    }

    pub fn handoff_return(&self) -> String {
        format!("{}:{HANDOFF_RETURN_NAME}", self.owner_id)
    }

    /// Prefix shared by every blob of this owner.
    pub fn blob_prefix(&self) -> String {
        format!("users/{}/", self.owner_id)
    }

    pub fn garment_blob(&self, view: GarmentView) -> String {
        format!("{}garment/{view}", self.blob_prefix())
    }

    pub fn pose_blob(&self, pose_id: &str, file_name: &str) -> String {
        format!("{}poses/{pose_id}/{file_name}", self.blob_prefix())
    }
}
