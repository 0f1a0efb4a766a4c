//! Static model catalog: models, their identity images and ordered poses.
//!
//! The catalog is immutable reference data loaded once at startup. It is
//! never part of per-user state; `WorkflowState` only stores ids into it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::naming::validate_key_segment;
use crate::types::{ImageRef, PoseId};

// ---------------------------------------------------------------------------
// Gender
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Parse a case-insensitive gender label.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            other => Err(CoreError::Validation(format!(
                "Unknown gender '{other}'. Must be one of: male, female"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog entities
// ---------------------------------------------------------------------------

/// A body position to replicate: reference image plus generation command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pose {
    pub id: PoseId,
    /// Display name, also used for export filenames.
    pub name: String,
    pub reference_image: ImageRef,
    pub category: String,
    /// Free-text instruction sent to the generation service.
    pub command: String,
}

/// A model identity with its ordered pose list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub gender: Gender,
    pub identity_images: Vec<ImageRef>,
    pub poses: Vec<Pose>,
}

impl Model {
    /// The identity image passed to the generation service.
    pub fn primary_identity_image(&self) -> Option<&ImageRef> {
        self.identity_images.first()
    }

    pub fn pose(&self, pose_id: &str) -> Option<&Pose> {
        self.poses.iter().find(|p| p.id == pose_id)
    }
}

/// The full set of models available to every user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<Model>,
}

impl ModelCatalog {
    /// Build a catalog and validate it.
    pub fn new(models: Vec<Model>) -> Result<Self, CoreError> {
        let catalog = Self { models };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse a catalog from its JSON file representation.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let catalog: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid catalog JSON: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check structural rules:
    ///
    /// - model ids are unique and usable as key segments
    /// - pose ids are unique across the whole catalog
    /// - every model has at least one identity image
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut model_ids = HashSet::new();
        let mut pose_ids = HashSet::new();

        for model in &self.models {
            validate_key_segment("model id", &model.id)?;
            if !model_ids.insert(model.id.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate model id '{}'",
                    model.id
                )));
            }
            if model.identity_images.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Model '{}' has no identity images",
                    model.id
                )));
            }
            for pose in &model.poses {
                validate_key_segment("pose id", &pose.id)?;
                if !pose_ids.insert(pose.id.as_str()) {
                    return Err(CoreError::Validation(format!(
                        "Duplicate pose id '{}' (model '{}')",
                        pose.id, model.id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn model(&self, model_id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Look up a model, failing with [`CoreError::NotFound`].
    pub fn require_model(&self, model_id: &str) -> Result<&Model, CoreError> {
        self.model(model_id).ok_or_else(|| CoreError::NotFound {
            entity: "model",
            id: model_id.to_string(),
        })
    }

    /// Find a pose by id within a given model.
    pub fn require_pose(&self, model_id: &str, pose_id: &str) -> Result<&Pose, CoreError> {
        self.require_model(model_id)?
            .pose(pose_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "pose",
                id: pose_id.to_string(),
            })
    }

    /// Find a pose by id in any model.
    pub fn find_pose(&self, pose_id: &str) -> Option<&Pose> {
        self.models.iter().find_map(|m| m.pose(pose_id))
    }

    pub fn models_for(&self, gender: Gender) -> impl Iterator<Item = &Model> {
        self.models.iter().filter(move |m| m.gender == gender)
    }
}
