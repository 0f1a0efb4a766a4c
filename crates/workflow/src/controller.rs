//! Orchestrates user intents for one owner's campaign workflow.
//!
//! [`WorkflowController::enter`] runs the load protocol before returning,
//! so every mutation happens after load and is followed by a save. Poses
//! generate independently: two poses may be in flight at once, and for the
//! same pose the last completion wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use lookbook_core::catalog::{Gender, Model, ModelCatalog, Pose};
use lookbook_core::collection::{Collection, CollectionItem};
use lookbook_core::naming::{image_extension, image_mime_type};
use lookbook_core::state::{
    FinalImage, GarmentImage, GarmentView, PoseGenerationRecord, WorkflowState,
};
use lookbook_core::types::ImageRef;
use lookbook_genai::{GenerationRequest, ImageGenerator, ImagePart};
use lookbook_store::{BlobStore, StateStores};

use crate::error::{WorkflowError, WorkflowResult};
use crate::export;
use crate::handoff::HandoffPayload;
use crate::keys::SessionKeys;
use crate::merge::{CleanupReport, LoadReport, MergeEngine};

/// Collaborators shared by every workflow session.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub catalog: Arc<ModelCatalog>,
    pub stores: StateStores,
    /// Per-user images: garments and generated results.
    pub blobs: Arc<dyn BlobStore>,
    /// Static catalog images addressed by relative key.
    pub assets: Arc<dyn BlobStore>,
    pub generator: Arc<dyn ImageGenerator>,
}

/// Inputs resolved before a generation starts.
struct GenerationJob {
    pose: Pose,
    garment: GarmentImage,
    identity_ref: ImageRef,
    view: GarmentView,
    started: PoseGenerationRecord,
    fix_instruction: Option<String>,
    epoch: u64,
}

pub struct WorkflowController {
    deps: WorkflowDeps,
    engine: MergeEngine,
    state: RwLock<WorkflowState>,
    save_lock: Mutex<()>,
    epoch: AtomicU64,
    load_report: LoadReport,
}

impl WorkflowController {
    /// Open the workflow for `owner_id`, merging all persisted state.
    ///
    /// Only an invalid owner id fails; unreadable stored state is skipped.
    pub async fn enter(owner_id: &str, deps: WorkflowDeps) -> WorkflowResult<Self> {
        let keys = SessionKeys::new(owner_id)?;
        let engine = MergeEngine::new(keys, deps.stores.clone(), deps.blobs.clone());
        let (state, load_report) = engine.load().await;

        Ok(Self {
            deps,
            engine,
            state: RwLock::new(state),
            save_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
            load_report,
        })
    }

    pub fn owner_id(&self) -> &str {
        self.engine.keys().owner_id()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.deps.catalog
    }

    // ---- queries ----

    pub async fn state(&self) -> WorkflowState {
        self.state.read().await.clone()
    }

    pub async fn pose_state(&self, pose_id: &str) -> Option<PoseGenerationRecord> {
        self.state.read().await.pose_state(pose_id).cloned()
    }

    pub async fn collection(&self, pose_id: &str) -> Option<Collection> {
        self.state.read().await.collection(pose_id).cloned()
    }

    pub async fn final_images(&self) -> Vec<FinalImage> {
        self.state.read().await.final_images(&self.deps.catalog)
    }

    // ---- selection ----

    pub async fn upload_garment(&self, view: GarmentView, image: GarmentImage) -> WorkflowResult<()> {
        if image.bytes.is_empty() {
            return Err(WorkflowError::validation(format!(
                "The {view} garment image is empty"
            )));
        }
        tracing::info!(
            owner_id = %self.owner_id(),
            view = %view,
            len = image.bytes.len(),
            mime_type = %image.mime_type,
            "Garment uploaded",
        );
        self.state.write().await.set_garment(view, Some(image));
        self.persist().await
    }

    pub async fn clear_garment(&self, view: GarmentView) -> WorkflowResult<()> {
        self.state.write().await.set_garment(view, None);
        self.persist().await
    }

    /// Select a gender. A selected model of the other gender is deselected.
    pub async fn select_gender(&self, gender: Gender) -> WorkflowResult<()> {
        {
            let mut state = self.state.write().await;
            let mismatch = state
                .model_id
                .as_deref()
                .and_then(|id| self.deps.catalog.model(id))
                .is_some_and(|m| m.gender != gender);
            if mismatch {
                state.model_id = None;
            }
            state.gender = Some(gender);
        }
        self.persist().await
    }

    /// Select a model. Sets the gender when none is selected yet.
    pub async fn select_model(&self, model_id: &str) -> WorkflowResult<()> {
        let model = self.deps.catalog.require_model(model_id)?;
        {
            let mut state = self.state.write().await;
            if let Some(gender) = state.gender {
                if gender != model.gender {
                    return Err(WorkflowError::validation(format!(
                        "Model '{}' is {:?}, but {:?} is selected",
                        model.id, model.gender, gender
                    )));
                }
            }
            state.gender = Some(model.gender);
            state.model_id = Some(model.id.clone());
        }
        self.persist().await
    }

    // ---- generation ----

    /// Generate `pose_id` from the garment `view`.
    pub async fn generate(&self, pose_id: &str, view: GarmentView) -> WorkflowResult<ImageRef> {
        let job = {
            let mut state = self.state.write().await;
            let (model, pose) = self.selected_pose(&state, pose_id)?;
            let garment = self.require_garment(&state, view)?;
            let job = self.job(model, pose, garment, view, PoseGenerationRecord::loading(), None)?;
            state.pose_states.insert(pose_id.to_string(), job.started.clone());
            job
        };
        self.run(job).await
    }

    /// Regenerate `pose_id` with a correction, reusing its recorded view.
    pub async fn regenerate(&self, pose_id: &str, fix_instruction: &str) -> WorkflowResult<ImageRef> {
        let fix = fix_instruction.trim();
        if fix.is_empty() {
            return Err(WorkflowError::validation("Describe what to fix before regenerating"));
        }
        let job = {
            let mut state = self.state.write().await;
            let (model, pose) = self.selected_pose(&state, pose_id)?;
            let record = state.pose_state(pose_id).cloned().unwrap_or_default();
            let view = record.source_view().ok_or_else(|| {
                WorkflowError::validation(format!("Pose '{pose_id}' has no earlier result to fix"))
            })?;
            let garment = self.require_garment(&state, view)?;
            let job = self.job(model, pose, garment, view, record.refining(), Some(fix.to_string()))?;
            state.pose_states.insert(pose_id.to_string(), job.started.clone());
            job
        };
        self.run(job).await
    }

    fn job(
        &self,
        model: &Model,
        pose: &Pose,
        garment: &GarmentImage,
        view: GarmentView,
        started: PoseGenerationRecord,
        fix_instruction: Option<String>,
    ) -> WorkflowResult<GenerationJob> {
        let identity_ref = model.primary_identity_image().cloned().ok_or_else(|| {
            WorkflowError::validation(format!("Model '{}' has no identity image", model.id))
        })?;
        Ok(GenerationJob {
            pose: pose.clone(),
            garment: garment.clone(),
            identity_ref,
            view,
            started,
            fix_instruction,
            epoch: self.epoch.load(Ordering::Acquire),
        })
    }

    /// Persist the loading record, call the generator and record the outcome.
    async fn run(&self, job: GenerationJob) -> WorkflowResult<ImageRef> {
        let pose_id = job.pose.id.clone();
        if let Err(e) = self.persist().await {
            tracing::warn!(pose_id = %pose_id, error = %e, "Failed to persist loading state");
        }
        tracing::info!(
            owner_id = %self.owner_id(),
            pose_id = %pose_id,
            view = %job.view,
            fix = job.fix_instruction.is_some(),
            "Generation started",
        );

        let outcome = self.produce(&job).await;

        let superseded = {
            let mut state = self.state.write().await;
            if self.epoch.load(Ordering::Acquire) != job.epoch {
                drop(state);
                if let Ok(image_ref) = &outcome {
                    self.discard_blob(image_ref).await;
                }
                tracing::info!(pose_id = %pose_id, "Discarding result from a reset workflow");
                return Err(WorkflowError::Stale { pose_id });
            }
            let record = match &outcome {
                Ok(image_ref) => PoseGenerationRecord::success(image_ref.clone(), job.view),
                Err(_) => job.started.failed(),
            };
            // An overlapping generation for this pose may have finished first.
            state
                .pose_states
                .insert(pose_id.clone(), record)
                .and_then(|previous| previous.result_ref().cloned())
                .filter(|previous| !state.references(previous))
        };

        match &outcome {
            Ok(image_ref) => {
                tracing::info!(pose_id = %pose_id, image_ref = %image_ref, "Generation succeeded");
            }
            Err(e) => {
                tracing::warn!(pose_id = %pose_id, error = %e, "Generation failed");
            }
        }
        self.persist().await?;
        if let Some(previous) = superseded {
            tracing::info!(pose_id = %pose_id, image_ref = %previous, "Replacing result of an overlapping generation");
            self.discard_blob(&previous).await;
        }
        outcome
    }

    /// Fetch reference images, generate and upload the result.
    async fn produce(&self, job: &GenerationJob) -> WorkflowResult<ImageRef> {
        let identity = self.asset(&job.identity_ref).await?;
        let pose_reference = self.asset(&job.pose.reference_image).await?;

        let image = self
            .deps
            .generator
            .generate(GenerationRequest {
                garment: ImagePart::new(job.garment.bytes.clone(), job.garment.mime_type.clone()),
                model_identity: identity,
                pose_reference,
                pose_command: job.pose.command.clone(),
                fix_instruction: job.fix_instruction.clone(),
            })
            .await?;

        let file_name = format!("{}.{}", Uuid::new_v4(), image_extension(&image.bytes));
        let key = self.engine.keys().pose_blob(&job.pose.id, &file_name);
        let image_ref = self
            .deps
            .blobs
            .put(&key, image.bytes, &image.mime_type)
            .await?;
        Ok(image_ref)
    }

    async fn asset(&self, image_ref: &str) -> WorkflowResult<ImagePart> {
        let bytes = self.deps.assets.get(image_ref).await?;
        let mime_type = image_mime_type(&bytes);
        Ok(ImagePart::new(bytes, mime_type))
    }

    // ---- background handoff ----

    /// Publish `pose_id` for background editing.
    ///
    /// The `original` item is added on first use and written through to the
    /// durable per-pose record before the handoff is published.
    pub async fn change_background(&self, pose_id: &str) -> WorkflowResult<HandoffPayload> {
        let (source_ref, collection) = {
            let mut state = self.state.write().await;
            let source_ref = state
                .pose_state(pose_id)
                .and_then(|r| r.result_ref())
                .cloned()
                .ok_or_else(|| {
                    WorkflowError::validation(format!(
                        "Pose '{pose_id}' has no generated image to edit"
                    ))
                })?;
            let collection = state.collections.entry(pose_id.to_string()).or_default();
            collection.ensure_original(&source_ref);
            (source_ref, collection.clone())
        };

        self.persist().await?;
        self.engine
            .handoff()
            .publish(pose_id, &source_ref, collection)
            .await
    }

    // ---- export ----

    /// Build the download archive for `pose_id`.
    ///
    /// A pose that was never background-edited exports its result alone.
    pub async fn export_collection(&self, pose_id: &str) -> WorkflowResult<Vec<u8>> {
        let collection = {
            let state = self.state.read().await;
            match state.collection(pose_id) {
                Some(c) if !c.is_empty() => c.clone(),
                _ => {
                    let result_ref = state
                        .pose_state(pose_id)
                        .and_then(|r| r.result_ref())
                        .cloned()
                        .ok_or_else(|| {
                            WorkflowError::validation(format!("Pose '{pose_id}' has nothing to export"))
                        })?;
                    Collection::from_items(vec![CollectionItem::original(result_ref)])
                }
            }
        };
        let pose_name = self
            .deps
            .catalog
            .find_pose(pose_id)
            .map(|p| p.name.as_str())
            .unwrap_or(pose_id);
        export::export_collection(self.deps.blobs.as_ref(), pose_name, &collection).await
    }

    // ---- reset ----

    /// Tear down the workflow: every stored blob and record of the owner is
    /// deleted and the state returns to empty.
    ///
    /// Deletes are best effort; failures are counted in the report.
    /// Generations still in flight are discarded when they complete.
    pub async fn start_over(&self) -> CleanupReport {
        let _guard = self.save_lock.lock().await;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        *self.state.write().await = WorkflowState::default();
        self.engine.clear().await
    }

    // ---- helpers ----

    async fn persist(&self) -> WorkflowResult<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.state.read().await.clone();
        self.engine.save(&snapshot).await?;
        Ok(())
    }

    async fn discard_blob(&self, image_ref: &str) {
        let Some(key) = self.deps.blobs.key_for_ref(image_ref) else {
            return;
        };
        if let Err(e) = self.deps.blobs.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "Failed to delete unused result");
        }
    }

    fn selected_pose<'a>(
        &'a self,
        state: &WorkflowState,
        pose_id: &str,
    ) -> WorkflowResult<(&'a Model, &'a Pose)> {
        let model_id = state
            .model_id
            .as_deref()
            .ok_or_else(|| WorkflowError::validation("Select a model before generating"))?;
        let model = self.deps.catalog.require_model(model_id)?;
        let pose = self.deps.catalog.require_pose(model_id, pose_id)?;
        Ok((model, pose))
    }

    fn require_garment<'s>(
        &self,
        state: &'s WorkflowState,
        view: GarmentView,
    ) -> WorkflowResult<&'s GarmentImage> {
        state.garment(view).ok_or_else(|| {
            WorkflowError::validation(format!("Upload the {view} garment image first"))
        })
    }
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("owner_id", &self.owner_id())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
