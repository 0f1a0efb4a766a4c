use lookbook_core::error::CoreError;
use lookbook_genai::GenerationError;
use lookbook_store::StoreError;

/// Workflow-level error type.
///
/// Mirrors the four failure classes of the workflow: precondition
/// violations, collaborator failures, storage failures and unreadable
/// persisted records.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A missing garment, model or pose precondition. No state was changed.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The generation collaborator failed. Only the one pose is affected.
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// A blob or key-value operation failed.
    #[error("Storage failed: {0}")]
    Storage(#[from] StoreError),

    /// A persisted record could not be parsed. Treated as absent on load.
    #[error("Corrupt state in '{key}': {reason}")]
    CorruptState { key: String, reason: String },

    /// Building a download archive failed.
    #[error("Archive export failed: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The workflow was reset while the operation was in flight.
    #[error("Workflow was reset while pose '{pose_id}' was generating")]
    Stale { pose_id: String },
}

impl WorkflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(CoreError::Validation(msg.into()))
    }

    /// Text suitable for display to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Generation(e) => e.user_message(),
            Self::Validation(CoreError::Validation(msg)) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Build a [`WorkflowError::CorruptState`] from a storage error.
    pub(crate) fn corrupt(key: &str, err: &StoreError) -> Self {
        Self::CorruptState {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
