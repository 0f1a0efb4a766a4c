//! Campaign workflow core: state reconciliation, the background handoff,
//! generation orchestration and collection export.

pub mod collections;
pub mod controller;
pub mod editor;
pub mod error;
pub mod export;
pub mod handoff;
pub mod keys;
pub mod merge;
pub mod snapshot;

pub use controller::{WorkflowController, WorkflowDeps};
pub use editor::BackgroundEditor;
pub use error::{WorkflowError, WorkflowResult};
pub use handoff::{HandoffChannel, HandoffPayload, HandoffReturn};
pub use keys::SessionKeys;
pub use merge::{CleanupReport, LoadReport, MergeEngine, SaveOutcome};
