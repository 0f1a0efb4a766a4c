use async_trait::async_trait;

use crate::error::GenerationError;
use crate::request::{CompositeRequest, GenerationRequest, ImagePart};

/// The external image service: pose synthesis and background compositing.
///
/// Implementations may fail at any time; callers treat every failure as
/// terminal for the single operation and never retry automatically.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<ImagePart, GenerationError>;

    async fn compose(&self, request: CompositeRequest) -> Result<ImagePart, GenerationError>;
}
