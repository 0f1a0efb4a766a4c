//! Inputs and outputs of the generation collaborator.

/// An encoded image with its MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePart {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

impl std::fmt::Debug for ImagePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePart")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Everything needed to synthesize one pose photo.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub garment: ImagePart,
    pub model_identity: ImagePart,
    pub pose_reference: ImagePart,
    pub pose_command: String,
    /// Correction requested by the user when regenerating.
    pub fix_instruction: Option<String>,
}

/// A subject image to place onto a background.
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    pub subject: ImagePart,
    pub background: ImagePart,
}
