//! Client side of the external image generation service.

pub mod api;
pub mod error;
pub mod generator;
pub mod request;

pub use api::{GenerationApi, GenerationApiConfig};
pub use error::GenerationError;
pub use generator::ImageGenerator;
pub use request::{CompositeRequest, GenerationRequest, ImagePart};
