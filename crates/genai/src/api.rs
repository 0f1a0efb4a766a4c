//! HTTP client for the image generation service.
//!
//! Wraps two multipart endpoints using [`reqwest`]:
//!
//! - `POST {base}/v1/generate` with `garment`, `model_identity`,
//!   `pose_reference` image parts and `pose_command` / `fix_instruction`
//!   text fields
//! - `POST {base}/v1/compose` with `subject` and `background` image parts
//!
//! A successful call answers with the encoded image as the response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use crate::error::GenerationError;
use crate::generator::ImageGenerator;
use crate::request::{CompositeRequest, GenerationRequest, ImagePart};

/// Body fragments that identify a quota failure regardless of status code.
const QUOTA_MARKERS: &[&str] = &["RESOURCE_EXHAUSTED", "quota"];

/// Longest body excerpt kept in error messages.
const MAX_BODY_EXCERPT: usize = 512;

/// Connection settings for [`GenerationApi`].
#[derive(Debug, Clone)]
pub struct GenerationApiConfig {
    /// Base HTTP URL, e.g. `http://host:8080`.
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    /// Whole-request timeout.
    pub timeout: Duration,
}

/// HTTP implementation of [`ImageGenerator`].
pub struct GenerationApi {
    client: reqwest::Client,
    config: GenerationApiConfig,
}

impl GenerationApi {
    pub fn new(config: GenerationApiConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: GenerationApiConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<ImagePart, GenerationError> {
        let mut request = self.client.post(self.endpoint(path)).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        tracing::debug!(
            path,
            status = status.as_u16(),
            content_type = content_type.as_deref().unwrap_or(""),
            len = body.len(),
            "Generation API responded",
        );

        classify_response(status, content_type.as_deref(), body)
    }
}

#[async_trait]
impl ImageGenerator for GenerationApi {
    async fn generate(&self, request: GenerationRequest) -> Result<ImagePart, GenerationError> {
        let mut form = Form::new()
            .part("garment", image_part("garment", request.garment)?)
            .part(
                "model_identity",
                image_part("model_identity", request.model_identity)?,
            )
            .part(
                "pose_reference",
                image_part("pose_reference", request.pose_reference)?,
            )
            .text("pose_command", request.pose_command);
        if let Some(fix) = request.fix_instruction {
            form = form.text("fix_instruction", fix);
        }
        self.post_form("v1/generate", form).await
    }

    async fn compose(&self, request: CompositeRequest) -> Result<ImagePart, GenerationError> {
        let form = Form::new()
            .part("subject", image_part("subject", request.subject)?)
            .part("background", image_part("background", request.background)?);
        self.post_form("v1/compose", form).await
    }
}

// ---- helpers ----

fn image_part(name: &str, image: ImagePart) -> Result<Part, GenerationError> {
    Part::bytes(image.bytes)
        .file_name(name.to_string())
        .mime_str(&image.mime_type)
        .map_err(|_| {
            GenerationError::InvalidInput(format!(
                "'{name}' has an invalid MIME type '{}'",
                image.mime_type
            ))
        })
}

/// Map a raw HTTP response onto the generation result.
///
/// - 429, or any failure whose body mentions a quota marker -> `QuotaExhausted`
/// - other non-2xx -> `Api`
/// - 2xx without an `image/*` content type -> `NoImage`
pub fn classify_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: Vec<u8>,
) -> Result<ImagePart, GenerationError> {
    if !status.is_success() {
        let text = body_excerpt(&body);
        if status == StatusCode::TOO_MANY_REQUESTS
            || QUOTA_MARKERS.iter().any(|m| text.contains(m))
        {
            return Err(GenerationError::QuotaExhausted(error_message(&text)));
        }
        return Err(GenerationError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    match content_type {
        Some(ct) if ct.starts_with("image/") && !body.is_empty() => {
            let mime = ct.split(';').next().unwrap_or(ct).trim().to_string();
            Ok(ImagePart::new(body, mime))
        }
        _ => Err(GenerationError::NoImage(error_message(&body_excerpt(&body)))),
    }
}

fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_BODY_EXCERPT).collect()
}

/// Pull `error.message` (or `message`) out of a JSON error body.
fn error_message(text: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(text) else {
        return text.to_string();
    };
    json.pointer("/error/message")
        .or_else(|| json.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string())
}
