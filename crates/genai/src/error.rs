/// Errors from the image generation and compositing collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The service refused the request because the account is out of quota.
    #[error("Generation quota exhausted: {0}")]
    QuotaExhausted(String),

    /// The service answered but returned no image part.
    #[error("No image returned: {0}")]
    NoImage(String),

    /// The request could not be built from the given inputs.
    #[error("Invalid generation input: {0}")]
    InvalidInput(String),

    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Message shown to users when the quota is exhausted.
pub const QUOTA_MESSAGE: &str =
    "The image generation quota has been reached. Please wait a while and try again.";

impl GenerationError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_))
    }

    /// Text suitable for display, keeping quota failures distinguishable.
    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaExhausted(_) => QUOTA_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_is_distinct() {
        let quota = GenerationError::QuotaExhausted("429".into());
        let generic = GenerationError::NoImage("text only".into());

        assert!(quota.is_quota());
        assert!(!generic.is_quota());
        assert_eq!(quota.user_message(), QUOTA_MESSAGE);
        assert!(generic.user_message().contains("text only"));
    }
}
