/// Errors from key-value and blob storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed to read or write a key.
    #[error("Storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A value could not be encoded before writing.
    #[error("Failed to encode '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored record exists but does not parse.
    #[error("Corrupt record '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A blob reference does not resolve.
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// A key or reference is malformed for this backend.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The backend is unreachable or refused the operation.
    ///
    /// For external backends behind the store traits. The bundled memory and
    /// filesystem backends report failures as `Io`.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    /// `true` for a record that exists but fails to parse.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
