/// Identifier of the user that owns a workflow session.
pub type OwnerId = String;

/// Identifier of a pose within the model catalog.
pub type PoseId = String;

/// Opaque reference (URL or key) to a stored image.
pub type ImageRef = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
