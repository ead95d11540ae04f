//! Error types for metadata resources and the schema registry

use thiserror::Error;

/// Result type for metadata operations
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Metadata and schema registry errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The designated schema version is a delete marker.
    #[error("Schema is deleted: {0}")]
    Deleted(String),

    #[error("Incompatible schema: {0}")]
    IncompatibleSchema(String),

    #[error("Invalid schema data: {0}")]
    InvalidSchemaData(String),

    #[error("Gave up on {path} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { path: String, attempts: u32 },

    /// Conditional write rejected by the store. Resource operations translate
    /// this into `AlreadyExists` or a retry; it only escapes from raw store calls.
    #[error("Version mismatch at {path}")]
    BadVersion { path: String },

    #[error("Node {0} still has children")]
    NotEmpty(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl MetadataError {
    /// HTTP status this error maps to in the REST form.
    pub fn status_code(&self) -> u16 {
        match self {
            MetadataError::NotFound(_) | MetadataError::Deleted(_) => 404,
            MetadataError::AlreadyExists(_)
            | MetadataError::IncompatibleSchema(_)
            | MetadataError::ConflictRetriesExhausted { .. }
            | MetadataError::BadVersion { .. }
            | MetadataError::NotEmpty(_) => 409,
            MetadataError::InvalidPath(_) | MetadataError::InvalidTopicName(_) => 412,
            MetadataError::InvalidSchemaData(_) => 422,
            MetadataError::Unauthorized(_) => 401,
            MetadataError::StoreUnavailable(_) => 503,
            MetadataError::Timeout(_) => 504,
            MetadataError::Serialization(_) | MetadataError::Io(_) | MetadataError::Config(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(MetadataError::NotFound("/a".into()).status_code(), 404);
        assert_eq!(MetadataError::Deleted("t".into()).status_code(), 404);
        assert_eq!(MetadataError::IncompatibleSchema("x".into()).status_code(), 409);
        assert_eq!(MetadataError::InvalidSchemaData("x".into()).status_code(), 422);
        assert_eq!(MetadataError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(MetadataError::StoreUnavailable("down".into()).status_code(), 503);
    }
}
