//! Errors surfaced by the store's public operations

use serde::{Deserialize, Serialize};

use crate::metadata::MetadataError;

/// Outcome classes callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unavailable,
    StorageInconsistency,
    InvalidRequest,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum TierError {
    /// No record for the name
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Conflict: {column} already exists: {value}")]
    Conflict { column: String, value: String },

    /// A dependency failed transiently and the retry budget is spent
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Metadata knows the name but the remote object is missing or wrong
    #[error("Storage inconsistency for '{name}' (object {object_key}): {reason}")]
    StorageInconsistency {
        name: String,
        object_key: String,
        reason: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TierError::NotFound(_) => ErrorKind::NotFound,
            TierError::Conflict { .. } => ErrorKind::Conflict,
            TierError::Unavailable(_) => ErrorKind::Unavailable,
            TierError::StorageInconsistency { .. } => ErrorKind::StorageInconsistency,
            TierError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TierError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<MetadataError> for TierError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(name) => TierError::NotFound(name),
            MetadataError::Conflict { column, value } => TierError::Conflict { column, value },
            MetadataError::Transient(msg) => TierError::Unavailable(msg),
            MetadataError::Database(e) => TierError::Internal(e.to_string()),
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, TierError>;
