//! Local cache error types

use std::path::PathBuf;

use crate::metadata::MetadataError;

/// Local cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A recorded cache copy could not be read back intact
    #[error("Cache corruption at {}: {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error during cache fill: {0}")]
    Metadata(#[from] MetadataError),
}

#[cfg(test)]
impl CacheError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}

/// Result type for local cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
