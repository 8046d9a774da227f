//! Metadata store error types

use thiserror::Error;

/// Metadata store operation errors
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no record for file: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write
    #[error("{column} already exists: {value}")]
    Conflict { column: String, value: String },

    /// Busy database, pool exhaustion, I/O: worth retrying
    #[error("metadata store unavailable: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl MetadataError {
    /// Whether the caller may retry the same operation
    #[cfg(test)]
    pub fn is_transient(&self) -> bool {
        matches!(self, MetadataError::Transient(_))
    }

    /// Whether a conflict was on the file name column
    pub fn is_name_conflict(&self) -> bool {
        matches!(self, MetadataError::Conflict { column, .. } if column == "file_name")
    }
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let message = db_err.message();
            // SQLite: "UNIQUE constraint failed: file_metadata.object_key"
            if db_err.is_unique_violation() {
                let column = message.rsplit('.').next().unwrap_or("unknown").trim();
                return MetadataError::Conflict {
                    column: column.to_string(),
                    value: String::new(),
                };
            }
            if message.contains("database is locked") || message.contains("database is busy") {
                return MetadataError::Transient(message.to_string());
            }
        }

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                MetadataError::Transient(err.to_string())
            }
            other => MetadataError::Database(other),
        }
    }
}

impl MetadataError {
    /// Attach the offending value to a conflict raised by the database
    pub(crate) fn with_conflict_value(self, name: &str, object_key: &str) -> Self {
        match self {
            MetadataError::Conflict { column, .. } => {
                let value = if column == "object_key" {
                    object_key.to_string()
                } else {
                    name.to_string()
                };
                MetadataError::Conflict { column, value }
            }
            other => other,
        }
    }
}

/// Result type for metadata operations
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_conflict_detection() {
        let err = MetadataError::Conflict {
            column: "file_name".to_string(),
            value: "a.txt".to_string(),
        };
        assert!(err.is_name_conflict());
        assert!(!err.is_transient());

        let err = MetadataError::Conflict {
            column: "object_key".to_string(),
            value: "k".to_string(),
        };
        assert!(!err.is_name_conflict());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: MetadataError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_display() {
        let err = MetadataError::NotFound("missing.txt".to_string());
        assert_eq!(err.to_string(), "no record for file: missing.txt");
    }
}
