//! Metadata store trait

use async_trait::async_trait;
use std::path::PathBuf;

use super::errors::MetadataResult;
use super::record::{FileRecord, Tags};

/// A cache fill to be recorded against a file.
///
/// `observed_upload_timestamp` is the upload the filled bytes came from.
/// The update only commits while that upload is still the current one.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub name: String,
    pub local_path: PathBuf,
    pub cache_timestamp: i64,
    pub observed_upload_timestamp: i64,
}

/// Authoritative record of every known file.
///
/// Every mutation is individually atomic. Uniqueness of `name` and
/// `object_key` is enforced here, not by callers.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the name or object key exists.
    async fn insert(&self, record: &FileRecord) -> MetadataResult<()>;

    /// Replace the upload fields of an existing record in place.
    ///
    /// Cache fields are left untouched. The stored `upload_timestamp` never
    /// moves backwards and never falls below the current cache timestamp,
    /// so an existing cache copy becomes stale. Returns the stored record.
    async fn replace(&self, record: &FileRecord) -> MetadataResult<FileRecord>;

    /// Point lookup by name. Fails with `NotFound` if absent.
    async fn get_by_name(&self, name: &str) -> MetadataResult<FileRecord>;

    /// All records, ordered by name
    async fn list(&self) -> MetadataResult<Vec<FileRecord>>;

    /// Records whose tag set contains `tag` exactly (case-sensitive)
    async fn query_by_tag(&self, tag: &str) -> MetadataResult<Vec<FileRecord>>;

    /// Record a cache fill.
    ///
    /// Returns `Some(record)` when committed, `None` when the record has
    /// since been replaced by a newer upload. Fails with `NotFound` if the
    /// name no longer exists.
    async fn update_cache_fields(&self, update: &CacheUpdate)
        -> MetadataResult<Option<FileRecord>>;

    /// Merge tags into an existing record
    async fn add_tags(&self, name: &str, tags: &Tags) -> MetadataResult<FileRecord>;

    /// Check connectivity
    async fn health_check(&self) -> MetadataResult<()>;
}
