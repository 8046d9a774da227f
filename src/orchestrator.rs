//! Retrieval orchestrator
//!
//! Resolves file names to bytes across the three tiers:
//!
//! ```text
//! START -> CACHE_CHECK -> CACHE_HIT ----------------------------> SERVE
//!                      \-> CACHE_MISS -> REMOTE_FETCH -> (fill) -> SERVE
//! ```
//!
//! Uploads go the other way: bytes to the remote store first, then the
//! metadata commit, so a crash in between leaves an orphaned object and
//! never a record pointing at nothing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{FillOutcome, LocalCache};
use crate::checksum;
use crate::config::FillMode;
use crate::error::{Result, TierError};
use crate::metadata::{now_millis, FileRecord, MetadataStore, Tags};
use crate::remote::{ObjectStore, RemoteError, RemoteResult};
use crate::sniff;
use crate::stats::{Stats, StatsSnapshot};

/// Longest accepted file name, in bytes
pub const MAX_NAME_LEN: usize = 1024;

/// Pause before the single retry of a transient remote failure
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Which tier served a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Cache,
    Remote,
}

/// Bytes served for a name
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub name: String,
    pub content: Bytes,
    pub content_type: &'static str,
    pub source: Source,
}

impl Retrieved {
    fn new(name: &str, content: Bytes, source: Source) -> Self {
        Self {
            name: name.to_string(),
            content_type: sniff::content_type(&content),
            content,
            source,
        }
    }
}

/// Store-level tunables
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub fill_mode: FillMode,
    pub max_upload_bytes: u64,
}

pub struct Orchestrator {
    metadata: Arc<dyn MetadataStore>,
    remote: Arc<dyn ObjectStore>,
    cache: Arc<LocalCache>,
    options: StoreOptions,
    retry_backoff: Duration,
    stats: Arc<Stats>,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TierError::InvalidRequest("file name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(TierError::InvalidRequest(format!(
            "file name is {} bytes, limit is {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(TierError::InvalidRequest(
            "file name contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

/// Classify a remote failure that is not a missing object
fn remote_failure(err: RemoteError) -> TierError {
    if err.is_retryable() {
        TierError::Unavailable(err.to_string())
    } else {
        TierError::Internal(format!("remote store: {}", err))
    }
}

async fn run_fill(cache: &LocalCache, stats: &Stats, record: FileRecord, data: Bytes) {
    match cache.write_cache(&record, data).await {
        Ok(FillOutcome::Committed(updated)) => {
            debug!(
                name = %updated.name,
                cache_timestamp = ?updated.cache_timestamp,
                "Cache fill committed"
            );
            stats.record_fill_committed();
        }
        Ok(FillOutcome::Superseded) => stats.record_fill_superseded(),
        Err(e) => {
            warn!(name = %record.name, error = %e, "Cache fill failed");
            stats.record_fill_failed();
        }
    }
}

impl Orchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        remote: Arc<dyn ObjectStore>,
        cache: Arc<LocalCache>,
        options: StoreOptions,
    ) -> Self {
        Self {
            metadata,
            remote,
            cache,
            options,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            stats: Arc::new(Stats::new()),
        }
    }

    #[cfg(test)]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Run a remote operation, retrying once after a transient failure
    async fn with_retry<T, F, Fut>(&self, operation: &str, key: &str, f: F) -> RemoteResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        match f().await {
            Err(e) if e.is_retryable() => {
                warn!(
                    operation = operation,
                    key = key,
                    error = %e,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "Transient remote error, retrying once"
                );
                tokio::time::sleep(self.retry_backoff).await;
                f().await
            }
            other => other,
        }
    }

    /// Store `data` under `name`, replacing any previous upload of that name
    pub async fn upload(&self, name: &str, data: Bytes, tags: Tags) -> Result<FileRecord> {
        validate_name(name)?;
        if data.len() as u64 > self.options.max_upload_bytes {
            return Err(TierError::InvalidRequest(format!(
                "upload is {} bytes, limit is {}",
                data.len(),
                self.options.max_upload_bytes
            )));
        }

        let checksum = checksum::checksum(&data);
        // Fresh key per upload: an object is never overwritten in place
        let object_key = Uuid::new_v4().to_string();

        let committed_key = self
            .with_retry("put", &object_key, || self.remote.put(&object_key, data.clone()))
            .await
            .map_err(remote_failure)?;

        let record = FileRecord::new(name, committed_key, checksum, now_millis(), tags);

        let _guard = self.cache.lock_name(name).await;
        let stored = match self.metadata.insert(&record).await {
            Ok(()) => record,
            Err(e) if e.is_name_conflict() => {
                debug!(name = name, "Name exists, replacing record");
                self.metadata.replace(&record).await?
            }
            Err(e) => return Err(e.into()),
        };

        self.stats.record_upload();
        info!(
            name = name,
            object_key = %stored.object_key,
            size = data.len(),
            tags = stored.tags.len(),
            upload_timestamp = stored.upload_timestamp,
            "Upload committed"
        );
        Ok(stored)
    }

    /// Resolve a name to its bytes, preferring a fresh cache copy
    pub async fn retrieve(&self, name: &str) -> Result<Retrieved> {
        let record = self.metadata.get_by_name(name).await?;

        if LocalCache::is_fresh(&record) {
            match self.cache.read_cached(&record).await {
                Ok(content) => {
                    self.stats.record_hit();
                    return Ok(Retrieved::new(name, content, Source::Cache));
                }
                Err(e) => {
                    warn!(name = name, error = %e, "Cached copy unreadable, fetching from remote");
                    self.stats.record_corruption();
                }
            }
        } else {
            debug!(name = name, "Cache MISS");
            self.stats.record_miss();
        }

        let content = self.fetch_remote(&record).await?;
        self.fill(record, content.clone()).await;
        Ok(Retrieved::new(name, content, Source::Remote))
    }

    async fn fetch_remote(&self, record: &FileRecord) -> Result<Bytes> {
        self.stats.record_remote_fetch();
        let key = record.object_key.as_str();

        let data = self
            .with_retry("get", key, || self.remote.get(key))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    TierError::StorageInconsistency {
                        name: record.name.clone(),
                        object_key: key.to_string(),
                        reason: "remote object is missing".to_string(),
                    }
                } else {
                    remote_failure(e)
                }
            })?;

        if !checksum::matches(&data, &record.checksum) {
            return Err(TierError::StorageInconsistency {
                name: record.name.clone(),
                object_key: key.to_string(),
                reason: "remote bytes do not match recorded checksum".to_string(),
            });
        }

        debug!(name = %record.name, object_key = key, size = data.len(), "Fetched from remote");
        Ok(data)
    }

    /// Populate the cache; failures are logged and never reach the reader
    async fn fill(&self, record: FileRecord, data: Bytes) {
        match self.options.fill_mode {
            FillMode::Inline => run_fill(&self.cache, &self.stats, record, data).await,
            FillMode::Background => {
                let cache = Arc::clone(&self.cache);
                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    run_fill(&cache, &stats, record, data).await;
                });
            }
        }
    }

    pub async fn get_metadata(&self, name: &str) -> Result<FileRecord> {
        Ok(self.metadata.get_by_name(name).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<FileRecord>> {
        Ok(self.metadata.list().await?)
    }

    /// Records carrying `tag` exactly (case-sensitive, whole tag)
    pub async fn search_by_tag(&self, tag: &str) -> Result<Vec<FileRecord>> {
        Ok(self.metadata.query_by_tag(tag).await?)
    }

    pub async fn add_tags(&self, name: &str, tags: Tags) -> Result<FileRecord> {
        if tags.is_empty() {
            return Err(TierError::InvalidRequest("no tags given".to_string()));
        }
        let record = self.metadata.add_tags(name, &tags).await?;
        info!(name = name, tags = %record.tags.to_column(), "Tags updated");
        Ok(record)
    }

    pub async fn is_healthy(&self) -> bool {
        match self.metadata.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Metadata health check failed");
                false
            }
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.options.max_upload_bytes
    }

    pub fn backend(&self) -> String {
        self.remote.describe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn log_stats(&self) {
        self.stats.log_stats();
    }
}
