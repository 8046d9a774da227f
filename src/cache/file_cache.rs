//! Local File Cache
//!
//! Keeps copies of remote objects on local disk, one file per name.
//! Freshness is decided from metadata alone: a copy is served only when its
//! cache timestamp is newer than the last committed upload for that name.
//!
//! Layout under the cache root:
//! - `objects/` holds one file per name (percent-encoded)
//! - `tmp/` holds in-flight writes, wiped on startup

use bytes::Bytes;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::{CacheError, CacheResult};
use super::locks::{NameGuard, NameLocks};
use crate::checksum;
use crate::metadata::{now_millis, CacheUpdate, FileRecord, MetadataStore};

/// Longest encoded name used verbatim as a file name
const MAX_ENCODED_LEN: usize = 200;

/// Marker for hashed names; percent encoding never emits `%%`
const HASHED_PREFIX: &str = "%%";

/// Result of a cache fill
#[derive(Debug)]
pub enum FillOutcome {
    /// Bytes written and metadata updated
    Committed(FileRecord),
    /// A newer upload committed while the bytes were in flight; nothing kept
    Superseded,
}

/// Local disk cache for remote object content
pub struct LocalCache {
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
    metadata: Arc<dyn MetadataStore>,
    locks: NameLocks,
    /// Re-check cached bytes against the record checksum on every read
    verify_reads: bool,
}

/// Percent-encode a name, escaping ASCII uppercase too.
///
/// Literal letters in the output are all lowercase and escapes are
/// `%` plus two hex digits, so two distinct names never collide on a
/// case-insensitive filesystem.
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut buf = [0u8; 4];
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            // Infallible for String
            let _ = write!(out, "%{:02X}", c as u32);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

/// Map a file name onto a single flat file name
pub fn encode_name(name: &str) -> String {
    let encoded = match name {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => escape_name(name),
    };

    if encoded.len() > MAX_ENCODED_LEN {
        format!("{}{}", HASHED_PREFIX, checksum::hex_digest(name.as_bytes()))
    } else {
        encoded
    }
}

/// Write `data` to `dest` via a temp file in `tmp_dir`, durable before rename
fn write_atomic(tmp_dir: &Path, dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix("fill-")
        .suffix(".tmp")
        .tempfile_in(tmp_dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;

    #[cfg(unix)]
    if let Some(parent) = dest.parent() {
        fs::File::open(parent)?.sync_all()?;
    }

    Ok(())
}

impl LocalCache {
    /// Open (creating if needed) a cache rooted at `root`
    ///
    /// # Arguments
    /// * `root` - Cache root directory
    /// * `metadata` - Store that records cache provenance
    /// * `verify_reads` - Verify cached bytes against the record checksum
    pub fn open(
        root: &Path,
        metadata: Arc<dyn MetadataStore>,
        verify_reads: bool,
    ) -> CacheResult<Self> {
        let objects_dir = root.join("objects");
        let tmp_dir = root.join("tmp");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&tmp_dir)?;

        let cache = Self {
            objects_dir,
            tmp_dir,
            metadata,
            locks: NameLocks::new(),
            verify_reads,
        };

        // Clean up leftovers from interrupted fills
        cache.cleanup();

        info!(
            cache_dir = %root.display(),
            verify_reads = verify_reads,
            "Local cache initialized"
        );

        Ok(cache)
    }

    /// Whether the record's cache copy reflects its latest upload. No I/O.
    pub fn is_fresh(record: &FileRecord) -> bool {
        match (&record.local_path, record.cache_timestamp) {
            (Some(_), Some(cached_at)) => cached_at > record.upload_timestamp,
            _ => false,
        }
    }

    /// Deterministic cache location for a name
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.objects_dir.join(encode_name(name))
    }

    /// Exclusive access to `name` for fills and upload commits
    pub async fn lock_name(&self, name: &str) -> NameGuard<'_> {
        self.locks.lock(name).await
    }

    /// Read the cached copy of a fresh record.
    ///
    /// A recorded path that cannot be read back is corruption, not a miss.
    pub async fn read_cached(&self, record: &FileRecord) -> CacheResult<Bytes> {
        let Some(path) = record.local_path.as_deref() else {
            return Err(CacheError::Corruption {
                path: PathBuf::new(),
                reason: format!("no cache path recorded for '{}'", record.name),
            });
        };

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::Corruption {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if self.verify_reads && !checksum::matches(&data, &record.checksum) {
            return Err(CacheError::Corruption {
                path: path.to_path_buf(),
                reason: "checksum mismatch".to_string(),
            });
        }

        debug!(name = %record.name, size = data.len(), "Cache HIT");
        Ok(Bytes::from(data))
    }

    /// Store bytes fetched for `record` and record the fill in metadata.
    ///
    /// Runs under the name lock. If the record has been re-uploaded since
    /// `record` was read, the bytes are stale and the fill is dropped.
    pub async fn write_cache(&self, record: &FileRecord, data: Bytes) -> CacheResult<FillOutcome> {
        let _guard = self.lock_name(&record.name).await;

        let current = self.metadata.get_by_name(&record.name).await?;
        if current.object_key != record.object_key
            || current.upload_timestamp != record.upload_timestamp
        {
            debug!(
                name = %record.name,
                fetched_key = %record.object_key,
                current_key = %current.object_key,
                "Discarding superseded cache fill"
            );
            return Ok(FillOutcome::Superseded);
        }

        let dest = self.path_for(&record.name);
        {
            let tmp_dir = self.tmp_dir.clone();
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || write_atomic(&tmp_dir, &dest, &data))
                .await
                .map_err(std::io::Error::other)??;
        }

        // Strictly after the upload we fetched for, even if the clock lags
        let cache_timestamp = now_millis().max(record.upload_timestamp + 1);
        let update = CacheUpdate {
            name: record.name.clone(),
            local_path: dest.clone(),
            cache_timestamp,
            observed_upload_timestamp: record.upload_timestamp,
        };

        match self.metadata.update_cache_fields(&update).await? {
            Some(updated) => Ok(FillOutcome::Committed(updated)),
            None => {
                warn!(name = %record.name, "Cache fill lost race with a newer upload");
                Ok(FillOutcome::Superseded)
            }
        }
    }

    /// Remove temp files left by interrupted fills
    pub fn cleanup(&self) {
        let Ok(read_dir) = fs::read_dir(&self.tmp_dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            debug!(path = %path.display(), "Removing stale temp file");
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
            }
        }
    }
}
