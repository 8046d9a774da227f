//! SQLite-backed metadata store
//!
//! One `file_metadata` table keyed by file name. A single pooled connection
//! serializes writers, so each statement below is atomic on its own and
//! the multi-statement paths run inside a transaction.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::errors::{MetadataError, MetadataResult};
use super::record::{FileRecord, Tags, TAG_DELIMITER};
use super::store::{CacheUpdate, MetadataStore};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS file_metadata (
    file_name        TEXT PRIMARY KEY NOT NULL,
    object_key       TEXT NOT NULL UNIQUE,
    file_sha256      TEXT NOT NULL,
    upload_timestamp INTEGER NOT NULL,
    tags             TEXT NOT NULL DEFAULT '',
    local_path       TEXT,
    cache_timestamp  INTEGER
)
"#;

const RECORD_COLUMNS: &str =
    "file_name, object_key, file_sha256, upload_timestamp, tags, local_path, cache_timestamp";

/// Metadata store backed by a SQLite database
pub struct SqliteMetadataStore {
    pool: Pool<Sqlite>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database file at `path` and apply the schema
    pub async fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Transient(format!("{}: {}", parent.display(), e)))?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(path = %path.display(), "Metadata store opened");
        Ok(store)
    }

    /// Private in-memory database
    #[cfg(test)]
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // The database lives only as long as its one connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> MetadataResult<FileRecord> {
    let tags: String = row.try_get("tags")?;
    let local_path: Option<String> = row.try_get("local_path")?;

    Ok(FileRecord {
        name: row.try_get("file_name")?,
        object_key: row.try_get("object_key")?,
        checksum: row.try_get("file_sha256")?,
        upload_timestamp: row.try_get("upload_timestamp")?,
        tags: Tags::parse(&tags),
        local_path: local_path.map(PathBuf::from),
        cache_timestamp: row.try_get("cache_timestamp")?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &FileRecord) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO file_metadata (file_name, object_key, file_sha256, upload_timestamp, tags) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.name)
        .bind(&record.object_key)
        .bind(&record.checksum)
        .bind(record.upload_timestamp)
        .bind(record.tags.to_column())
        .execute(&self.pool)
        .await
        .map_err(|e| MetadataError::from(e).with_conflict_value(&record.name, &record.object_key))?;

        debug!(file = %record.name, object_key = %record.object_key, "Inserted file record");
        Ok(())
    }

    async fn replace(&self, record: &FileRecord) -> MetadataResult<FileRecord> {
        // MAX() keeps upload_timestamp monotonic and at or above any existing
        // cache_timestamp, which is what marks the old cache copy stale.
        let sql = format!(
            "UPDATE file_metadata \
             SET object_key = ?, file_sha256 = ?, tags = ?, \
                 upload_timestamp = MAX(?, upload_timestamp, COALESCE(cache_timestamp, 0)) \
             WHERE file_name = ? \
             RETURNING {}",
            RECORD_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&record.object_key)
            .bind(&record.checksum)
            .bind(record.tags.to_column())
            .bind(record.upload_timestamp)
            .bind(&record.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from(e).with_conflict_value(&record.name, &record.object_key)
            })?;

        let stored = match row {
            Some(row) => row_to_record(&row)?,
            None => return Err(MetadataError::NotFound(record.name.clone())),
        };

        debug!(
            file = %stored.name,
            object_key = %stored.object_key,
            upload_timestamp = stored.upload_timestamp,
            "Replaced file record"
        );
        Ok(stored)
    }

    async fn get_by_name(&self, name: &str) -> MetadataResult<FileRecord> {
        let sql = format!("SELECT {} FROM file_metadata WHERE file_name = ?", RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(MetadataError::NotFound(name.to_string())),
        }
    }

    async fn list(&self) -> MetadataResult<Vec<FileRecord>> {
        let sql = format!("SELECT {} FROM file_metadata ORDER BY file_name", RECORD_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn query_by_tag(&self, tag: &str) -> MetadataResult<Vec<FileRecord>> {
        let tag = tag.trim();
        if tag.is_empty() || tag.contains(TAG_DELIMITER) {
            return Ok(Vec::new());
        }

        // Delimiters on both sides turn instr() into whole-tag matching,
        // so "cat" does not hit "category". instr() is case-sensitive.
        let sql = format!(
            "SELECT {} FROM file_metadata \
             WHERE instr(',' || tags || ',', ',' || ? || ',') > 0 \
             ORDER BY file_name",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(tag).fetch_all(&self.pool).await?;

        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<MetadataResult<Vec<_>>>()?;
        Ok(records.into_iter().filter(|r| r.tags.contains(tag)).collect())
    }

    async fn update_cache_fields(
        &self,
        update: &CacheUpdate,
    ) -> MetadataResult<Option<FileRecord>> {
        let local_path = update.local_path.to_string_lossy().to_string();
        let sql = format!(
            "UPDATE file_metadata SET local_path = ?, cache_timestamp = ? \
             WHERE file_name = ? AND upload_timestamp = ? \
             RETURNING {}",
            RECORD_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&local_path)
            .bind(update.cache_timestamp)
            .bind(&update.name)
            .bind(update.observed_upload_timestamp)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            debug!(
                file = %update.name,
                local = %local_path,
                cache_timestamp = update.cache_timestamp,
                "Recorded cache fill"
            );
            return row_to_record(&row).map(Some);
        }

        // Nothing matched: either the record is gone or it was re-uploaded
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM file_metadata WHERE file_name = ?")
                .bind(&update.name)
                .fetch_optional(&self.pool)
                .await?;

        match exists {
            Some(_) => Ok(None),
            None => Err(MetadataError::NotFound(update.name.clone())),
        }
    }

    async fn add_tags(&self, name: &str, tags: &Tags) -> MetadataResult<FileRecord> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT tags FROM file_metadata WHERE file_name = ?")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;

        let mut merged = match current {
            Some(column) => Tags::parse(&column),
            None => return Err(MetadataError::NotFound(name.to_string())),
        };
        merged.extend(tags);

        let sql = format!(
            "UPDATE file_metadata SET tags = ? WHERE file_name = ? RETURNING {}",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(merged.to_column())
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        let record = row_to_record(&row)?;

        tx.commit().await?;

        debug!(file = name, tags = %record.tags.to_column(), "Updated tags");
        Ok(record)
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, key: &str, ts: i64, tags: &[&str]) -> FileRecord {
        FileRecord::new(
            name,
            key,
            crate::checksum::checksum(name.as_bytes()),
            ts,
            Tags::from_values(tags.iter().copied()),
        )
    }

    fn fill(name: &str, path: &str, cache_ts: i64, observed: i64) -> CacheUpdate {
        CacheUpdate {
            name: name.to_string(),
            local_path: PathBuf::from(path),
            cache_timestamp: cache_ts,
            observed_upload_timestamp: observed,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let rec = record("a.txt", "k1", 100, &["x", "y"]);
        store.insert(&rec).await.unwrap();

        let fetched = store.get_by_name("a.txt").await.unwrap();
        assert_eq!(fetched, rec);
        assert_eq!(fetched.local_path, None);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let err = store.get_by_name("missing.txt").await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(name) if name == "missing.txt"));
    }

    #[tokio::test]
    async fn test_insert_conflicts() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.insert(&record("a.txt", "k1", 1, &[])).await.unwrap();

        let err = store.insert(&record("a.txt", "k2", 2, &[])).await.unwrap_err();
        assert!(err.is_name_conflict(), "got {err:?}");

        let err = store.insert(&record("b.txt", "k1", 2, &[])).await.unwrap_err();
        match err {
            MetadataError::Conflict { column, value } => {
                assert_eq!(column, "object_key");
                assert_eq!(value, "k1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        // The rejected writes left nothing behind
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_cache_fields_and_marks_them_stale() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.insert(&record("a.txt", "k1", 100, &["x"])).await.unwrap();
        store
            .update_cache_fields(&fill("a.txt", "/cache/a.txt", 500, 100))
            .await
            .unwrap()
            .unwrap();

        // Clock went backwards: the new upload still lands at the cache timestamp
        let replaced = store
            .replace(&record("a.txt", "k2", 200, &["z"]))
            .await
            .unwrap();
        assert_eq!(replaced.object_key, "k2");
        assert_eq!(replaced.upload_timestamp, 500);
        assert_eq!(replaced.local_path, Some(PathBuf::from("/cache/a.txt")));
        assert_eq!(replaced.cache_timestamp, Some(500));
        assert!(replaced.tags.contains("z"));
        assert!(!replaced.tags.contains("x"));
    }

    #[tokio::test]
    async fn test_replace_missing_is_not_found() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let err = store.replace(&record("nope", "k", 1, &[])).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_object_key_conflict() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.insert(&record("a", "k1", 1, &[])).await.unwrap();
        store.insert(&record("b", "k2", 1, &[])).await.unwrap();

        let err = store.replace(&record("b", "k1", 2, &[])).await.unwrap_err();
        assert!(matches!(err, MetadataError::Conflict { ref column, .. } if column == "object_key"));
        assert_eq!(store.get_by_name("b").await.unwrap().object_key, "k2");
    }

    #[tokio::test]
    async fn test_update_cache_fields_only_touches_cache_columns() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let rec = record("a.txt", "k1", 100, &["x", "y"]);
        store.insert(&rec).await.unwrap();

        let updated = store
            .update_cache_fields(&fill("a.txt", "/cache/a.txt", 101, 100))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, rec.name);
        assert_eq!(updated.object_key, rec.object_key);
        assert_eq!(updated.checksum, rec.checksum);
        assert_eq!(updated.upload_timestamp, rec.upload_timestamp);
        assert_eq!(updated.tags, rec.tags);
        assert_eq!(updated.local_path, Some(PathBuf::from("/cache/a.txt")));
        assert_eq!(updated.cache_timestamp, Some(101));
    }

    #[tokio::test]
    async fn test_update_cache_fields_superseded_upload() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.insert(&record("a.txt", "k1", 100, &[])).await.unwrap();
        store.replace(&record("a.txt", "k2", 200, &[])).await.unwrap();

        // Fill observed the first upload; it must not commit
        let result = store
            .update_cache_fields(&fill("a.txt", "/cache/a.txt", 150, 100))
            .await
            .unwrap();
        assert!(result.is_none());

        let current = store.get_by_name("a.txt").await.unwrap();
        assert_eq!(current.local_path, None);
        assert_eq!(current.cache_timestamp, None);
    }

    #[tokio::test]
    async fn test_update_cache_fields_missing_name() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let err = store
            .update_cache_fields(&fill("ghost", "/cache/ghost", 2, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_by_tag_exact_match() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.insert(&record("one", "k1", 1, &["cat"])).await.unwrap();
        store.insert(&record("two", "k2", 1, &["category", "dog"])).await.unwrap();
        store.insert(&record("three", "k3", 1, &["Cat", "dog"])).await.unwrap();
        store.insert(&record("four", "k4", 1, &[])).await.unwrap();

        let names = |records: Vec<FileRecord>| -> Vec<String> {
            records.into_iter().map(|r| r.name).collect()
        };

        assert_eq!(names(store.query_by_tag("cat").await.unwrap()), vec!["one"]);
        assert_eq!(names(store.query_by_tag("Cat").await.unwrap()), vec!["three"]);
        assert_eq!(
            names(store.query_by_tag("dog").await.unwrap()),
            vec!["three", "two"]
        );
        assert!(store.query_by_tag("categ").await.unwrap().is_empty());
        assert!(store.query_by_tag("").await.unwrap().is_empty());
        assert!(store.query_by_tag("category,dog").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_ordered_by_name() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        for (name, key) in [("c", "k3"), ("a", "k1"), ("b", "k2")] {
            store.insert(&record(name, key, 1, &[])).await.unwrap();
        }
        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_add_tags_merges() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.insert(&record("a", "k1", 1, &["x"])).await.unwrap();

        let updated = store
            .add_tags("a", &Tags::from_values(["y, x"]))
            .await
            .unwrap();
        assert_eq!(updated.tags.to_column(), "x,y");

        let err = store.add_tags("b", &Tags::from_values(["y"])).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("metadata.db");

        {
            let store = SqliteMetadataStore::open(&path).await.unwrap();
            store.insert(&record("a", "k1", 7, &["t"])).await.unwrap();
            store.health_check().await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteMetadataStore::open(&path).await.unwrap();
        let rec = store.get_by_name("a").await.unwrap();
        assert_eq!(rec.upload_timestamp, 7);
        assert!(rec.tags.contains("t"));
    }
}
