//! File record and tag types
//!
//! One `FileRecord` per logical file. The JSON form carries the five
//! public fields only; cache provenance stays internal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Separator used when tags are stored as a single column
pub const TAG_DELIMITER: &str = ",";

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Unordered, de-duplicated set of tags.
///
/// Every input value is split on the delimiter and trimmed, so `"dog, baxter"`
/// yields the two tags `dog` and `baxter`. Matching is case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(BTreeSet<String>);

impl Tags {
    /// Build a tag set from raw user-provided values
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = values
            .into_iter()
            .flat_map(|v| {
                v.as_ref()
                    .split(TAG_DELIMITER)
                    .map(|t| t.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|t| !t.is_empty())
            .collect();
        Self(set)
    }

    /// Parse the stored column form
    pub fn parse(column: &str) -> Self {
        Self::from_values([column])
    }

    /// Render the stored column form (sorted, delimiter-joined)
    pub fn to_column(&self) -> String {
        self.0
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(TAG_DELIMITER)
    }

    /// Exact membership test
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Add all tags from another set
    pub fn extend(&mut self, other: &Tags) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<String>> for Tags {
    fn from(values: Vec<String>) -> Self {
        Self::from_values(values)
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.0.into_iter().collect()
    }
}

/// Metadata row for one logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Human-facing identifier, unique
    #[serde(rename = "file_name")]
    pub name: String,
    /// Remote object key, unique and immutable once assigned
    pub object_key: String,
    /// Base64 SHA-256 of the bytes stored at `object_key`
    #[serde(rename = "file_sha256")]
    pub checksum: String,
    /// Milliseconds since epoch of the upload that produced this record
    pub upload_timestamp: i64,
    pub tags: Tags,
    /// Local cache copy, if one has been written
    #[serde(skip)]
    pub local_path: Option<PathBuf>,
    /// When the cache copy was written (only meaningful with `local_path`)
    #[serde(skip)]
    pub cache_timestamp: Option<i64>,
}

impl FileRecord {
    /// A freshly uploaded record with no cache copy
    pub fn new(
        name: impl Into<String>,
        object_key: impl Into<String>,
        checksum: impl Into<String>,
        upload_timestamp: i64,
        tags: Tags,
    ) -> Self {
        Self {
            name: name.into(),
            object_key: object_key.into(),
            checksum: checksum.into(),
            upload_timestamp,
            tags,
            local_path: None,
            cache_timestamp: None,
        }
    }
}
