//! IPC protocol definitions
//!
//! Newline-delimited JSON over a Unix domain socket. Each command is one
//! line; each command gets exactly one response line. File content travels
//! as standard base64.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cache::LocalCache;
use crate::error::{ErrorKind, TierError};
use crate::metadata::FileRecord;
use crate::orchestrator::{Retrieved, Source};
use crate::stats::StatsSnapshot;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Store a file, replacing any previous upload with the same name
    #[serde(rename_all = "camelCase")]
    Upload {
        name: String,
        /// Base64 file content
        content: String,
        /// Tag values; each may itself be a comma-separated list
        #[serde(default)]
        tags: Vec<String>,
    },
    /// Fetch a file's content
    Retrieve { name: String },
    /// Fetch a file's metadata record
    GetMetadata { name: String },
    /// All records
    ListFiles,
    /// Records carrying a tag (exact, case-sensitive)
    SearchByTag { tag: String },
    /// Merge tags into a record
    AddTags { name: String, tags: Vec<String> },
    /// Daemon status and counters
    GetStatus,
}

/// Responses sent back to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Uploaded { record: FileInfo },
    #[serde(rename_all = "camelCase")]
    File {
        name: String,
        content_type: String,
        /// Base64 file content
        content: String,
        source: Source,
    },
    Record { record: FileInfo },
    Records { records: Vec<FileInfo> },
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        healthy: bool,
        /// Remote backend description
        backend: String,
        stats: StatsSnapshot,
    },
    Error { error: String, kind: ErrorKind },
}

/// A file record as clients see it: the record's own JSON form plus
/// whether a fresh local copy exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(flatten)]
    pub record: FileRecord,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_timestamp: Option<i64>,
}

impl From<&FileRecord> for FileInfo {
    fn from(record: &FileRecord) -> Self {
        Self {
            record: record.clone(),
            cached: LocalCache::is_fresh(record),
            cache_timestamp: record.cache_timestamp,
        }
    }
}

impl Response {
    pub fn file(retrieved: &Retrieved) -> Self {
        Response::File {
            name: retrieved.name.clone(),
            content_type: retrieved.content_type.to_string(),
            content: encode_content(&retrieved.content),
            source: retrieved.source,
        }
    }

    pub fn records(records: &[FileRecord]) -> Self {
        Response::Records {
            records: records.iter().map(FileInfo::from).collect(),
        }
    }

    pub fn error(err: &TierError) -> Self {
        Response::Error {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

pub fn encode_content(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn decode_content(content: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(content.trim())
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}
