//! Remote object storage
//!
//! Durable bytes keyed by an object key that is independent of the file
//! name. Backends: Backblaze B2 for real deployments, a local directory for
//! development, and an in-memory store for tests.

pub mod b2;
pub mod b2_types;
pub mod errors;
pub mod local;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

pub use b2::{B2Settings, B2Store};
pub use errors::{RemoteError, RemoteResult};
pub use local::LocalDirStore;

/// Durable object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` and return the committed key.
    ///
    /// Idempotent: repeating a put with the same key and bytes is safe.
    async fn put(&self, key: &str, data: Bytes) -> RemoteResult<String>;

    /// Fetch the full content stored under `key`
    async fn get(&self, key: &str) -> RemoteResult<Bytes>;

    /// Short description for logs and status output
    fn describe(&self) -> String;
}
