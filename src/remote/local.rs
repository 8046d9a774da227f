//! Local directory object store
//!
//! Keeps each object as one file named by its key under a root directory.
//! Used for development and single-host deployments without B2.

use async_trait::async_trait;
use bytes::Bytes;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::errors::{RemoteError, RemoteResult};
use super::ObjectStore;

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

/// Object keys become file names, so they must be a single path component
fn validate_key(key: &str) -> RemoteResult<()> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0'])
    {
        return Err(RemoteError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn write_atomic(root: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(".tmp")
        .tempfile_in(root)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl LocalDirStore {
    pub fn new(root: PathBuf) -> RemoteResult<Self> {
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "Local object store initialized");
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> RemoteResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn put(&self, key: &str, data: Bytes) -> RemoteResult<String> {
        let path = self.object_path(key)?;
        let root = self.root.clone();
        let size = data.len();

        tokio::task::spawn_blocking(move || write_atomic(&root, &path, &data))
            .await
            .map_err(|e| RemoteError::Request(format!("upload task failed: {}", e)))??;

        debug!(key = key, size = size, "Stored object in local directory");
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> RemoteResult<Bytes> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("local://{}", self.root.display())
    }
}
