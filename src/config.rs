//! Runtime configuration, read once from the environment at startup

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::remote::B2Settings;

/// Default Unix socket path for the control surface
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tierstore.sock";

/// Default upload limit: 100 MiB (uploads are buffered in memory)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Where file bytes are stored durably
#[derive(Debug, Clone)]
pub enum RemoteTarget {
    B2(B2Settings),
    LocalDir { root: PathBuf },
}

/// When a remote fetch populates the local cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Before the read returns
    Inline,
    /// In a spawned task after the bytes are served
    Background,
}

impl FromStr for FillMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(FillMode::Inline),
            "background" => Ok(FillMode::Background),
            other => Err(anyhow!("unknown fill mode '{}' (expected inline|background)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub socket_path: PathBuf,
    pub remote: RemoteTarget,
    pub max_upload_bytes: u64,
    pub fill_mode: FillMode,
    /// Verify cached bytes against the stored checksum on every cache hit
    pub verify_cache: bool,
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("{}: expected a boolean, got '{}'", key, other),
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tierstore")
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cache_dir = lookup("TIERSTORE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join("tierstore")
            });

        let db_path = lookup("TIERSTORE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("metadata.db"));

        let socket_path = lookup("TIERSTORE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));

        // B2 when credentials are present, unless overridden
        let backend = lookup("TIERSTORE_BACKEND").unwrap_or_else(|| {
            if lookup("B2_KEY_ID").is_some() {
                "b2".to_string()
            } else {
                "local".to_string()
            }
        });

        let remote = match backend.to_ascii_lowercase().as_str() {
            "b2" => {
                let require = |key: &str| {
                    lookup(key).with_context(|| format!("{} must be set for the b2 backend", key))
                };
                RemoteTarget::B2(B2Settings {
                    key_id: require("B2_KEY_ID")?,
                    key: require("B2_KEY")?,
                    bucket_name: require("B2_BUCKET")?,
                    endpoint: lookup("B2_ENDPOINT"),
                })
            }
            "local" => RemoteTarget::LocalDir {
                root: lookup("TIERSTORE_LOCAL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| data_dir().join("objects")),
            },
            other => bail!("TIERSTORE_BACKEND: unknown backend '{}' (expected b2|local)", other),
        };

        let max_upload_bytes = match lookup("TIERSTORE_MAX_UPLOAD_BYTES") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("TIERSTORE_MAX_UPLOAD_BYTES: invalid number '{}'", v))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let fill_mode = match lookup("TIERSTORE_FILL_MODE") {
            Some(v) => v.parse::<FillMode>().context("TIERSTORE_FILL_MODE")?,
            None => FillMode::Inline,
        };

        let verify_cache = match lookup("TIERSTORE_VERIFY_CACHE") {
            Some(v) => parse_bool("TIERSTORE_VERIFY_CACHE", &v)?,
            None => false,
        };

        Ok(Self {
            cache_dir,
            db_path,
            socket_path,
            remote,
            max_upload_bytes,
            fill_mode,
            verify_cache,
        })
    }
}
