//! IPC Server - Unix socket control surface
//!
//! Accepts connections and dispatches each command line to the
//! orchestrator. Connections are served concurrently, one task each.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::TierError;
use crate::ipc::protocol::{
    decode_content, parse_command, serialize_response, Command, FileInfo, Response,
    PROTOCOL_VERSION,
};
use crate::metadata::Tags;
use crate::orchestrator::Orchestrator;

/// Room for the JSON envelope, name and tags around an upload's content
const LINE_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Longest command line accepted: a maximal upload in base64 plus overhead
fn max_line_bytes(max_upload_bytes: u64) -> u64 {
    max_upload_bytes.div_ceil(3).saturating_mul(4).saturating_add(LINE_OVERHEAD_BYTES)
}

/// IPC Server that listens for client commands
pub struct IpcServer {
    store: Arc<Orchestrator>,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    pub fn new(store: Arc<Orchestrator>, socket_path: impl AsRef<Path>) -> Self {
        Self {
            store,
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Bind the socket, replacing a stale socket file from a previous run
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path).with_context(|| {
            format!("Failed to bind Unix socket at {}", self.socket_path.display())
        })?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let store = Arc::clone(&self.store);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, store, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    store: Arc<Orchestrator>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = Vec::new();
    let max_line = max_line_bytes(store.max_upload_bytes());

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        let read = (&mut buf_reader)
            .take(max_line.saturating_add(1))
            .read_until(b'\n', &mut line)
            .await;
        match read {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(n) if n as u64 > max_line => {
                warn!(limit = max_line, "Command line too long, closing connection");
                let response = Response::error(&TierError::InvalidRequest(format!(
                    "command line exceeds {} bytes",
                    max_line
                )));
                if let Ok(json) = serialize_response(&response) {
                    let _ = writer.write_all(&json).await;
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim_ascii();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match parse_command(trimmed) {
                    Ok(command) => process_command(command, &store).await,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse command");
                        Response::error(&TierError::InvalidRequest(format!(
                            "Invalid command: {}",
                            e
                        )))
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Process a command and return a response
pub async fn process_command(command: Command, store: &Orchestrator) -> Response {
    match command {
        Command::Upload {
            name,
            content,
            tags,
        } => {
            let data = match decode_content(&content) {
                Ok(data) => data,
                Err(e) => {
                    return Response::error(&TierError::InvalidRequest(format!(
                        "content is not valid base64: {}",
                        e
                    )))
                }
            };
            info!(name = %name, size = data.len(), "Processing upload command");

            match store
                .upload(&name, Bytes::from(data), Tags::from_values(&tags))
                .await
            {
                Ok(record) => Response::Uploaded {
                    record: FileInfo::from(&record),
                },
                Err(e) => Response::error(&e),
            }
        }

        Command::Retrieve { name } => {
            debug!(name = %name, "Processing retrieve command");
            match store.retrieve(&name).await {
                Ok(retrieved) => Response::file(&retrieved),
                Err(e) => {
                    if matches!(e, TierError::StorageInconsistency { .. }) {
                        error!(name = %name, error = %e, "Storage inconsistency");
                    }
                    Response::error(&e)
                }
            }
        }

        Command::GetMetadata { name } => match store.get_metadata(&name).await {
            Ok(record) => Response::Record {
                record: FileInfo::from(&record),
            },
            Err(e) => Response::error(&e),
        },

        Command::ListFiles => match store.list_all().await {
            Ok(records) => Response::records(&records),
            Err(e) => Response::error(&e),
        },

        Command::SearchByTag { tag } => match store.search_by_tag(&tag).await {
            Ok(records) => Response::records(&records),
            Err(e) => Response::error(&e),
        },

        Command::AddTags { name, tags } => {
            match store.add_tags(&name, Tags::from_values(&tags)).await {
                Ok(record) => Response::Record {
                    record: FileInfo::from(&record),
                },
                Err(e) => Response::error(&e),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: store.is_healthy().await,
                backend: store.backend(),
                stats: store.stats(),
            }
        }
    }
}
