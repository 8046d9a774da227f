//! tierstore - tiered file store daemon
//!
//! Durable bytes live in a remote object store, metadata in SQLite and
//! recently read files in a local disk cache. The daemon serves a JSON
//! control protocol over a Unix socket; the CLI commands run the same
//! core in-process.

mod cache;
mod checksum;
mod config;
mod error;
mod ipc;
mod metadata;
mod orchestrator;
mod remote;
mod sniff;
mod stats;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cache::LocalCache;
use config::{Config, RemoteTarget};
use ipc::{FileInfo, IpcServer};
use metadata::{MetadataStore, SqliteMetadataStore, Tags};
use orchestrator::{Orchestrator, StoreOptions};
use remote::{B2Store, LocalDirStore, ObjectStore};

/// How often the daemon logs its counters
const STATS_INTERVAL: Duration = Duration::from_secs(300);

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Serve,
    Upload {
        name: String,
        path: PathBuf,
        tags: Vec<String>,
    },
    Get {
        name: String,
        /// Output file, or `-` for stdout
        out: PathBuf,
    },
    Info {
        name: String,
    },
    List,
    Search {
        tag: String,
    },
    Help,
}

fn print_help() {
    eprintln!(
        r#"tierstore - tiered file store (remote objects, SQLite metadata, local cache)

USAGE:
    tierstore                            # Run IPC server (default)
    tierstore serve
    tierstore upload <name> <path> [tags...]
    tierstore get <name> <out|->
    tierstore info <name>
    tierstore list
    tierstore search <tag>
    tierstore help

COMMANDS:
    serve   Serve the JSON control protocol on a Unix socket
    upload  Store a local file under <name>; tags may be comma-separated
    get     Write the content of <name> to <out> (or stdout with -)
    info    Show the metadata record for <name>
    list    List all files
    search  List files carrying <tag> (exact, case-sensitive)
    help    Show this help message

ENVIRONMENT:
    TIERSTORE_BACKEND           b2 | local (default: b2 if B2_KEY_ID is set)
    TIERSTORE_LOCAL_DIR         Object directory for the local backend
    TIERSTORE_CACHE_DIR         Local cache root
    TIERSTORE_DB                SQLite metadata database path
    TIERSTORE_SOCKET            Control socket path (default /tmp/tierstore.sock)
    TIERSTORE_MAX_UPLOAD_BYTES  Upload size limit
    TIERSTORE_FILL_MODE         inline | background
    TIERSTORE_VERIFY_CACHE      Verify cached bytes on every hit (true/false)
    B2_KEY_ID, B2_KEY, B2_BUCKET, B2_ENDPOINT
                                B2 credentials, bucket and optional API host
    RUST_LOG                    Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Serve);
    }

    match args[1].as_str() {
        "serve" => Ok(Command::Serve),
        "upload" => {
            if args.len() < 4 {
                return Err(anyhow!("Usage: tierstore upload <name> <path> [tags...]"));
            }
            Ok(Command::Upload {
                name: args[2].clone(),
                path: PathBuf::from(&args[3]),
                tags: args[4..].to_vec(),
            })
        }
        "get" => {
            if args.len() < 4 {
                return Err(anyhow!("Usage: tierstore get <name> <out|->"));
            }
            Ok(Command::Get {
                name: args[2].clone(),
                out: PathBuf::from(&args[3]),
            })
        }
        "info" => match args.get(2) {
            Some(name) => Ok(Command::Info { name: name.clone() }),
            None => Err(anyhow!("Usage: tierstore info <name>")),
        },
        "list" => Ok(Command::List),
        "search" => match args.get(2) {
            Some(tag) => Ok(Command::Search { tag: tag.clone() }),
            None => Err(anyhow!("Usage: tierstore search <tag>")),
        },
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Wire up metadata, remote and cache tiers from configuration
async fn build_store(config: &Config) -> Result<Arc<Orchestrator>> {
    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteMetadataStore::open(&config.db_path)
            .await
            .with_context(|| {
                format!("Failed to open metadata database at {}", config.db_path.display())
            })?,
    );

    let remote: Arc<dyn ObjectStore> = match &config.remote {
        RemoteTarget::B2(settings) => Arc::new(
            B2Store::authorize(settings.clone())
                .await
                .context("Failed to authorize with B2")?,
        ),
        RemoteTarget::LocalDir { root } => Arc::new(
            LocalDirStore::new(root.clone()).with_context(|| {
                format!("Failed to open object directory {}", root.display())
            })?,
        ),
    };

    let cache = Arc::new(
        LocalCache::open(&config.cache_dir, Arc::clone(&metadata), config.verify_cache)
            .with_context(|| format!("Failed to open cache at {}", config.cache_dir.display()))?,
    );

    info!(
        backend = %remote.describe(),
        db = %config.db_path.display(),
        cache = %config.cache_dir.display(),
        fill_mode = ?config.fill_mode,
        "Store ready"
    );

    Ok(Arc::new(Orchestrator::new(
        metadata,
        remote,
        cache,
        StoreOptions {
            fill_mode: config.fill_mode,
            max_upload_bytes: config.max_upload_bytes,
        },
    )))
}

fn print_record(info: &FileInfo) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        info.record.name,
        info.record.object_key,
        info.record.upload_timestamp,
        if info.cached { "cached" } else { "-" },
        info.record.tags.to_column()
    );
}

async fn serve(config: &Config, store: Arc<Orchestrator>) -> Result<()> {
    info!("Starting tierstore daemon in IPC server mode");

    let mut ipc_server = IpcServer::new(Arc::clone(&store), &config.socket_path);
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        return Err(e);
    }
    let ipc_server = Arc::new(ipc_server);

    let ipc_handle = {
        let ipc_server = Arc::clone(&ipc_server);
        tokio::spawn(async move {
            if let Err(e) = ipc_server.run().await {
                error!(error = %e, "IPC server error");
            }
        })
    };

    let stats_handle = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.log_stats();
            }
        })
    };

    info!("Daemon ready. Waiting for commands...");

    tokio::signal::ctrl_c().await?;

    info!(
        open_connections = ipc_server.connection_count().await,
        "Received shutdown signal, stopping..."
    );
    ipc_handle.abort();
    stats_handle.abort();
    ipc_server.stop()?;
    store.log_stats();

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so CLI output on stdout stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = Config::from_env().context("Invalid configuration")?;
    let store = build_store(&config).await?;

    match command {
        Command::Serve => serve(&config, store).await?,
        Command::Upload { name, path, tags } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record = store
                .upload(&name, Bytes::from(data), Tags::from_values(&tags))
                .await?;
            print_record(&FileInfo::from(&record));
        }
        Command::Get { name, out } => {
            let retrieved = store.retrieve(&name).await?;
            if out.as_os_str() == "-" {
                std::io::stdout().write_all(&retrieved.content)?;
            } else {
                tokio::fs::write(&out, &retrieved.content)
                    .await
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                eprintln!(
                    "{} -> {} ({} bytes, {}, from {:?})",
                    name,
                    out.display(),
                    retrieved.content.len(),
                    retrieved.content_type,
                    retrieved.source
                );
            }
        }
        Command::Info { name } => {
            let record = store.get_metadata(&name).await?;
            println!("{}", serde_json::to_string_pretty(&FileInfo::from(&record))?);
        }
        Command::List => {
            let records = store.list_all().await?;
            if records.is_empty() {
                println!("No files stored.");
            }
            for record in &records {
                print_record(&FileInfo::from(record));
            }
        }
        Command::Search { tag } => {
            for record in &store.search_by_tag(&tag).await? {
                print_record(&FileInfo::from(record));
            }
        }
        Command::Help => print_help(),
    }

    Ok(())
}
