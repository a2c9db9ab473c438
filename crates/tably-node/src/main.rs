//! Tably Node - serves a table repository over smart HTTP.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tably_node::api::{create_router, AppState};
use tably_node::config::{NodeConfig, StorageBackend};
use tably_node::observability::{init_logging, LogFormat};
use tably_storage::{MemoryRefStore, MemoryStore, ObjectStore, RefStore};

/// Tably Node - fetch and push endpoint for versioned tables
#[derive(Parser, Debug)]
#[command(name = "tably-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Data directory; selects the RocksDB backend
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(dir) = self.data_dir {
            config.storage.backend = StorageBackend::RocksDb;
            config.storage.path = Some(dir);
        }
        config.validate()?;
        Ok(config)
    }
}

type Stores = (Arc<dyn ObjectStore>, Arc<dyn RefStore>);

fn open_stores(config: &NodeConfig) -> anyhow::Result<Stores> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let objects: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
            let refs: Arc<dyn RefStore> = Arc::new(MemoryRefStore::new());
            Ok((objects, refs))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackend::RocksDb => {
            let path = config
                .storage
                .path
                .clone()
                .context("storage.path is required for the rocksdb backend")?;
            std::fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let db = Arc::new(tably_storage::RocksDbStore::open_default(&path)?);
            let objects: Arc<dyn ObjectStore> = db.clone();
            let refs: Arc<dyn RefStore> = db;
            Ok((objects, refs))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackend::RocksDb => {
            anyhow::bail!("this build has no rocksdb backend; rebuild with --features rocksdb-backend")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.log_level, LogFormat::parse(&config.log_format));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Tably node");
    tracing::info!(
        listen_addr = %config.listen_addr,
        backend = ?config.storage.backend,
        max_packfile_size = config.transfer.max_packfile_size,
        deny_deletes = config.transfer.deny_deletes,
        deny_non_fast_forwards = config.transfer.deny_non_fast_forwards,
        "Node configuration"
    );

    let (objects, refs) = open_stores(&config)?;
    let state = AppState::new(objects, refs, &config.transfer, config.reflog.actor());

    let sweep = config.transfer.sweep_interval();
    let upload_sweeper = state.upload_sessions.clone().spawn_sweeper(sweep);
    let receive_sweeper = state.receive_sessions.clone().spawn_sweeper(sweep);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Node is ready");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    upload_sweeper.abort();
    receive_sweeper.abort();
    tracing::info!("Tably node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
