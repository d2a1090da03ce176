//! Framedock Binary Entry Point
//!
//! This binary runs the complete Framedock backend: HTTP API, background
//! worker, and retention sweeper. Core functionality is provided by the
//! `framedock` library crate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use clap::Parser;
use framedock::{
    AppConfig, IngestGateway, MetricsAggregator, PlaceholderAnalyzer, RetentionSweeper, Store,
    Worker,
    server::{AppState, create_router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Framedock - Edge Camera Frame Ingestion Backend
#[derive(Parser, Debug)]
#[command(name = "framedock", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "FRAMEDOCK_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "FRAMEDOCK_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "FRAMEDOCK_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database file path (overrides config file)
    #[arg(long, env = "FRAMEDOCK_DB_PATH")]
    db_path: Option<String>,

    /// Shared device credential (overrides config file)
    #[arg(long, env = "FRAMEDOCK_DEVICE_KEY")]
    device_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,framedock=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Framedock - Edge Camera Frame Ingestion Backend");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file, falling back to defaults when absent
    let mut config = if std::path::Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        AppConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file at {}, using defaults", cli.config);
        AppConfig::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(key) = cli.device_key {
        config.ingest.device_key = key;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, Database: {}",
        config.server.bind,
        config.server.port,
        config.database.path,
    );

    // Open storage (creates the parent directory when missing)
    let store = Store::open(&config.database.path, config.database.pool_size)?;
    tracing::info!("Storage initialized");

    let shutdown = Arc::new(AtomicBool::new(false));

    // Spawn background worker
    let worker = Worker::new(
        store.clone(),
        Arc::new(PlaceholderAnalyzer),
        config.worker.poll_interval,
        shutdown.clone(),
    );
    let worker_handle = worker.spawn();

    // Spawn retention sweeper
    let sweeper = RetentionSweeper::new(
        &config.ingest.staging_dir,
        &config.retention,
        shutdown.clone(),
    );
    let sweeper_handle = sweeper.spawn();

    // Create web server state
    let data_dir = std::path::Path::new(&config.database.path)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let gateway = IngestGateway::new(
        store.clone(),
        config.ingest.device_key.clone(),
        config.ingest.staging_dir.clone(),
        config.device_defaults.clone(),
    );
    let metrics = MetricsAggregator::new(store.clone(), data_dir);
    let app_state = AppState {
        gateway,
        store,
        metrics,
    };

    // Build Axum router
    let app = create_router(app_state);

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("API server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background threads and wait for the current cycles to finish
    shutdown.store(true, Ordering::Relaxed);
    join_background("worker", worker_handle);
    join_background("retention", sweeper_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}

fn join_background(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!("{name} thread panicked during shutdown");
    }
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
