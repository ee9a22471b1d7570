//! Lectern Server - standalone headless media server.
//!
//! Serves a JSON audiobook catalog to remote controllers and drives a
//! headless playback engine. Runs as a background daemon.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lectern_core::{
    bootstrap_services, start_server, HeadlessEngine, HostServices, InMemoryLibrary,
    LibraryRepository, LocalFocusBroker,
};
use tokio::signal;

use crate::config::ServerConfig;

/// How long open connections may delay shutdown.
const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Lectern Server - audiobook browsing and playback for remote controllers.
#[derive(Parser, Debug)]
#[command(name = "lectern-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LECTERN_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "LECTERN_BIND_PORT")]
    port: Option<u16>,

    /// JSON catalog to serve (overrides config file).
    #[arg(long, value_name = "FILE", env = "LECTERN_LIBRARY_PATH")]
    library: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Lectern Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(library) = args.library {
        config.library_path = Some(library);
    }

    log::info!(
        "Configuration: bind_port={}, library={}",
        config.bind_port,
        config
            .library_path
            .as_deref()
            .map_or_else(|| "<empty>".to_string(), |p| p.display().to_string())
    );

    let library = match config.library_path {
        Some(ref path) => InMemoryLibrary::load(path)
            .await
            .with_context(|| format!("Failed to load library: {}", path.display()))?,
        None => {
            log::warn!("No library configured - serving an empty catalog");
            InMemoryLibrary::default()
        }
    };
    let library: Arc<dyn LibraryRepository> = Arc::new(library);

    let core_config = config.to_core_config();
    let engine = Arc::new(HeadlessEngine::new());
    let services = bootstrap_services(
        &core_config,
        HostServices {
            library,
            engine: engine.clone(),
            broker: Arc::new(LocalFocusBroker),
        },
    )
    .context("Failed to bootstrap services")?;

    engine.start(
        &services.spawner,
        core_config.position_publish_interval(),
        services.cancel_token.child_token(),
    );

    log::info!("Services bootstrapped successfully");

    let server_cancel = services.cancel_token.clone();
    let app_state = services.state.clone();
    let mut server_handle = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(e) = start_server(app_state, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;

    // The cancelled token started a graceful shutdown; SSE subscribers can
    // hold it open, so give up after a grace period.
    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    if tokio::time::timeout(grace, &mut server_handle).await.is_err() {
        log::warn!("Server did not drain within {}s, aborting", SHUTDOWN_GRACE_SECS);
        server_handle.abort();
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
