//! pocket-tunnel background service daemon
//!
//! Hosts the background coordinator and exposes it to UI clients over the
//! localhost IPC port.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pt_core::config::{self, ServiceConfig};
use pt_service::ipc::IpcServer;
use pt_service::{ServiceHost, UiBridge};
use pt_tunnel::{OriginProbeEngine, ProcessRegistry};

#[derive(Parser)]
#[command(name = "pt-service")]
#[command(about = "pocket-tunnel background service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(long, env = "PT_IPC_PORT")]
    ipc_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace); defaults to the config
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_note) = load_config(args.config.as_ref())?;
    if let Some(port) = args.ipc_port {
        config.ipc.port = port;
    }

    // Initialize logging
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(log_level),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pocket-tunnel service {} starting...", pt_core::VERSION);
    tracing::info!("{}", config_note);

    let registry = ProcessRegistry::global();
    let engine = Arc::new(OriginProbeEngine::new(
        config.tunnel.probe.clone(),
        registry.clone(),
    ));
    let host = ServiceHost::new(engine, registry, config.clone());
    let bridge = UiBridge::new(host.clone());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let server = IpcServer::new(config.ipc_address(), bridge).with_shutdown_token(cancel.clone());
    let result = server.run().await;

    tracing::info!("Stopping background service...");
    host.shutdown().await;

    result?;
    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Load the config file, returning a note to log once logging is up
fn load_config(path: Option<&PathBuf>) -> Result<(ServiceConfig, String)> {
    if let Some(config_path) = path {
        let config = config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?;
        return Ok((config, format!("Loaded config from {:?}", config_path)));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        match config::load_config(&default_path) {
            Ok(config) => Ok((config, format!("Loaded config from {:?}", default_path))),
            Err(e) => Ok((
                ServiceConfig::default(),
                format!("Failed to load config from {:?}: {}, using defaults", default_path, e),
            )),
        }
    } else {
        Ok((
            ServiceConfig::default(),
            "Using default configuration".to_string(),
        ))
    }
}
