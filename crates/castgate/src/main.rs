//! # castgate
//!
//! Gateway binary: loads settings, wires the RPC backend, and starts the
//! `WebSocket` + broadcast server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use castgate_core::logging::init_subscriber;
use castgate_rpc::HttpBackend;
use castgate_server::server::CastgateServer;
use castgate_settings::{GatewaySettings, load_settings};
use clap::Parser;

/// Real-time message gateway.
#[derive(Parser, Debug)]
#[command(name = "castgate", about = "Real-time WebSocket message gateway")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Backend RPC endpoint (overrides settings).
    #[arg(long)]
    rpc_url: Option<String>,

    /// Broadcast shared secret (overrides settings).
    #[arg(long)]
    broadcast_secret: Option<String>,
}

impl Cli {
    /// Apply CLI flags over loaded settings.
    fn apply(self, settings: &mut GatewaySettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = self.rpc_url {
            settings.rpc.url = url;
        }
        if let Some(secret) = self.broadcast_secret {
            settings.broadcast.secret = Some(secret);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = load_settings(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics_handle = castgate_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let backend = Arc::new(HttpBackend::new(settings.rpc.url.clone()));
    let drain_timeout = Duration::from_secs(settings.server.shutdown_timeout_secs);

    let server = CastgateServer::new(settings, backend, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "castgate listening on ws://{addr}{} (rpc: {})",
        server.settings().server.path,
        server.settings().rpc.url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(server.registry(), vec![handle], Some(drain_timeout))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
