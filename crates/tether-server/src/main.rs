//! # tether
//!
//! Tether server binary: loads settings, installs logging and metrics, and
//! serves until SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_server::{ServerConfig, TetherServer};

/// Tether real-time connection server.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Tether real-time connection server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(tether_settings::settings_path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.settings_path();
    let settings = tether_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    if settings.auth.uses_default_secret() {
        tracing::warn!("using the default JWT secret; set TETHER_JWT_SECRET outside local testing");
    }

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let metrics = tether_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = TetherServer::new(config).with_metrics(metrics);

    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Tether listening on http://{addr}");

    shutdown_signal().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    if !server.shutdown(serve).await {
        tracing::warn!("Shutdown did not finish cleanly");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
