//! Host gateway entry point: runs on the host, executes allowlisted
//! commands for the agent process.

use anyhow::Context as _;
use ciana::config::Config;
use ciana::gateway::server::{GatewayState, serve};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ciana-gateway", version)]
#[command(about = "Allowlisted host-command gateway for Ciana")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "config.yaml")]
    config: std::path::PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("configuration error")?;

    let directive = if cli.debug {
        "debug"
    } else {
        config.logging.env_filter_directive()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // A token is required: the gateway never runs open.
    let state = Arc::new(GatewayState::from_config(&config.gateway).context("gateway setup failed")?);

    tracing::info!(
        port = config.gateway.port,
        bridges = config.gateway.bridges.len(),
        "starting host gateway"
    );
    serve(state, config.gateway.port, shutdown_signal()).await?;
    tracing::info!("gateway stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
