//! tcpfwd: TCP port-forwarding relay.
//!
//! Listens on each configured port on the local address and relays every
//! inbound connection to the same port on the remote peer, byte-transparent
//! in both directions.

mod config;
mod error;
mod relay;

use clap::Parser;
use config::RelayConfig;
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{error, info};

/// tcpfwd — TCP port-forwarding relay
#[derive(Parser, Debug)]
#[command(name = "tcpfwd", version, about = "TCP port-forwarding relay")]
struct Cli {
    /// Local address where inbound traffic arrives
    #[arg(short = 'l', long = "local")]
    local: Option<String>,

    /// Remote peer address traffic is forwarded to
    #[arg(short = 'r', long = "remote")]
    remote: Option<String>,

    /// Comma-separated list of ports to forward
    #[arg(short = 'p', long = "ports")]
    ports: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.tcpfwd/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting tcpfwd");

    // Load relay config (file + CLI overrides); any syntax error stops the
    // process before a single listener starts.
    let config = match RelayConfig::load(
        Some(Path::new(&cli.config)),
        cli.local.as_deref(),
        cli.remote.as_deref(),
        cli.ports.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Process-wide shutdown channel; the signal handler fires it and the
    // supervisor drains every pipeline before returning.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        let _ = signal_tx.send(());
    });

    relay::supervisor::run(config, shutdown_tx).await;

    info!("tcpfwd stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
