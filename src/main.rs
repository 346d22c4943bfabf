//! Studio bridge service binary.
//!
//! Wires configuration, the bridge and signal handling into a
//! long-running process. Logging honors `RUST_LOG`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use studio_bridge::{Bridge, BridgeConfig};

// ============================================================================
// Constants
// ============================================================================

/// How long shutdown waits for in-flight work before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting studio bridge");

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    info!(studio_addr = %config.studio_addr, "Configuration loaded");

    let bridge = Bridge::new(config).context("failed to assemble the bridge")?;
    bridge.start();

    tokio::select! {
        outcome = bridge.run() => {
            outcome.context("bridge stopped with a fatal error")?;
            info!("Bridge stopped");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, starting graceful shutdown");
            bridge.shutdown(SHUTDOWN_GRACE).await;
        }
    }

    info!("Studio bridge shutdown complete");
    Ok(())
}

// ============================================================================
// Functions
// ============================================================================

/// Initializes tracing from `RUST_LOG`, with a sensible default.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,studio_bridge=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolves on CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
