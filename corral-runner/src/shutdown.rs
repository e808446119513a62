//! Process signals

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels the returned token on SIGTERM or SIGINT
///
/// Everything that runs until shutdown watches this token: the fleet
/// controller, the health monitor, the token refresh loop and the status
/// API.
pub fn install_shutdown_handler() -> anyhow::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        trigger.cancel();
    });

    Ok(token)
}
