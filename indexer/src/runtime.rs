//! Startup connection checks and the shared shutdown signal.

use color_eyre::Result;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::config::Config;

/// Verifies the broker (PING) and relational store (trivial SELECT) are
/// reachable before any worker starts reading from its stream.
pub async fn check_connections(pool: &sqlx::PgPool, broker: &mut BrokerClient) -> Result<()> {
    broker.ping().await?;
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Spawns a task that cancels the returned token on SIGINT or SIGTERM.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler failed");
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler failed");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }

        signal_token.cancel();
    });

    token
}

/// Runs every task to completion, but once shutdown fires gives them only
/// `config.shutdown_timeout` to finish draining before aborting survivors.
pub async fn join_with_graceful_shutdown(
    config: &Config,
    shutdown: &CancellationToken,
    tasks: Vec<JoinHandle<()>>,
) {
    shutdown.cancelled().await;
    info!(timeout = ?config.shutdown_timeout, "graceful shutdown window started");

    let all = futures::future::join_all(tasks);
    match tokio::time::timeout(config.shutdown_timeout, all).await {
        Ok(_) => info!("all workers drained cleanly"),
        Err(_) => warn!("graceful shutdown timeout elapsed, survivors will be dropped"),
    }
}
