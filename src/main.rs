/// Vaultkeep - personal credential and subscription tracker
///
/// Keeps a private record of the platforms a person has signed up to, the
/// email accounts and usernames used there, and the paid subscriptions
/// attached to those sign-ups, with reminders ahead of each renewal.

mod account;
mod api;
mod auth;
mod clock;
mod config;
mod context;
mod crypto;
mod db;
mod error;
mod importer;
mod jobs;
mod metrics;
mod patch;
mod registry;
mod reminders;
mod server;
mod subscription;
mod validation;

use config::ServerConfig;
use context::AppContext;
use error::VaultResult;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> VaultResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vaultkeep=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Vaultkeep v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env()?;

    // Flipped on Ctrl-C; running imports stop between records
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = AppContext::new(config, shutdown_rx).await?;

    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::new(ctx.clone())));
    scheduler.start();

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    };

    server::serve(ctx, shutdown).await?;

    Ok(())
}
