//! Authoritative simulation server.

use server::{run_tick_loop, Config, World};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Game server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Tick rate: {} Hz", config.simulation.tick_rate);
    info!("  Visibility radius: {}", config.interest.visibility_radius);
    info!("  Mirrors: {}", config.mirrors.enabled);

    let world = Arc::new(World::new(&config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tick_loop = tokio::spawn(run_tick_loop(
        Arc::clone(&world),
        config.simulation.clone(),
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => {
                // Keep the sender alive; dropping it would stop the server.
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    // Start the connection listener
    server::run(&config, world, shutdown_rx).await?;
    tick_loop.await?;

    Ok(())
}
