use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use battle_core::{ChallengeCatalog, Clock, SystemClock};
use battle_persistence::open_store;
use battle_server::{
    config::Config,
    create_routes,
    lobby::BattleLobby,
    websocket::{ConnectionManager, rate_limiter::RateLimiter},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Code Battle server...");

    let config = Config::from_env().context("Invalid configuration")?;

    let catalog = match &config.challenges_file {
        Some(path) => {
            info!("Loading challenges from {}", path.display());
            ChallengeCatalog::from_file(path).map_err(|e| {
                error!("Failed to load challenges from '{}': {}", path.display(), e);
                e
            })?
        }
        None => {
            info!("CHALLENGES_FILE not set, using the built-in challenges");
            ChallengeCatalog::with_default_challenges()
        }
    };
    info!("Loaded {} challenges", catalog.len());

    // Initialize the battle store, running migrations when it is backed by a database
    let store = match open_store(config.database_url.as_deref()).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open battle store: {}", e);
            return Err(e);
        }
    };
    if config.database_url.is_none() {
        warn!("DATABASE_URL not set, battles are kept in memory only");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let connection_manager = Arc::new(ConnectionManager::new());
    let lobby = Arc::new(BattleLobby::new(
        store.clone(),
        Arc::new(catalog),
        clock.clone(),
        config.tick_interval,
    ));

    let routes = create_routes(
        connection_manager.clone(),
        lobby.clone(),
        RateLimiter::new_with_limits(config.rate_limit_burst, config.rate_limit_refill),
    );

    // Start cleanup task
    let cleanup_connection_manager = connection_manager.clone();
    let cleanup_lobby = lobby.clone();
    let connection_timeout = Duration::from_secs(config.connection_timeout_seconds);
    let retention = chrono::Duration::seconds(config.finished_retention_seconds as i64);
    let cleanup_interval = Duration::from_secs(config.cleanup_interval_seconds);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;

            cleanup_connection_manager
                .cleanup_inactive_connections(connection_timeout)
                .await;

            let drivers = cleanup_lobby.cleanup_finished_drivers();
            if drivers > 0 {
                info!("Released {} finished battle drivers", drivers);
            }

            match store.prune_finished(clock.now() - retention).await {
                Ok(0) => {}
                Ok(pruned) => info!("Pruned {} finished battles", pruned),
                Err(e) => warn!("Failed to prune finished battles: {}", e),
            }
        }
    });

    info!("Server starting on {}:{}", config.host, config.port);

    let addr = (
        config
            .host
            .parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid HOST: {}", config.host))?,
        config.port,
    );

    let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
        shutdown_signal().await;
    })?;

    info!(
        "Server started successfully on {}. Press Ctrl+C to stop.",
        addr
    );
    server.await;
    info!("Server shutdown complete.");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let (Ok(mut sigint), Ok(mut sigterm)) = (
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
            signal::unix::signal(signal::unix::SignalKind::terminate()),
        ) else {
            error!("Failed to install signal handlers, falling back to Ctrl+C");
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    }
}
