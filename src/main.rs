//! Ad server entry point.
//!
//! Loads configuration, initializes all subsystems, and serves HTTP traffic.
//! Handles graceful shutdown on SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::signal;
use tracing::{debug, error, info};

use adserve::billing::daily_spend::DailySpendTracker;
use adserve::config::Config;
use adserve::db::pool;
use adserve::events::bus::EventBus;
use adserve::logging;
use adserve::serving::AdEngine;
use adserve::web::server::WebServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if missing)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    logging::structured::init_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.web.port,
        "adserve starting"
    );

    // Initialize database
    let db_pool = pool::create_pool(&config.database.url).await?;
    pool::run_migrations(&db_pool).await?;
    info!("database connected and migrations applied");

    // Initialize event bus and the serving core
    let event_bus = Arc::new(EventBus::new(1024));
    let tracker = Arc::new(DailySpendTracker::system());
    let engine = Arc::new(AdEngine::new(
        db_pool.clone(),
        &config,
        tracker.clone(),
        event_bus.clone(),
    ));

    // Event tap: log everything crossing the bus so serving decisions are
    // traceable without a downstream consumer attached.
    let mut event_rx = event_bus.subscribe();
    let _event_handle = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            debug!(?event, "ad event");
        }
    });

    // Spawn HTTP server (if enabled)
    let _web_handle = if config.web.enabled {
        let web_server = WebServer::new(
            config.web.clone(),
            db_pool.clone(),
            engine.clone(),
            event_bus.clone(),
            tracker.clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = web_server.start().await {
                error!(error = %e, "web server error");
            }
        }))
    } else {
        None
    };

    info!("all subsystems started, waiting for shutdown signal");

    // Wait for shutdown signal
    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => { info!("received SIGINT"); }
            _ = sigterm.recv() => { info!("received SIGTERM"); }
        }
    };

    shutdown.await;

    info!("shutdown complete");
    Ok(())
}
