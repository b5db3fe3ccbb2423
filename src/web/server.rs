//! Axum HTTP server exposing the serving, click, and RTB endpoints.

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tracing::info;

use crate::billing::daily_spend::DailySpendTracker;
use crate::config::WebConfig;
use crate::events::bus::EventBus;
use crate::serving::AdEngine;

use super::routes;

/// Shared state for all web routes.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub engine: Arc<AdEngine>,
    pub events: Arc<EventBus>,
    pub tracker: Arc<DailySpendTracker>,
}

/// Public-facing HTTP server: ad delivery, click tracking, RTB, status.
pub struct WebServer {
    config: WebConfig,
    state: AppState,
}

impl WebServer {
    pub fn new(
        config: WebConfig,
        db: PgPool,
        engine: Arc<AdEngine>,
        events: Arc<EventBus>,
        tracker: Arc<DailySpendTracker>,
    ) -> Self {
        Self {
            config,
            state: AppState {
                db,
                engine,
                events,
                tracker,
            },
        }
    }

    /// Start the HTTP server.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = Router::new()
            .merge(routes::api_routes())
            .with_state(self.state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.port));
        info!(port = self.config.port, "ad server listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
