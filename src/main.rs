//! Application entry point for the `jeeves-telemetry` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `JEEVES_DATABASE_URL` / `DATABASE_URL` (**one required**) – PostgreSQL
//!   connection string; the first wins
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `BIND_ADDR` (optional) – listen address (default: `0.0.0.0:8080`)
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining knobs.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use jeeves_telemetry::{
    config::{self, mask_db_url},
    logging, routes, schema, AppState, PgTelemetryStore, TelemetryStore,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    logging::init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let masked_url = mask_db_url(&cfg.db_url);
    tracing::info!("Attempting to connect to database: {}", masked_url);

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .acquire_timeout(cfg.query_timeout())
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow!("Failed to connect to database '{}': {}", masked_url, e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgTelemetryStore::new(pool, cfg.query_timeout()));
    tracing::info!("Telemetry store backend: {}", store.backend_tag());
    let addr = cfg.bind_addr;

    // Build app from routes gateway (EMBP)
    let app = routes::router(AppState::new(store, cfg));

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
