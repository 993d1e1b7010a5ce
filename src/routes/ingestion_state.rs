// src/routes/ingestion_state.rs
//! Operator switch for ingestion: read and write the `ingestionEnabled` flag.

use axum::{extract::State, routing::get, Json, Router};
use tracing::{error, info};

use crate::{AppState, Error, IngestionState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/ingestion-state", get(current).put(update))
}

async fn current(State(state): State<AppState>) -> Result<Json<IngestionState>, Error> {
    // ---
    let current = state.tracker.get().await.inspect_err(|e| {
        error!("Failed to read ingestion state: {}", e);
    })?;
    Ok(Json(current))
}

/// Operator toggle for the ingestion flag.
async fn update(
    State(state): State<AppState>,
    Json(body): Json<IngestionState>,
) -> Result<Json<IngestionState>, Error> {
    // ---
    info!("PUT /ingestion-state ingestionEnabled={}", body.ingestion_enabled);

    let updated = state
        .tracker
        .set(body.ingestion_enabled)
        .await
        .inspect_err(|e| {
            error!("Failed to update ingestion state: {}", e);
        })?;
    Ok(Json(updated))
}
