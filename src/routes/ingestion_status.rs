// src/routes/ingestion_status.rs
//! Ingestion-health endpoint.
//!
//! Reads the flag, the recent ticks and the scope totals in one go and
//! returns the evaluated status with its one-line summary. Any store
//! failure yields a 500 and no partial status.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, response::Response, routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::health::collect_status;
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/ingestion-status", get(handler))
}

/// Handle `GET /ingestion-status`.
///
/// Reports whether unit telemetry is flowing. Store failures are logged and
/// returned as 500 with the underlying message; nothing is retried.
async fn handler(State(state): State<AppState>) -> Response {
    // ---
    info!("GET /ingestion-status");

    let scope = state.config.scope();
    let report = collect_status(
        state.store.as_ref(),
        &state.tracker,
        &state.evaluator,
        &scope,
        state.config.recent_tick_limit,
        Utc::now(),
    )
    .await;

    match report {
        Ok(report) => {
            info!(
                unit = scope.unit(),
                recent = report.status.recent_data_count,
                "Ingestion status: {}",
                report.summary
            );
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "status": report.status,
                    "summary": report.summary,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to check ingestion status: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to check ingestion status",
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
