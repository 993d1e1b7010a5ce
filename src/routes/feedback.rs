// src/routes/feedback.rs
//! Notification feedback endpoints.
//!
//! `POST /jeeves/feedback` validates the raw body and appends one entry to
//! the feedback log; `GET /jeeves/feedback/{notification_id}` returns every
//! entry recorded for a notification, oldest first.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{AppState, Error, FeedbackSubmission};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/jeeves/feedback", post(submit))
        .route("/jeeves/feedback/{notification_id}", get(history))
}

/// Handle `POST /jeeves/feedback`.
///
/// The body is parsed by hand so that every malformed request, including
/// one that is not JSON at all, gets the same 400 `{error}` shape.
async fn submit(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, Error> {
    // ---
    info!("POST /jeeves/feedback");

    let body: Value = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejecting non-JSON feedback body: {}", e);
        Error::Validation("request body must be a JSON object".to_string())
    })?;

    let submission = FeedbackSubmission::from_json(&body).inspect_err(|e| {
        warn!("Feedback rejected: {}", e);
    })?;

    let entry = state.recorder.submit(submission).await.inspect_err(|e| {
        error!("Failed to record feedback: {}", e);
    })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "notificationId": entry.notification_id,
            "helpful": entry.helpful,
            "message": "Feedback recorded. Thank you!",
        })),
    ))
}

/// Handle `GET /jeeves/feedback/{notification_id}`: the log for one
/// notification, oldest first.
async fn history(
    Path(notification_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    // ---
    debug!("GET /jeeves/feedback/{}", notification_id);

    let entries = state.recorder.history(&notification_id).await.inspect_err(|e| {
        error!("Failed to read feedback for {}: {}", notification_id, e);
    })?;

    Ok(Json(json!({
        "notificationId": notification_id,
        "feedback": entries,
    })))
}
