// src/routes/telemetry.rs
//! Per-sensor telemetry endpoints: the anomaly write path used by the
//! scorer, a one-shot snapshot, and the live WebSocket feed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::try_join;
use tracing::{debug, error, info};

use crate::feed::{Subscription, MAX_ANOMALIES, MAX_POINTS};
use crate::{AppState, Error, FeedWindow, NewAnomaly};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/telemetry/anomalies", post(record_anomaly))
        .route("/telemetry/{sensor_id}", get(snapshot))
        .route("/telemetry/{sensor_id}/live", get(live))
}

/// Query parameters for the one-shot snapshot.
#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    points: Option<u32>,
    anomalies: Option<u32>,
}

/// Handle `GET /telemetry/{sensor_id}`: the latest points and anomalies,
/// oldest first, sized like the live panel by default.
async fn snapshot(
    Path(sensor_id): Path<String>,
    Query(params): Query<SnapshotQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    // ---
    debug!("GET /telemetry/{} {:?}", sensor_id, params);

    let points_limit = params.points.unwrap_or(MAX_POINTS as u32).min(1000);
    let anomalies_limit = params.anomalies.unwrap_or(MAX_ANOMALIES as u32).min(1000);

    let (points, anomalies) = try_join!(
        state.store.ticks_for(&sensor_id, None, points_limit),
        state.store.anomalies_for(&sensor_id, None, anomalies_limit),
    )
    .inspect_err(|e| error!("Failed to read telemetry for {}: {}", sensor_id, e))?;

    Ok(Json(json!({
        "sensorId": sensor_id,
        "points": points,
        "anomalies": anomalies,
    })))
}

/// Anomaly write path used by the external scorer.
///
/// Returns 201 when recorded, 200 with `inserted: false` when that tick was
/// already scored.
async fn record_anomaly(
    State(state): State<AppState>,
    Json(body): Json<NewAnomaly>,
) -> Result<impl IntoResponse, Error> {
    // ---
    if body.sensor_id.trim().is_empty() {
        return Err(Error::Validation("sensorId is required".to_string()));
    }
    if !body.score.is_finite() || !body.value.is_finite() {
        return Err(Error::Validation("score and value must be finite".to_string()));
    }

    let anomaly = body.detected_at(Utc::now());
    let inserted = state
        .store
        .insert_anomaly(&anomaly)
        .await
        .inspect_err(|e| error!("Failed to record anomaly: {}", e))?;

    info!(
        sensor_id = %anomaly.sensor_id,
        score = anomaly.score,
        inserted,
        "Anomaly received"
    );

    let status = if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "inserted": inserted }))))
}

#[derive(Debug, Deserialize)]
struct LiveQuery {
    persona: Option<String>,
}

/// Handle `GET /telemetry/{sensor_id}/live`: upgrade to a WebSocket and
/// stream the feed. Every frame is the panel's full window.
async fn live(
    ws: WebSocketUpgrade,
    Path(sensor_id): Path<String>,
    Query(params): Query<LiveQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let subscription = state.feed.subscribe(sensor_id, params.persona);
    ws.on_upgrade(move |socket| stream_feed(socket, subscription))
}

async fn stream_feed(mut socket: WebSocket, mut subscription: Subscription) {
    // ---
    let sensor_id = subscription.sensor_id().to_string();
    let persona = subscription.persona().map(str::to_string);
    let mut window = FeedWindow::new();

    subscription.start();

    loop {
        tokio::select! {
            update = subscription.next() => {
                let Some(update) = update else { break };
                window.apply(update);

                let frame = match serde_json::to_string(&window.snapshot(&sensor_id, persona.as_deref())) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to encode feed frame for {}: {}", sensor_id, e);
                        break;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    debug!("Live client for {} went away", sensor_id);
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    subscription.stop().await;
    info!("Live feed for {} closed", sensor_id);
}
