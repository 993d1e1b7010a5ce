//! Route gateway: builds the shared state and merges every subrouter.

use std::{sync::Arc, time::Duration};

use axum::Router;

use crate::{
    AnomalyFeed, Config, FeedSettings, FeedbackRecorder, HealthEvaluator, IngestionStateTracker,
    RetryPolicy, TelemetryStore,
};

mod feedback;
mod health;
mod ingestion_state;
mod ingestion_status;
mod telemetry;

// ---

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
    pub config: Config,
    pub evaluator: HealthEvaluator,
    pub tracker: IngestionStateTracker,
    pub recorder: FeedbackRecorder,
    pub feed: AnomalyFeed,
}

impl AppState {
    // ---
    pub fn new(store: Arc<dyn TelemetryStore>, config: Config) -> Self {
        // ---
        let feed_settings = FeedSettings {
            poll_interval: Duration::from_millis(config.feed_poll_ms),
            retry: RetryPolicy {
                max_backoff_ms: config.feed_max_backoff_ms,
                ..RetryPolicy::default()
            },
            ..FeedSettings::default()
        };

        Self {
            evaluator: HealthEvaluator::new(config.recent_window()),
            tracker: IngestionStateTracker::new(store.clone(), config.ingestion_enabled_default),
            recorder: FeedbackRecorder::new(store.clone()),
            feed: AnomalyFeed::new(store.clone(), feed_settings),
            store,
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(ingestion_status::router())
        .merge(ingestion_state::router())
        .merge(feedback::router())
        .merge(telemetry::router())
        .merge(health::router())
        .with_state(state)
}
