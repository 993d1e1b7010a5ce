//! Ingestion health evaluation.
//!
//! [`HealthEvaluator::evaluate`] is pure: it turns the three store reads and
//! the ingestion flag into a [`HealthStatus`] and a one-line summary.
//! [`collect_status`] performs the reads and feeds the evaluator.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::ingestion::IngestionStateTracker;
use crate::models::{TelemetryTick, UnitScope};
use crate::store::TelemetryStore;

/// How many stream ids the short `streams` list carries.
pub const DISPLAY_STREAMS: usize = 10;

// ---

/// Snapshot returned by `GET /ingestion-status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    // ---
    pub ingestion_enabled: bool,
    pub has_recent_data: bool,
    pub last_data_point: Option<TelemetryTick>,
    pub recent_data_count: usize,
    /// Rendered as a string, matching what the panel already parses.
    pub total_data_points: String,
    pub stream_count: usize,
    pub streams: Vec<String>,
    pub all_streams: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Status plus its human summary.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub summary: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthEvaluator {
    window: Duration,
}

impl HealthEvaluator {
    // ---
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Build the status from complete inputs.
    ///
    /// Only ticks with `ts > now - window` count, whatever the caller passed.
    /// Summary precedence is strict: recent data, then enabled-but-stale,
    /// then disabled.
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        ingestion_enabled: bool,
        recent_ticks: Vec<TelemetryTick>,
        total_count: i64,
        distinct_streams: Vec<String>,
    ) -> HealthReport {
        // ---
        let cutoff = now - self.window;
        let recent: Vec<TelemetryTick> = recent_ticks
            .into_iter()
            .filter(|t| t.ts > cutoff)
            .collect();

        let has_recent_data = !recent.is_empty();
        let recent_data_count = recent.len();
        let last_data_point = recent.into_iter().max_by_key(|t| t.ts);

        let streams: Vec<String> = distinct_streams
            .iter()
            .take(DISPLAY_STREAMS)
            .cloned()
            .collect();

        let summary = self.summary(has_recent_data, ingestion_enabled, recent_data_count);

        HealthReport {
            status: HealthStatus {
                ingestion_enabled,
                has_recent_data,
                last_data_point,
                recent_data_count,
                total_data_points: total_count.to_string(),
                stream_count: distinct_streams.len(),
                streams,
                all_streams: distinct_streams,
                timestamp: now,
            },
            summary,
        }
    }

    fn summary(&self, has_recent_data: bool, ingestion_enabled: bool, count: usize) -> String {
        // ---
        let mins = self.window.num_minutes();
        if has_recent_data {
            format!("✅ Data is flowing: {count} data points in the last {mins} minutes")
        } else if ingestion_enabled {
            format!("⚠️ Ingestion is enabled but no data has arrived in the last {mins} minutes")
        } else {
            "⏸️ Ingestion is disabled".to_string()
        }
    }
}

/// Read everything the evaluator needs and evaluate it.
///
/// The three telemetry reads are issued concurrently; the first failure
/// aborts the whole status so no partial report is ever produced.
#[instrument(skip_all, fields(unit = scope.unit()))]
pub async fn collect_status(
    store: &dyn TelemetryStore,
    tracker: &IngestionStateTracker,
    evaluator: &HealthEvaluator,
    scope: &UnitScope,
    recent_limit: u32,
    now: DateTime<Utc>,
) -> Result<HealthReport> {
    // ---
    let since = now - evaluator.window();

    let (recent, total, streams) = tokio::try_join!(
        store.recent_ticks(scope, since, recent_limit),
        store.count_ticks(scope),
        store.distinct_streams(scope),
    )?;
    let state = tracker.get().await?;

    debug!(
        recent = recent.len(),
        total,
        streams = streams.len(),
        ingestion_enabled = state.ingestion_enabled,
        "Health inputs collected"
    );

    Ok(evaluator.evaluate(now, state.ingestion_enabled, recent, total, streams))
}
