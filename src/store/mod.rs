//! Telemetry store adapter.
//!
//! The pipeline only talks to storage through [`TelemetryStore`]. Two
//! backends exist: [`PgTelemetryStore`] for PostgreSQL and [`MemoryStore`]
//! for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    IngestionState, NotificationFeedback, TelemetryAnomaly, TelemetryTick, UnitScope,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgTelemetryStore;

// ---

/// Keyed time-series storage reachable by time range and key prefix.
///
/// Every read is bounded by the backend's own timeout policy; callers never
/// retry inside a request.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    // ---
    fn backend_tag(&self) -> &'static str;

    /// Ticks in `scope` newer than `since`, newest first, at most `limit`.
    async fn recent_ticks(
        &self,
        scope: &UnitScope,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TelemetryTick>, StoreError>;

    /// Total number of ticks in `scope`.
    async fn count_ticks(&self, scope: &UnitScope) -> Result<i64, StoreError>;

    /// Distinct sensor ids in `scope`, sorted ascending.
    async fn distinct_streams(&self, scope: &UnitScope) -> Result<Vec<String>, StoreError>;

    /// Ticks for one sensor in ascending `ts` order.
    ///
    /// With `after = None` this is the latest `limit` ticks; otherwise the
    /// first `limit` ticks strictly after `after`.
    async fn ticks_for(
        &self,
        sensor_id: &str,
        after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TelemetryTick>, StoreError>;

    /// Anomalies for one sensor, same windowing rules as [`Self::ticks_for`].
    async fn anomalies_for(
        &self,
        sensor_id: &str,
        after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TelemetryAnomaly>, StoreError>;

    /// Record a scored tick. Returns `false` when one already exists for the
    /// same `(sensor_id, ts)`; anomalies are never overwritten.
    async fn insert_anomaly(&self, anomaly: &TelemetryAnomaly) -> Result<bool, StoreError>;

    /// The singleton ingestion row, if an operator ever wrote it.
    async fn ingestion_state(&self) -> Result<Option<IngestionState>, StoreError>;

    async fn set_ingestion_state(&self, state: IngestionState) -> Result<(), StoreError>;

    async fn append_feedback(&self, feedback: &NotificationFeedback) -> Result<(), StoreError>;

    /// All feedback for a notification, in submission order.
    async fn feedback_for(
        &self,
        notification_id: &str,
    ) -> Result<Vec<NotificationFeedback>, StoreError>;
}
