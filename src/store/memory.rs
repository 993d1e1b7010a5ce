//! In-memory [`TelemetryStore`] used by tests and local runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::TelemetryStore;
use crate::error::StoreError;
use crate::models::{
    IngestionState, NotificationFeedback, TelemetryAnomaly, TelemetryTick, UnitScope,
};

// ---

/// In-process backend with the same matching and ordering rules as
/// PostgreSQL. Can be told to fail every call to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    ticks: Mutex<Vec<TelemetryTick>>,
    anomalies: Mutex<Vec<TelemetryAnomaly>>,
    state: Mutex<Option<IngestionState>>,
    feedback: Mutex<Vec<NotificationFeedback>>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tick; a second tick with the same `(sensor_id, ts)` is ignored.
    pub async fn insert_tick(&self, tick: TelemetryTick) -> bool {
        // ---
        let mut ticks = self.ticks.lock().await;
        if ticks
            .iter()
            .any(|t| t.sensor_id == tick.sensor_id && t.ts == tick.ts)
        {
            return false;
        }
        ticks.push(tick);
        true
    }

    /// Make every subsequent store call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of trait calls served so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), StoreError> {
        // ---
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

/// Ascending window over already-sorted items: the latest `limit` when
/// `after` is `None`, else the first `limit` strictly after `after`.
fn window<T: Clone>(
    sorted: &[T],
    ts: impl Fn(&T) -> DateTime<Utc>,
    after: Option<DateTime<Utc>>,
    limit: u32,
) -> Vec<T> {
    // ---
    let limit = limit as usize;
    match after {
        Some(after) => sorted
            .iter()
            .filter(|item| ts(*item) > after)
            .take(limit)
            .cloned()
            .collect(),
        None => {
            let start = sorted.len().saturating_sub(limit);
            sorted[start..].to_vec()
        }
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    // ---
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn recent_ticks(
        &self,
        scope: &UnitScope,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TelemetryTick>, StoreError> {
        // ---
        self.check()?;
        let mut recent: Vec<TelemetryTick> = self
            .ticks
            .lock()
            .await
            .iter()
            .filter(|t| scope.matches(&t.sensor_id) && t.ts > since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.ts.cmp(&a.ts));
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn count_ticks(&self, scope: &UnitScope) -> Result<i64, StoreError> {
        // ---
        self.check()?;
        let ticks = self.ticks.lock().await;
        Ok(ticks.iter().filter(|t| scope.matches(&t.sensor_id)).count() as i64)
    }

    async fn distinct_streams(&self, scope: &UnitScope) -> Result<Vec<String>, StoreError> {
        // ---
        self.check()?;
        let mut streams: Vec<String> = self
            .ticks
            .lock()
            .await
            .iter()
            .filter(|t| scope.matches(&t.sensor_id))
            .map(|t| t.sensor_id.clone())
            .collect();
        streams.sort();
        streams.dedup();
        Ok(streams)
    }

    async fn ticks_for(
        &self,
        sensor_id: &str,
        after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TelemetryTick>, StoreError> {
        // ---
        self.check()?;
        let mut ticks: Vec<TelemetryTick> = self
            .ticks
            .lock()
            .await
            .iter()
            .filter(|t| t.sensor_id == sensor_id)
            .cloned()
            .collect();
        ticks.sort_by_key(|t| t.ts);
        Ok(window(&ticks, |t| t.ts, after, limit))
    }

    async fn anomalies_for(
        &self,
        sensor_id: &str,
        after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TelemetryAnomaly>, StoreError> {
        // ---
        self.check()?;
        let mut anomalies: Vec<TelemetryAnomaly> = self
            .anomalies
            .lock()
            .await
            .iter()
            .filter(|a| a.sensor_id == sensor_id)
            .cloned()
            .collect();
        anomalies.sort_by_key(|a| a.ts);
        Ok(window(&anomalies, |a| a.ts, after, limit))
    }

    async fn insert_anomaly(&self, anomaly: &TelemetryAnomaly) -> Result<bool, StoreError> {
        // ---
        self.check()?;
        let mut anomalies = self.anomalies.lock().await;
        if anomalies
            .iter()
            .any(|a| a.sensor_id == anomaly.sensor_id && a.ts == anomaly.ts)
        {
            return Ok(false);
        }
        anomalies.push(anomaly.clone());
        Ok(true)
    }

    async fn ingestion_state(&self) -> Result<Option<IngestionState>, StoreError> {
        self.check()?;
        Ok(*self.state.lock().await)
    }

    async fn set_ingestion_state(&self, state: IngestionState) -> Result<(), StoreError> {
        self.check()?;
        *self.state.lock().await = Some(state);
        Ok(())
    }

    async fn append_feedback(&self, feedback: &NotificationFeedback) -> Result<(), StoreError> {
        self.check()?;
        self.feedback.lock().await.push(feedback.clone());
        Ok(())
    }

    async fn feedback_for(
        &self,
        notification_id: &str,
    ) -> Result<Vec<NotificationFeedback>, StoreError> {
        // ---
        self.check()?;
        Ok(self
            .feedback
            .lock()
            .await
            .iter()
            .filter(|f| f.notification_id == notification_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 3, 10, minute, 0).unwrap()
    }

    fn tick(sensor_id: &str, minute: u32, value: f64) -> TelemetryTick {
        // ---
        TelemetryTick {
            sensor_id: sensor_id.to_string(),
            ts: at(minute),
            value,
        }
    }

    async fn seeded() -> MemoryStore {
        // ---
        let store = MemoryStore::new();
        for (sensor, minute) in [
            ("fcu-201-temp", 1),
            ("fcu-201-temp", 3),
            ("fcu-201-temp", 2),
            ("fcu-201-fan", 4),
            ("fcu-2010-x", 5),
            ("fcu-202-temp", 6),
        ] {
            store.insert_tick(tick(sensor, minute, 20.0)).await;
        }
        store
    }

    #[tokio::test]
    async fn test_scope_queries_use_segment_matching() {
        // ---
        let store = seeded().await;
        let scope = UnitScope::new("fcu-201");

        assert_eq!(store.count_ticks(&scope).await.unwrap(), 4);
        assert_eq!(
            store.distinct_streams(&scope).await.unwrap(),
            vec!["fcu-201-fan".to_string(), "fcu-201-temp".to_string()]
        );

        let recent = store
            .recent_ticks(&scope, at(0), 10)
            .await
            .unwrap();
        let minutes: Vec<DateTime<Utc>> = recent.iter().map(|t| t.ts).collect();
        assert_eq!(minutes, vec![at(4), at(3), at(2), at(1)]);
    }

    #[tokio::test]
    async fn test_recent_ticks_respects_since_and_limit() {
        // ---
        let store = seeded().await;
        let scope = UnitScope::new("fcu-201");

        let recent = store.recent_ticks(&scope, at(2), 10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let capped = store
            .recent_ticks(&scope, at(0) - Duration::hours(1), 1)
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].ts, at(4));
    }

    #[tokio::test]
    async fn test_ticks_for_windows_ascending() {
        // ---
        let store = seeded().await;

        let latest = store.ticks_for("fcu-201-temp", None, 2).await.unwrap();
        assert_eq!(
            latest.iter().map(|t| t.ts).collect::<Vec<_>>(),
            vec![at(2), at(3)]
        );

        let after = store
            .ticks_for("fcu-201-temp", Some(at(1)), 10)
            .await
            .unwrap();
        assert_eq!(
            after.iter().map(|t| t.ts).collect::<Vec<_>>(),
            vec![at(2), at(3)]
        );
    }

    #[tokio::test]
    async fn test_duplicate_identities_are_ignored() {
        // ---
        let store = MemoryStore::new();
        assert!(store.insert_tick(tick("fcu-201-temp", 1, 20.0)).await);
        assert!(!store.insert_tick(tick("fcu-201-temp", 1, 99.0)).await);

        let anomaly = TelemetryAnomaly {
            sensor_id: "fcu-201-temp".to_string(),
            ts: at(1),
            value: 20.0,
            score: 0.8,
            ts_detected: at(2),
        };
        assert!(store.insert_anomaly(&anomaly).await.unwrap());

        let rescored = TelemetryAnomaly {
            score: 0.1,
            ..anomaly.clone()
        };
        assert!(!store.insert_anomaly(&rescored).await.unwrap());

        let stored = store.anomalies_for("fcu-201-temp", None, 10).await.unwrap();
        assert_eq!(stored, vec![anomaly]);
    }

    #[tokio::test]
    async fn test_failing_store_reports_unavailable() {
        // ---
        let store = seeded().await;
        store.set_failing(true);

        let err = store
            .count_ticks(&UnitScope::new("fcu-201"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_failing(false);
        assert!(store.count_ticks(&UnitScope::new("fcu-201")).await.is_ok());
        assert_eq!(store.calls(), 2);
    }
}
