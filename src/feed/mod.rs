//! Live telemetry and anomaly feed.
//!
//! Each [`Subscription`] owns one worker task that polls the store for a
//! single sensor and pushes [`FeedUpdate`]s over a channel. Subscriptions
//! share nothing but the store, so any number of consumers can watch the
//! same sensor.
//!
//! Store failures never end a subscription: the worker reports `error`,
//! backs off, reconnects and resumes from its cursor. Only [`Subscription::stop`]
//! (or dropping the subscription) ends it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{TelemetryAnomaly, TelemetryTick};
use crate::store::TelemetryStore;

mod status;
mod window;

pub use status::FeedStatus;
pub use window::{FeedWindow, MAX_ANOMALIES, MAX_POINTS};

/// Updates buffered between a worker and a slow consumer.
const UPDATE_BUFFER: usize = 16;

// ---

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given zero-based attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        // ---
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub poll_interval: Duration,
    /// Points fetched on the first poll.
    pub backfill_points: u32,
    /// Anomalies fetched on the first poll.
    pub backfill_anomalies: u32,
    /// Upper bound per incremental poll.
    pub batch_limit: u32,
    pub retry: RetryPolicy,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            backfill_points: MAX_POINTS as u32,
            backfill_anomalies: MAX_ANOMALIES as u32,
            batch_limit: 500,
            retry: RetryPolicy::default(),
        }
    }
}

/// One increment pushed to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedUpdate {
    pub sensor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub points: Vec<TelemetryTick>,
    pub anomalies: Vec<TelemetryAnomaly>,
    pub status: FeedStatus,
}

/// Entry point for subscriptions.
#[derive(Clone)]
pub struct AnomalyFeed {
    store: Arc<dyn TelemetryStore>,
    settings: FeedSettings,
}

impl AnomalyFeed {
    // ---
    pub fn new(store: Arc<dyn TelemetryStore>, settings: FeedSettings) -> Self {
        Self { store, settings }
    }

    /// A new, idle subscription for `sensor_id`. Nothing runs until
    /// [`Subscription::start`].
    pub fn subscribe(&self, sensor_id: impl Into<String>, persona: Option<String>) -> Subscription {
        // ---
        let (status_tx, _) = watch::channel(FeedStatus::Idle);
        Subscription {
            sensor_id: sensor_id.into(),
            persona,
            store: self.store.clone(),
            settings: self.settings.clone(),
            status: Arc::new(status_tx),
            updates: None,
            cancel: None,
            worker: None,
        }
    }
}

/// Move `status` to `next` if the state machine allows it.
///
/// Done inside the watch lock, so a worker can never overwrite `stopped`.
fn transition(status: &watch::Sender<FeedStatus>, next: FeedStatus) -> bool {
    // ---
    status.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            false
        }
    })
}

pub struct Subscription {
    sensor_id: String,
    persona: Option<String>,
    store: Arc<dyn TelemetryStore>,
    settings: FeedSettings,
    status: Arc<watch::Sender<FeedStatus>>,
    updates: Option<mpsc::Receiver<FeedUpdate>>,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    // ---
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn persona(&self) -> Option<&str> {
        self.persona.as_deref()
    }

    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    /// Spawn the worker. A stopped subscription re-enters `idle` first and
    /// starts over with a fresh cursor; a running one is left alone.
    pub fn start(&mut self) {
        // ---
        if self.worker.is_some() {
            return;
        }
        if self.status() == FeedStatus::Stopped {
            transition(&self.status, FeedStatus::Idle);
        }
        transition(&self.status, FeedStatus::Connecting);

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let cancel = CancellationToken::new();
        let worker = FeedWorker {
            sensor_id: self.sensor_id.clone(),
            persona: self.persona.clone(),
            store: self.store.clone(),
            settings: self.settings.clone(),
            status: self.status.clone(),
            updates: tx,
            cancel: cancel.clone(),
        };

        info!(sensor_id = %self.sensor_id, persona = ?self.persona, "Feed subscription started");
        self.worker = Some(tokio::spawn(worker.run()));
        self.updates = Some(rx);
        self.cancel = Some(cancel);
    }

    /// Next update, or `None` once the subscription is stopped or never
    /// started.
    pub async fn next(&mut self) -> Option<FeedUpdate> {
        // ---
        let updates = self.updates.as_mut()?;
        updates.recv().await
    }

    /// Cancel the worker and wait for it to exit. Idempotent; after this
    /// returns, [`Self::next`] yields nothing.
    pub async fn stop(&mut self) {
        // ---
        self.updates = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if transition(&self.status, FeedStatus::Stopped) {
            info!(sensor_id = %self.sensor_id, "Feed subscription stopped");
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(sensor_id = %self.sensor_id, "Feed worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

struct FeedWorker {
    sensor_id: String,
    persona: Option<String>,
    store: Arc<dyn TelemetryStore>,
    settings: FeedSettings,
    status: Arc<watch::Sender<FeedStatus>>,
    updates: mpsc::Sender<FeedUpdate>,
    cancel: CancellationToken,
}

impl FeedWorker {
    // ---
    async fn run(self) {
        // ---
        let mut points_cursor: Option<DateTime<Utc>> = None;
        let mut anomalies_cursor: Option<DateTime<Utc>> = None;
        let mut attempt: u32 = 0;

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                polled = self.poll(points_cursor, anomalies_cursor) => polled,
            };

            let wait = match polled {
                Ok((points, anomalies)) => {
                    attempt = 0;
                    let went_live = transition(&self.status, FeedStatus::Live);
                    let points = advance(points, points_cursor, |t| t.ts);
                    let anomalies = advance(anomalies, anomalies_cursor, |a| a.ts);

                    if let Some(last) = points.last() {
                        points_cursor = Some(last.ts);
                    }
                    if let Some(last) = anomalies.last() {
                        anomalies_cursor = Some(last.ts);
                    }

                    if (went_live || !points.is_empty() || !anomalies.is_empty())
                        && !self.deliver(points, anomalies).await
                    {
                        break;
                    }
                    self.settings.poll_interval
                }
                Err(err) => {
                    warn!(sensor_id = %self.sensor_id, attempt, "Feed poll failed: {}", err);
                    if transition(&self.status, FeedStatus::Error)
                        && !self.deliver(Vec::new(), Vec::new()).await
                    {
                        break;
                    }
                    let delay = self.settings.retry.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if transition(&self.status, FeedStatus::Connecting)
                && !self.deliver(Vec::new(), Vec::new()).await
            {
                break;
            }
        }

        debug!(sensor_id = %self.sensor_id, "Feed worker exiting");
    }

    async fn poll(
        &self,
        points_after: Option<DateTime<Utc>>,
        anomalies_after: Option<DateTime<Utc>>,
    ) -> Result<(Vec<TelemetryTick>, Vec<TelemetryAnomaly>)> {
        // ---
        let points_limit = match points_after {
            None => self.settings.backfill_points,
            Some(_) => self.settings.batch_limit,
        };
        let anomalies_limit = match anomalies_after {
            None => self.settings.backfill_anomalies,
            Some(_) => self.settings.batch_limit,
        };

        tokio::try_join!(
            self.store
                .ticks_for(&self.sensor_id, points_after, points_limit),
            self.store
                .anomalies_for(&self.sensor_id, anomalies_after, anomalies_limit),
        )
        .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Push one update stamped with the current status. Returns `false` when
    /// the worker should exit (cancelled or consumer gone).
    async fn deliver(&self, points: Vec<TelemetryTick>, anomalies: Vec<TelemetryAnomaly>) -> bool {
        // ---
        let update = FeedUpdate {
            sensor_id: self.sensor_id.clone(),
            persona: self.persona.clone(),
            points,
            anomalies,
            status: *self.status.borrow(),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.updates.send(update) => sent.is_ok(),
        }
    }
}

/// Sort by timestamp and drop anything at or before `cursor`, so batches
/// never step backwards.
fn advance<T>(
    mut items: Vec<T>,
    cursor: Option<DateTime<Utc>>,
    ts: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    // ---
    items.sort_by_key(|item| ts(item));
    if let Some(cursor) = cursor {
        items.retain(|item| ts(item) > cursor);
    }
    items
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn at(second: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0).unwrap() + ChronoDuration::seconds(second)
    }

    fn tick(sensor_id: &str, second: i64) -> TelemetryTick {
        // ---
        TelemetryTick {
            sensor_id: sensor_id.to_string(),
            ts: at(second),
            value: second as f64,
        }
    }

    fn fast_settings() -> FeedSettings {
        // ---
        FeedSettings {
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy {
                base_backoff_ms: 5,
                max_backoff_ms: 20,
            },
            ..FeedSettings::default()
        }
    }

    async fn next_update(sub: &mut Subscription) -> FeedUpdate {
        // ---
        timeout(WAIT, sub.next())
            .await
            .expect("timed out waiting for update")
            .expect("subscription closed")
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        // ---
        let retry = RetryPolicy {
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
        };
        assert_eq!(retry.delay(0), Duration::from_millis(250));
        assert_eq!(retry.delay(1), Duration::from_millis(500));
        assert_eq!(retry.delay(3), Duration::from_millis(2000));
        assert_eq!(retry.delay(10), Duration::from_millis(30_000));
        assert_eq!(retry.delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_advance_sorts_and_drops_old() {
        // ---
        let items = vec![tick("s", 5), tick("s", 2), tick("s", 9), tick("s", 4)];
        let kept = advance(items, Some(at(4)), |t| t.ts);
        assert_eq!(kept.iter().map(|t| t.ts).collect::<Vec<_>>(), vec![at(5), at(9)]);
    }

    #[tokio::test]
    async fn test_backfill_then_incremental_updates() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for s in [1, 2, 3] {
            store.insert_tick(tick("fcu-201-temp", s)).await;
        }
        store.insert_tick(tick("fcu-201-fan", 2)).await;

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", Some("Jeeves".to_string()));
        assert_eq!(sub.status(), FeedStatus::Idle);

        sub.start();
        let first = next_update(&mut sub).await;
        assert_eq!(first.status, FeedStatus::Live);
        assert_eq!(first.points.len(), 3);
        assert_eq!(first.persona.as_deref(), Some("Jeeves"));
        assert!(first.points.iter().all(|p| p.sensor_id == "fcu-201-temp"));

        store.insert_tick(tick("fcu-201-temp", 4)).await;
        store
            .insert_anomaly(&TelemetryAnomaly {
                sensor_id: "fcu-201-temp".to_string(),
                ts: at(4),
                value: 4.0,
                score: 0.97,
                ts_detected: at(5),
            })
            .await
            .unwrap();

        let mut points = Vec::new();
        let mut anomalies = Vec::new();
        while points.is_empty() || anomalies.is_empty() {
            let update = next_update(&mut sub).await;
            points.extend(update.points);
            anomalies.extend(update.anomalies);
        }
        assert_eq!(points, vec![tick("fcu-201-temp", 4)]);
        assert_eq!(anomalies[0].score, 0.97);

        sub.stop().await;
    }

    #[tokio::test]
    async fn test_delivery_never_steps_backwards() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_tick(tick("fcu-201-temp", 10)).await;

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", None);
        sub.start();
        let mut seen: Vec<DateTime<Utc>> = next_update(&mut sub)
            .await
            .points
            .iter()
            .map(|p| p.ts)
            .collect();

        // Late arrival behind the cursor, then two new ticks
        store.insert_tick(tick("fcu-201-temp", 5)).await;
        store.insert_tick(tick("fcu-201-temp", 11)).await;
        store.insert_tick(tick("fcu-201-temp", 12)).await;

        while seen.len() < 3 {
            seen.extend(next_update(&mut sub).await.points.iter().map(|p| p.ts));
        }
        assert_eq!(seen, vec![at(10), at(11), at(12)]);

        sub.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_tick(tick("fcu-201-temp", 1)).await;

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", None);
        sub.start();
        next_update(&mut sub).await;

        sub.stop().await;
        sub.stop().await;
        assert_eq!(sub.status(), FeedStatus::Stopped);

        store.insert_tick(tick("fcu-201-temp", 2)).await;
        assert!(sub.next().await.is_none());

        // Worker has been joined; the store sees no more polls
        let calls = store.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.calls(), calls);
    }

    #[tokio::test]
    async fn test_drop_cancels_worker() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_tick(tick("fcu-201-temp", 1)).await;

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", None);
        sub.start();
        next_update(&mut sub).await;

        let polls_before = store.calls();
        drop(sub);

        // Allow an in-flight poll to land, then the count must hold still
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = store.calls();
        assert!(settled >= polls_before);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.calls(), settled);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        // ---
        let feed = AnomalyFeed::new(Arc::new(MemoryStore::new()), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", None);

        sub.stop().await;
        assert_eq!(sub.status(), FeedStatus::Stopped);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_restart_after_stop_backfills_again() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_tick(tick("fcu-201-temp", 1)).await;
        store.insert_tick(tick("fcu-201-temp", 2)).await;

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", None);
        sub.start();
        assert_eq!(next_update(&mut sub).await.points.len(), 2);
        sub.stop().await;

        let mut transitions = sub.watch_status();
        sub.start();
        assert_ne!(*transitions.borrow_and_update(), FeedStatus::Stopped);

        let again = next_update(&mut sub).await;
        assert_eq!(again.status, FeedStatus::Live);
        assert_eq!(again.points.len(), 2);

        sub.stop().await;
    }

    #[tokio::test]
    async fn test_transport_error_recovers() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_tick(tick("fcu-201-temp", 1)).await;
        store.set_failing(true);

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut sub = feed.subscribe("fcu-201-temp", None);
        sub.start();

        let failed = next_update(&mut sub).await;
        assert_eq!(failed.status, FeedStatus::Error);
        assert!(failed.points.is_empty());

        store.set_failing(false);
        let recovered = loop {
            let update = next_update(&mut sub).await;
            if update.status == FeedStatus::Live {
                break update;
            }
            assert!(matches!(
                update.status,
                FeedStatus::Error | FeedStatus::Connecting
            ));
        };
        assert_eq!(recovered.points, vec![tick("fcu-201-temp", 1)]);

        sub.stop().await;
    }

    #[tokio::test]
    async fn test_fan_out_subscriptions_are_independent() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_tick(tick("fcu-201-temp", 1)).await;

        let feed = AnomalyFeed::new(store.clone(), fast_settings());
        let mut a = feed.subscribe("fcu-201-temp", None);
        let mut b = feed.subscribe("fcu-201-temp", None);
        a.start();
        b.start();

        assert_eq!(next_update(&mut a).await.points.len(), 1);
        assert_eq!(next_update(&mut b).await.points.len(), 1);

        a.stop().await;
        store.insert_tick(tick("fcu-201-temp", 2)).await;

        let mut later = Vec::new();
        while later.is_empty() {
            later = next_update(&mut b).await.points;
        }
        assert_eq!(later, vec![tick("fcu-201-temp", 2)]);
        assert_eq!(a.status(), FeedStatus::Stopped);
        assert_eq!(b.status(), FeedStatus::Live);

        b.stop().await;
    }
}
