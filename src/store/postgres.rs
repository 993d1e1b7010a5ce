//! PostgreSQL [`TelemetryStore`] built on `sqlx`.
//!
//! Scoping uses `LIKE ... ESCAPE '\'` with the pattern from
//! [`UnitScope::like_pattern`], so it agrees with the in-memory backend.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use tracing::{debug, instrument};

use super::TelemetryStore;
use crate::error::StoreError;
use crate::models::{
    IngestionState, NotificationFeedback, TelemetryAnomaly, TelemetryTick, UnitScope,
};

// ---

/// PostgreSQL backend. Each query runs under `query_timeout`.
#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgTelemetryStore {
    // ---
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        // ---
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.query_timeout.as_secs())),
        }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    // ---
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self), fields(unit = scope.unit()))]
    async fn recent_ticks(
        &self,
        scope: &UnitScope,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TelemetryTick>, StoreError> {
        // ---
        let ticks = self
            .timed(
                sqlx::query_as::<Postgres, TelemetryTick>(
                    r#"
                    SELECT sensor_id, ts, value
                    FROM telemetry_ticks
                    WHERE sensor_id LIKE $1 ESCAPE '\'
                      AND ts > $2
                    ORDER BY ts DESC
                    LIMIT $3
                    "#,
                )
                .bind(scope.like_pattern())
                .bind(since)
                .bind(i64::from(limit))
                .fetch_all(&self.pool),
            )
            .await?;
        debug!("{} recent ticks", ticks.len());
        Ok(ticks)
    }

    async fn count_ticks(&self, scope: &UnitScope) -> Result<i64, StoreError> {
        // ---
        self.timed(
            sqlx::query_scalar::<Postgres, i64>(
                r#"
                SELECT COUNT(*) FROM telemetry_ticks
                WHERE sensor_id LIKE $1 ESCAPE '\'
                "#,
            )
            .bind(scope.like_pattern())
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn distinct_streams(&self, scope: &UnitScope) -> Result<Vec<String>, StoreError> {
        // ---
        self.timed(
            sqlx::query_scalar::<Postgres, String>(
                r#"
                SELECT DISTINCT sensor_id FROM telemetry_ticks
                WHERE sensor_id LIKE $1 ESCAPE '\'
                ORDER BY sensor_id
                "#,
            )
            .bind(scope.like_pattern())
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn ticks_for(
        &self,
        sensor_id: &str,
        after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TelemetryTick>, StoreError> {
        // ---
        let query = match after {
            Some(after) => sqlx::query_as::<Postgres, TelemetryTick>(
                r#"
                SELECT sensor_id, ts, value
                FROM telemetry_ticks
                WHERE sensor_id = $1 AND ts > $2
                ORDER BY ts ASC
                LIMIT $3
                "#,
            )
            .bind(sensor_id)
            .bind(after)
            .bind(i64::from(limit)),
            None => sqlx::query_as::<Postgres, TelemetryTick>(
                r#"
                SELECT sensor_id, ts, value FROM (
                    SELECT sensor_id, ts, value
                    FROM telemetry_ticks
                    WHERE sensor_id = $1
                    ORDER BY ts DESC
                    LIMIT $2
                ) latest
                ORDER BY ts ASC
                "#,
            )
            .bind(sensor_id)
            .bind(i64::from(limit)),
        };
        self.timed(query.fetch_all(&self.pool)).await
    }

    async fn anomalies_for(
        &self,
        sensor_id: &str,
        after: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TelemetryAnomaly>, StoreError> {
        // ---
        let query = match after {
            Some(after) => sqlx::query_as::<Postgres, TelemetryAnomaly>(
                r#"
                SELECT sensor_id, ts, value, score, ts_detected
                FROM telemetry_anomalies
                WHERE sensor_id = $1 AND ts > $2
                ORDER BY ts ASC
                LIMIT $3
                "#,
            )
            .bind(sensor_id)
            .bind(after)
            .bind(i64::from(limit)),
            None => sqlx::query_as::<Postgres, TelemetryAnomaly>(
                r#"
                SELECT sensor_id, ts, value, score, ts_detected FROM (
                    SELECT sensor_id, ts, value, score, ts_detected
                    FROM telemetry_anomalies
                    WHERE sensor_id = $1
                    ORDER BY ts DESC
                    LIMIT $2
                ) latest
                ORDER BY ts ASC
                "#,
            )
            .bind(sensor_id)
            .bind(i64::from(limit)),
        };
        self.timed(query.fetch_all(&self.pool)).await
    }

    #[instrument(skip(self, anomaly), fields(sensor_id = %anomaly.sensor_id))]
    async fn insert_anomaly(&self, anomaly: &TelemetryAnomaly) -> Result<bool, StoreError> {
        // ---
        let result = self
            .timed(
                sqlx::query(
                    r#"
                    INSERT INTO telemetry_anomalies (sensor_id, ts, value, score, ts_detected)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (sensor_id, ts) DO NOTHING
                    "#,
                )
                .bind(&anomaly.sensor_id)
                .bind(anomaly.ts)
                .bind(anomaly.value)
                .bind(anomaly.score)
                .bind(anomaly.ts_detected)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn ingestion_state(&self) -> Result<Option<IngestionState>, StoreError> {
        // ---
        let enabled = self
            .timed(
                sqlx::query_scalar::<Postgres, bool>(
                    "SELECT ingestion_enabled FROM ingestion_state WHERE id = 1",
                )
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(enabled.map(|ingestion_enabled| IngestionState { ingestion_enabled }))
    }

    async fn set_ingestion_state(&self, state: IngestionState) -> Result<(), StoreError> {
        // ---
        self.timed(
            sqlx::query(
                r#"
                INSERT INTO ingestion_state (id, ingestion_enabled, updated_at)
                VALUES (1, $1, now())
                ON CONFLICT (id) DO UPDATE SET
                    ingestion_enabled = EXCLUDED.ingestion_enabled,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(state.ingestion_enabled)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, feedback), fields(notification_id = %feedback.notification_id))]
    async fn append_feedback(&self, feedback: &NotificationFeedback) -> Result<(), StoreError> {
        // ---
        self.timed(
            sqlx::query(
                r#"
                INSERT INTO notification_feedback (
                    id, notification_id, helpful, comment, submitted_at
                ) VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(feedback.id)
            .bind(&feedback.notification_id)
            .bind(feedback.helpful)
            .bind(&feedback.comment)
            .bind(feedback.submitted_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn feedback_for(
        &self,
        notification_id: &str,
    ) -> Result<Vec<NotificationFeedback>, StoreError> {
        // ---
        self.timed(
            sqlx::query_as::<Postgres, NotificationFeedback>(
                r#"
                SELECT id, notification_id, helpful, comment, submitted_at
                FROM notification_feedback
                WHERE notification_id = $1
                ORDER BY seq ASC
                "#,
            )
            .bind(notification_id)
            .fetch_all(&self.pool),
        )
        .await
    }
}
