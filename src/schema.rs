//! Database schema management for `jeeves-telemetry`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Tables owned by the pipeline, in creation order.
pub const TABLES: [&str; 4] = [
    "telemetry_ticks",
    "telemetry_anomalies",
    "ingestion_state",
    "notification_feedback",
];

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw readings written by the external ingestion job
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS telemetry_ticks (
            sensor_id  TEXT             NOT NULL,
            ts         TIMESTAMPTZ      NOT NULL,
            value      DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (sensor_id, ts)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // At most one anomaly per tick
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS telemetry_anomalies (
            sensor_id   TEXT             NOT NULL,
            ts          TIMESTAMPTZ      NOT NULL,
            value       DOUBLE PRECISION NOT NULL,
            score       DOUBLE PRECISION NOT NULL,
            ts_detected TIMESTAMPTZ      NOT NULL DEFAULT now(),
            PRIMARY KEY (sensor_id, ts)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_state (
            id                SMALLINT    PRIMARY KEY CHECK (id = 1),
            ingestion_enabled BOOLEAN     NOT NULL,
            updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only; duplicates per notification are kept
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_feedback (
            id              UUID        PRIMARY KEY,
            seq             BIGSERIAL   NOT NULL,
            notification_id TEXT        NOT NULL,
            helpful         BOOLEAN     NOT NULL,
            comment         TEXT,
            submitted_at    TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_telemetry_ticks_ts
            ON telemetry_ticks (ts);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notification_feedback_notification_id
            ON notification_feedback (notification_id, seq);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
