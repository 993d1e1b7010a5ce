//! Data models for the Jeeves telemetry pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// One timestamped sensor reading. Identity is `(sensor_id, ts)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryTick {
    // ---
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
}

/// A tick flagged by the external scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryAnomaly {
    // ---
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
    pub score: f64,
    #[serde(rename = "ts_detected")]
    pub ts_detected: DateTime<Utc>,
}

/// Anomaly as posted by the scorer; `ts_detected` defaults to arrival time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnomaly {
    // ---
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
    pub score: f64,
    #[serde(rename = "ts_detected", default)]
    pub ts_detected: Option<DateTime<Utc>>,
}

impl NewAnomaly {
    // ---
    pub fn detected_at(self, now: DateTime<Utc>) -> TelemetryAnomaly {
        // ---
        TelemetryAnomaly {
            sensor_id: self.sensor_id,
            ts: self.ts,
            value: self.value,
            score: self.score,
            ts_detected: self.ts_detected.unwrap_or(now),
        }
    }
}

/// Tenant-wide ingestion switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionState {
    pub ingestion_enabled: bool,
}

/// One entry of the append-only feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFeedback {
    // ---
    pub id: Uuid,
    pub notification_id: String,
    pub helpful: bool,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// The FCU unit a status check is scoped to, e.g. `fcu-201`.
///
/// A sensor belongs to the scope only when its id continues the unit
/// prefix with a `-` segment boundary: `fcu-201-temp` is in scope,
/// `fcu-2010-x` is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitScope {
    unit: String,
}

impl UnitScope {
    // ---
    pub fn new(unit: impl Into<String>) -> Self {
        // ---
        let unit = unit.into();
        let unit = unit.trim().trim_end_matches(&['-', '*', '%'][..]).to_string();
        Self { unit }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Exact-segment membership test.
    pub fn matches(&self, sensor_id: &str) -> bool {
        // ---
        sensor_id
            .strip_prefix(self.unit.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// SQL `LIKE` pattern equivalent to [`UnitScope::matches`], for use with
    /// `ESCAPE '\'`.
    pub fn like_pattern(&self) -> String {
        // ---
        let mut pattern = String::with_capacity(self.unit.len() + 2);
        for c in self.unit.chars() {
            if matches!(c, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str("-%");
        pattern
    }
}
