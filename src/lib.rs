//! Jeeves telemetry service.
//!
//! Ingestion-health reporting, a live anomaly feed and notification feedback
//! for fan-coil-unit telemetry stored in PostgreSQL.
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): each
//! module exposes a narrow surface, re-exported here, and `routes/*.rs`
//! import only from the crate root.

pub mod config;
pub mod error;
pub mod feed;
pub mod feedback;
pub mod health;
pub mod ingestion;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::{Config, MonitorConfig};

// Re-exported so routes/*.rs depend on the crate root rather than on sibling
// modules, which keeps refactoring local.
pub use error::{Error, StoreError};
pub use feed::{AnomalyFeed, FeedSettings, FeedStatus, FeedUpdate, FeedWindow, RetryPolicy};
pub use feedback::{FeedbackRecorder, FeedbackSubmission};
pub use health::{HealthEvaluator, HealthReport, HealthStatus};
pub use ingestion::IngestionStateTracker;
pub use models::{
    IngestionState, NewAnomaly, NotificationFeedback, TelemetryAnomaly, TelemetryTick, UnitScope,
};
pub use routes::AppState;
pub use store::{MemoryStore, PgTelemetryStore, TelemetryStore};
