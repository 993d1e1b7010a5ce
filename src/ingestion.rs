//! Ingestion state tracker.
//!
//! The "ingestion enabled" flag lives in the store as a singleton row. The
//! tracker reads it at call time and hands the value to whoever needs it;
//! nothing caches it in process.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::models::IngestionState;
use crate::store::TelemetryStore;

// ---

#[derive(Clone)]
pub struct IngestionStateTracker {
    store: Arc<dyn TelemetryStore>,
    default_enabled: bool,
}

impl IngestionStateTracker {
    // ---
    pub fn new(store: Arc<dyn TelemetryStore>, default_enabled: bool) -> Self {
        Self {
            store,
            default_enabled,
        }
    }

    /// Current flag; falls back to the configured default until an operator
    /// has written the row.
    pub async fn get(&self) -> Result<IngestionState> {
        // ---
        let state = self.store.ingestion_state().await?;
        Ok(state.unwrap_or(IngestionState {
            ingestion_enabled: self.default_enabled,
        }))
    }

    /// Operator toggle.
    pub async fn set(&self, enabled: bool) -> Result<IngestionState> {
        // ---
        let state = IngestionState {
            ingestion_enabled: enabled,
        };
        self.store.set_ingestion_state(state).await?;
        info!(ingestion_enabled = enabled, "Ingestion state updated");
        Ok(state)
    }
}
