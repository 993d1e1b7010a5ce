use std::collections::VecDeque;

use super::{FeedStatus, FeedUpdate};
use crate::models::{TelemetryAnomaly, TelemetryTick};

/// Points a live panel keeps on screen.
pub const MAX_POINTS: usize = 60;
/// Anomalies a live panel keeps on screen.
pub const MAX_ANOMALIES: usize = 30;

// ---

/// What a display retains of a feed: the newest points and anomalies it
/// has been shown, plus the latest status. Purely a presentation buffer;
/// the store keeps full history.
#[derive(Debug, Default, Clone)]
pub struct FeedWindow {
    points: VecDeque<TelemetryTick>,
    anomalies: VecDeque<TelemetryAnomaly>,
    status: FeedStatus,
}

impl FeedWindow {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, update: FeedUpdate) {
        // ---
        self.status = update.status;
        push_bounded(&mut self.points, update.points, MAX_POINTS);
        push_bounded(&mut self.anomalies, update.anomalies, MAX_ANOMALIES);
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub fn points(&self) -> impl Iterator<Item = &TelemetryTick> {
        self.points.iter()
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &TelemetryAnomaly> {
        self.anomalies.iter()
    }

    /// Current window as a full update frame.
    pub fn snapshot(&self, sensor_id: &str, persona: Option<&str>) -> FeedUpdate {
        // ---
        FeedUpdate {
            sensor_id: sensor_id.to_string(),
            persona: persona.map(str::to_string),
            points: self.points.iter().cloned().collect(),
            anomalies: self.anomalies.iter().cloned().collect(),
            status: self.status,
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, items: Vec<T>, cap: usize) {
    // ---
    buf.extend(items);
    let excess = buf.len().saturating_sub(cap);
    buf.drain(..excess);
}
