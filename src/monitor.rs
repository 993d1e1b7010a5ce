//! Broker-side ingestion diagnostics.
//!
//! Helpers behind the `mqtt_monitor` binary. They answer the questions the
//! ingestion-health check cannot: is the gateway publishing at all, how far
//! apart are its messages, and is it re-sending the same data snapshot
//! (same payload `timestamp`) rather than fresh readings.
//!
//! BMS values arrive as strings like `"23.2 °C {ok}"`; [`parse_reading`]
//! splits them into a number and a point status.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

/// Setpoint disagreement worth flagging, in °C.
pub const SETPOINT_GAP_THRESHOLD: f64 = 0.1;

pub const SPACE_TEMP: &str = "nvoSpaceTemp";
pub const EFFECTIVE_SETPOINT: &str = "nvoEffectSetpt";
pub const USER_SETPOINT: &str = "nviSetpoint";
pub const SUPPLY_TEMP: &str = "nvoSupplyTemp";

// Gateways name the same point differently; the first present wins.
pub const HEAT_OUTPUT: &[&str] = &["nvoHeatOutput", "nvoHeatPrimary", "nvoHeatOut"];
pub const COOL_OUTPUT: &[&str] = &["nvoCoolOutput", "nvoCoolPrimary", "nvoCoolOut"];
pub const FAN_SPEED: &[&str] = &["nvoFanSpeed", "nvoFanSpeed_state"];
pub const OCCUPANCY: &[&str] = &["nvoOccup", "nvoEffectOccup"];

// ---

/// A numeric point value with its BMS status flag (`ok` when absent).
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub status: String,
}

impl Reading {
    /// The value, unless the point reported `nan`.
    pub fn number(&self) -> Option<f64> {
        Some(self.value).filter(|v| !v.is_nan())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{{}}}", self.value, self.status)
    }
}

/// Parse a raw point value: a JSON number, or a string that starts with a
/// number (or `nan`) and may carry a `{status}` suffix.
pub fn parse_reading(raw: &Value) -> Option<Reading> {
    // ---
    match raw {
        Value::Number(n) => n.as_f64().map(|value| Reading {
            value,
            status: "ok".to_string(),
        }),
        Value::String(s) => parse_reading_str(s),
        _ => None,
    }
}

pub fn parse_reading_str(raw: &str) -> Option<Reading> {
    // ---
    let raw = raw.trim();
    let digits = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());

    let value = if digits > 0 {
        raw[..digits].parse::<f64>().ok()?
    } else if raw.starts_with("nan") {
        f64::NAN
    } else {
        return None;
    };

    let status = raw
        .find('{')
        .and_then(|open| {
            let rest = &raw[open + 1..];
            rest.find('}').map(|close| &rest[..close])
        })
        .filter(|s| !s.is_empty())
        .unwrap_or("ok");

    Some(Reading {
        value,
        status: status.to_string(),
    })
}

/// Render a raw value for display: parsed when possible, verbatim otherwise.
pub fn describe(raw: Option<&Value>) -> String {
    // ---
    match raw {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(v) => match parse_reading(v) {
            Some(reading) => reading.to_string(),
            None => match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        },
    }
}

/// First of `keys` holding a non-empty value.
pub fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    // ---
    keys.iter().filter_map(|k| fields.get(*k)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HvacMode {
    /// Heating valve open, in percent.
    Heating(f64),
    /// Cooling valve open, in percent.
    Cooling(f64),
    Idle,
}

impl HvacMode {
    /// Heating wins when both valves report output.
    pub fn from_outputs(heat: Option<f64>, cool: Option<f64>) -> Self {
        // ---
        match (heat, cool) {
            (Some(h), _) if h > 0.0 => HvacMode::Heating(h),
            (_, Some(c)) if c > 0.0 => HvacMode::Cooling(c),
            _ => HvacMode::Idle,
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HvacMode::Heating(pct) => write!(f, "🔥 HEATING at {}%", pct),
            HvacMode::Cooling(pct) => write!(f, "❄️ COOLING at {}%", pct),
            HvacMode::Idle => write!(f, "⏸️ IDLE (no heating/cooling)"),
        }
    }
}

/// Gap between the occupant's setpoint and the one the controller is
/// actually driving to, when both are known, non-zero and apart by more
/// than [`SETPOINT_GAP_THRESHOLD`].
pub fn setpoint_gap(user: Option<f64>, effective: Option<f64>) -> Option<f64> {
    // ---
    let (user, effective) = (user?, effective?);
    if user == 0.0 || effective == 0.0 {
        return None;
    }
    let gap = (user - effective).abs();
    (gap > SETPOINT_GAP_THRESHOLD).then_some(gap)
}

/// Breakdown of one unit's fields inside a gateway payload.
#[derive(Debug, Clone)]
pub struct UnitReadout {
    pub space_temp: String,
    pub effective_setpoint: String,
    pub user_setpoint: String,
    pub supply_temp: String,
    pub heat_output: String,
    pub cool_output: String,
    pub fan_speed: String,
    pub occupancy: String,
    /// Every field, sorted by name, rendered through [`describe`].
    pub fields: Vec<(String, String)>,
    /// Field names that look like a supply-air temperature.
    pub supply_fields: Vec<String>,
    pub mode: HvacMode,
    pub setpoint_gap: Option<f64>,
    pub user_setpoint_value: Option<f64>,
    pub effective_setpoint_value: Option<f64>,
}

impl UnitReadout {
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        // ---
        let number = |raw: Option<&Value>| raw.and_then(parse_reading).and_then(|r| r.number());

        let heat = first_present(fields, HEAT_OUTPUT);
        let cool = first_present(fields, COOL_OUTPUT);
        let user_sp = number(fields.get(USER_SETPOINT));
        let effective_sp = number(fields.get(EFFECTIVE_SETPOINT));

        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();

        UnitReadout {
            space_temp: describe(fields.get(SPACE_TEMP)),
            effective_setpoint: describe(fields.get(EFFECTIVE_SETPOINT)),
            user_setpoint: describe(fields.get(USER_SETPOINT)),
            supply_temp: describe(fields.get(SUPPLY_TEMP)),
            heat_output: describe(heat),
            cool_output: describe(cool),
            fan_speed: describe(first_present(fields, FAN_SPEED)),
            occupancy: describe(first_present(fields, OCCUPANCY)),
            fields: names
                .iter()
                .map(|name| (name.to_string(), describe(fields.get(name.as_str()))))
                .collect(),
            supply_fields: names
                .iter()
                .filter(|name| {
                    let lower = name.to_lowercase();
                    lower.contains("supply") || lower.contains("sat")
                })
                .map(|name| name.to_string())
                .collect(),
            mode: HvacMode::from_outputs(number(heat), number(cool)),
            setpoint_gap: setpoint_gap(user_sp, effective_sp),
            user_setpoint_value: user_sp,
            effective_setpoint_value: effective_sp,
        }
    }
}

/// Whether a message carried a new data snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Timestamp differs from the previous message's (`previous` is `None`
    /// for the first message).
    New { previous: Option<String> },
    /// Same timestamp as the previous message: the gateway re-sent old data.
    Duplicate,
}

/// What the tracker learned from one message.
#[derive(Debug, Clone)]
pub struct Observation {
    /// 1-based message number.
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub since_last: Option<Duration>,
    /// The payload's own `timestamp`, if it has one.
    pub data_timestamp: Option<String>,
    pub freshness: Freshness,
    /// Number of units under the payload's `status` object.
    pub unit_count: Option<usize>,
}

/// Tracks arrival gaps and data-timestamp changes across messages.
#[derive(Debug, Default)]
pub struct MessageTracker {
    count: u64,
    last_received: Option<DateTime<Utc>>,
    last_data_timestamp: Option<String>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages observed so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn observe(&mut self, received_at: DateTime<Utc>, payload: &Value) -> Observation {
        // ---
        let data_timestamp = payload.get("timestamp").and_then(|ts| match ts {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

        let freshness = if self.count == 0 || data_timestamp != self.last_data_timestamp {
            Freshness::New {
                previous: self.last_data_timestamp.clone(),
            }
        } else {
            Freshness::Duplicate
        };

        self.count += 1;
        let since_last = self.last_received.map(|prev| received_at - prev);
        self.last_received = Some(received_at);
        self.last_data_timestamp = data_timestamp.clone();

        Observation {
            sequence: self.count,
            received_at,
            since_last,
            data_timestamp,
            freshness,
            unit_count: payload
                .get("status")
                .and_then(Value::as_object)
                .map(Map::len),
        }
    }
}
