//! Broker monitor: watch the building gateway's MQTT topic directly.
//!
//! Logs every message with its arrival gap and whether its data `timestamp`
//! moved on since the previous one. When `MQTT_UNIT_KEY` names a unit, that
//! unit's temperatures, valve outputs and HVAC mode are broken out too.
//! Pair with `/ingestion-status` to tell "gateway silent" apart from
//! "ingester stuck".
use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use dotenvy::dotenv;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, Transport};
use serde_json::Value;

use jeeves_telemetry::{
    config::{self, MonitorConfig},
    logging,
    monitor::{Freshness, MessageTracker, Observation, UnitReadout},
};

/// Pause after a connection error before the event loop reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pretty-printed payload lines echoed at debug level.
const PAYLOAD_PREVIEW_LINES: usize = 200;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    logging::init_tracing();

    let cfg = config::load_monitor_from_env()?;
    cfg.log_config();

    if let Some(dir) = &cfg.dump_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create dump directory {}", dir.display()))?;
    }

    let mut options = MqttOptions::new(cfg.client_id.as_str(), cfg.host.as_str(), cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    if let Some(user) = &cfg.username {
        options.set_credentials(user.as_str(), cfg.password.as_deref().unwrap_or_default());
    }
    if cfg.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let mut tracker = MessageTracker::new();

    tracing::info!("Connecting to {}:{} ...", cfg.host, cfg.port);

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    tracing::info!("✅ Connected to {}", cfg.host);
                    // Re-subscribe on every (re)connect; sessions are clean
                    if let Err(e) = client.try_subscribe(cfg.topic.as_str(), QoS::AtMostOnce) {
                        tracing::error!("Failed to subscribe to {}: {}", cfg.topic, e);
                    } else {
                        tracing::info!("📡 Subscribed to {}", cfg.topic);
                    }
                } else {
                    tracing::error!("❌ Connection refused: {:?}", ack.code);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_message(&cfg, &mut tracker, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::warn!("⚠️ Broker closed the connection");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Connection error: {}; retrying in {:?}", e, RECONNECT_DELAY);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    tracing::info!("⏹️ Monitoring stopped: received {} messages", tracker.count());
    if let Err(e) = client.try_disconnect() {
        tracing::debug!("Disconnect request not sent: {}", e);
    }
    Ok(())
}

fn handle_message(cfg: &MonitorConfig, tracker: &mut MessageTracker, raw: &[u8]) {
    // ---
    let received_at = Utc::now();
    let payload: Value = match serde_json::from_slice(raw) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("❌ Failed to parse JSON payload ({} bytes): {}", raw.len(), e);
            return;
        }
    };

    let observation = tracker.observe(received_at, &payload);
    log_observation(&observation, raw.len());

    let pretty = match serde_json::to_string_pretty(&payload) {
        Ok(pretty) => pretty,
        Err(e) => {
            tracing::warn!("Could not re-encode payload: {}", e);
            return;
        }
    };
    log_payload_preview(&pretty);

    if let Some(dir) = &cfg.dump_dir {
        dump_payload(dir, &observation, &pretty);
    }

    if let Some(unit_key) = &cfg.unit_key {
        match payload
            .get("status")
            .and_then(|s| s.get(unit_key))
            .and_then(Value::as_object)
        {
            Some(fields) => log_unit(unit_key, &UnitReadout::from_fields(fields)),
            None => tracing::warn!("Unit {} not present in this message", unit_key),
        }
    }
}

fn log_observation(obs: &Observation, size: usize) {
    // ---
    tracing::info!(
        "📩 Message #{} received at {}",
        obs.sequence,
        obs.received_at.format("%H:%M:%S")
    );
    tracing::info!(
        "   📅 Data timestamp: {}",
        obs.data_timestamp.as_deref().unwrap_or("N/A")
    );
    tracing::info!("   📏 Payload size: {} bytes", size);

    if let Some(gap) = obs.since_last {
        let secs = gap.num_milliseconds() as f64 / 1000.0;
        tracing::info!("   ⏱️ Time since last message: {:.1} seconds", secs);
    }

    match &obs.freshness {
        Freshness::New { previous } => {
            tracing::info!("   ✨ NEW DATA (timestamp changed)");
            if let Some(previous) = previous {
                tracing::info!("      Previous: {}", previous);
                tracing::info!(
                    "      Current:  {}",
                    obs.data_timestamp.as_deref().unwrap_or("N/A")
                );
            }
        }
        Freshness::Duplicate => {
            tracing::warn!("   🔁 DUPLICATE DATA (same timestamp as before)");
        }
    }

    if let Some(units) = obs.unit_count {
        tracing::info!("   🏢 Units in message: {}", units);
    }
}

fn log_payload_preview(pretty: &str) {
    // ---
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let total = pretty.lines().count();
    for line in pretty.lines().take(PAYLOAD_PREVIEW_LINES) {
        tracing::debug!("   {}", line);
    }
    if total > PAYLOAD_PREVIEW_LINES {
        tracing::debug!(
            "   ... [{} more lines omitted]",
            total - PAYLOAD_PREVIEW_LINES
        );
    }
}

fn dump_payload(dir: &Path, obs: &Observation, pretty: &str) {
    // ---
    let name = format!(
        "mqtt_payload_{}_{:06}.json",
        obs.received_at.format("%Y%m%d_%H%M%S"),
        obs.sequence
    );
    let path = dir.join(name);
    match fs::write(&path, pretty) {
        Ok(()) => tracing::info!("   💾 Full payload saved to {}", path.display()),
        Err(e) => tracing::warn!("   ⚠️ Could not save payload to {}: {}", path.display(), e),
    }
}

fn log_unit(unit_key: &str, unit: &UnitReadout) {
    // ---
    tracing::info!("   🌡️ {} values:", unit_key);
    tracing::info!("      Space temp        : {}", unit.space_temp);
    tracing::info!("      Effective setpoint: {}", unit.effective_setpoint);
    tracing::info!("      User setpoint     : {}", unit.user_setpoint);
    tracing::info!("      Supply temp       : {}", unit.supply_temp);
    tracing::info!("      Heat output       : {}", unit.heat_output);
    tracing::info!("      Cool output       : {}", unit.cool_output);
    tracing::info!("      Fan speed         : {}", unit.fan_speed);
    tracing::info!("      Occupancy         : {}", unit.occupancy);

    tracing::info!("      📊 Total fields: {}", unit.fields.len());
    for (idx, (name, value)) in unit.fields.iter().enumerate() {
        tracing::debug!("         {:>3}. {:<30} = {}", idx + 1, name, value);
    }

    if unit.supply_fields.is_empty() {
        tracing::warn!("      ⚠️ No supply temp field found");
    } else {
        tracing::info!(
            "      🔍 Supply temp field(s): {}",
            unit.supply_fields.join(", ")
        );
    }

    tracing::info!("      🔍 HVAC status: {}", unit.mode);
    if let (Some(gap), Some(user), Some(effective)) = (
        unit.setpoint_gap,
        unit.user_setpoint_value,
        unit.effective_setpoint_value,
    ) {
        tracing::warn!(
            "      ⚠️ SETPOINT GAP: {:.1}°C (user {}°C, effective {}°C)",
            gap,
            user,
            effective
        );
    }
}
