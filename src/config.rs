//! Configuration loader for the `jeeves-telemetry` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Values are read once at start; nothing here is
//! re-read at runtime.
//!
use std::{env, net::SocketAddr, path::PathBuf, process, time::Duration};

use anyhow::{anyhow, Result};

use crate::models::UnitScope;

/// Parse an optional numeric variable with a default value.
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional boolean variable with a default value.
macro_rules! parse_flag {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        match $lookup($var_name).as_deref().map(str::trim) {
            None => $default,
            Some("1") | Some("true") | Some("yes") | Some("on") => true,
            Some("0") | Some("false") | Some("no") | Some("off") => false,
            Some(other) => return Err(anyhow!("Invalid {}: {:?}", $var_name, other)),
        }
    };
}

/// Primary connection string; wins over [`FALLBACK_DB_VAR`].
pub const PRIMARY_DB_VAR: &str = "JEEVES_DATABASE_URL";
pub const FALLBACK_DB_VAR: &str = "DATABASE_URL";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Which variable `db_url` came from.
    pub db_url_source: &'static str,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Pool acquire and per-query timeout.
    pub db_query_timeout_secs: u64,

    /// HTTP listen address.
    pub bind_addr: SocketAddr,

    /// Unit the ingestion-status check is scoped to.
    pub unit_prefix: String,

    /// Ticks newer than this count as recent.
    pub recent_window_mins: u32,

    /// Cap on recent ticks fetched per status check.
    pub recent_tick_limit: u32,

    /// Ingestion flag used until an operator writes the state row.
    pub ingestion_enabled_default: bool,

    /// Live feed poll interval.
    pub feed_poll_ms: u64,

    /// Ceiling for the live feed's retry backoff.
    pub feed_max_backoff_ms: u64,
}

/// Load configuration from the process environment.
pub fn load_from_env() -> Result<Config> {
    // ---
    load_with(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
///
/// Required (one of):
/// - `JEEVES_DATABASE_URL` – primary connection string
/// - `DATABASE_URL` – fallback connection string
///
/// Optional:
/// - `DB_POOL_MAX` (5), `DB_QUERY_TIMEOUT_SECS` (5), `BIND_ADDR` (0.0.0.0:8080)
/// - `UNIT_PREFIX` (fcu-201), `RECENT_WINDOW_MINS` (30), `RECENT_TICK_LIMIT` (100)
/// - `INGESTION_ENABLED` (false)
/// - `FEED_POLL_MS` (2000), `FEED_MAX_BACKOFF_MS` (30000)
pub fn load_with<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let (db_url, db_url_source) = match (non_empty(PRIMARY_DB_VAR), non_empty(FALLBACK_DB_VAR)) {
        (Some(url), _) => (url, PRIMARY_DB_VAR),
        (None, Some(url)) => (url, FALLBACK_DB_VAR),
        (None, None) => {
            return Err(anyhow!(
                "{} or {} must be set in .env or environment",
                PRIMARY_DB_VAR,
                FALLBACK_DB_VAR
            ))
        }
    };

    let db_pool_max = parse_var!(non_empty, "DB_POOL_MAX", u32, 5);
    let db_query_timeout_secs = parse_var!(non_empty, "DB_QUERY_TIMEOUT_SECS", u64, 5);
    let bind_addr = parse_var!(
        non_empty,
        "BIND_ADDR",
        SocketAddr,
        SocketAddr::from(([0, 0, 0, 0], 8080))
    );
    let unit_prefix = non_empty("UNIT_PREFIX").unwrap_or_else(|| "fcu-201".to_string());
    let recent_window_mins = parse_var!(non_empty, "RECENT_WINDOW_MINS", u32, 30);
    let recent_tick_limit = parse_var!(non_empty, "RECENT_TICK_LIMIT", u32, 100);
    let ingestion_enabled_default = parse_flag!(non_empty, "INGESTION_ENABLED", false);
    let feed_poll_ms = parse_var!(non_empty, "FEED_POLL_MS", u64, 2000);
    let feed_max_backoff_ms = parse_var!(non_empty, "FEED_MAX_BACKOFF_MS", u64, 30_000);

    if db_pool_max == 0 {
        return Err(anyhow!("Invalid DB_POOL_MAX: must be at least 1"));
    }
    if recent_window_mins == 0 {
        return Err(anyhow!("Invalid RECENT_WINDOW_MINS: must be at least 1"));
    }
    if UnitScope::new(unit_prefix.as_str()).unit().is_empty() {
        return Err(anyhow!(
            "Invalid UNIT_PREFIX: {:?} names no unit",
            unit_prefix
        ));
    }

    Ok(Config {
        db_url,
        db_url_source,
        db_pool_max,
        db_query_timeout_secs,
        bind_addr,
        unit_prefix,
        recent_window_mins,
        recent_tick_limit,
        ingestion_enabled_default,
        feed_poll_ms,
        feed_max_backoff_ms,
    })
}

impl Config {
    // ---
    pub fn scope(&self) -> UnitScope {
        UnitScope::new(self.unit_prefix.as_str())
    }

    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.recent_window_mins))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.db_query_timeout_secs)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing every other value.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  {:<21}: {}", self.db_url_source, mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  DB_QUERY_TIMEOUT_SECS: {}", self.db_query_timeout_secs);
        tracing::info!("  BIND_ADDR            : {}", self.bind_addr);
        tracing::info!("  UNIT_PREFIX          : {}", self.unit_prefix);
        tracing::info!("  RECENT_WINDOW_MINS   : {}", self.recent_window_mins);
        tracing::info!("  RECENT_TICK_LIMIT    : {}", self.recent_tick_limit);
        tracing::info!("  INGESTION_ENABLED    : {}", self.ingestion_enabled_default);
        tracing::info!("  FEED_POLL_MS         : {}", self.feed_poll_ms);
        tracing::info!("  FEED_MAX_BACKOFF_MS  : {}", self.feed_max_backoff_ms);
    }
}

/// Settings for the `mqtt_monitor` diagnostic binary.
///
/// Kept apart from [`Config`]: the monitor talks to the broker, never to
/// the database, and the service never reads these.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    // ---
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Topic the building gateway publishes measured values to.
    pub topic: String,

    /// Key under the payload's `status` object to break down, e.g.
    /// `fCU_01_04`. No per-unit readout when unset.
    pub unit_key: Option<String>,

    pub use_tls: bool,
    pub keep_alive_secs: u64,
    pub client_id: String,

    /// When set, every payload is also written here as pretty JSON.
    pub dump_dir: Option<PathBuf>,
}

/// Load the monitor settings from the process environment.
pub fn load_monitor_from_env() -> Result<MonitorConfig> {
    // ---
    load_monitor_with(|name| env::var(name).ok())
}

/// Load the monitor settings through an arbitrary variable lookup.
///
/// Required: `MQTT_HOST`, `MQTT_TOPIC`.
///
/// Optional: `MQTT_PORT` (8883), `MQTT_USERNAME`, `MQTT_PASSWORD`,
/// `MQTT_UNIT_KEY`, `MQTT_TLS` (true), `MQTT_KEEP_ALIVE_SECS` (60),
/// `MQTT_CLIENT_ID` (jeeves-monitor-<pid>), `MQTT_DUMP_DIR`.
pub fn load_monitor_with<F>(lookup: F) -> Result<MonitorConfig>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let required = |name: &str| {
        non_empty(name).ok_or_else(|| anyhow!("{} must be set in .env or environment", name))
    };

    let host = required("MQTT_HOST")?;
    let topic = required("MQTT_TOPIC")?;
    let port = parse_var!(non_empty, "MQTT_PORT", u16, 8883);
    let use_tls = parse_flag!(non_empty, "MQTT_TLS", true);
    let keep_alive_secs = parse_var!(non_empty, "MQTT_KEEP_ALIVE_SECS", u64, 60);
    let client_id = non_empty("MQTT_CLIENT_ID")
        .unwrap_or_else(|| format!("jeeves-monitor-{}", process::id()));

    if keep_alive_secs == 0 {
        return Err(anyhow!("Invalid MQTT_KEEP_ALIVE_SECS: must be at least 1"));
    }

    Ok(MonitorConfig {
        host,
        port,
        username: non_empty("MQTT_USERNAME"),
        password: non_empty("MQTT_PASSWORD"),
        topic,
        unit_key: non_empty("MQTT_UNIT_KEY"),
        use_tls,
        keep_alive_secs,
        client_id,
        dump_dir: non_empty("MQTT_DUMP_DIR").map(PathBuf::from),
    })
}

impl MonitorConfig {
    // ---
    pub fn log_config(&self) {
        // ---
        let password = if self.password.is_some() { "****" } else { "(none)" };
        tracing::info!("Monitor configuration:");
        tracing::info!("  MQTT_HOST     : {}:{}", self.host, self.port);
        tracing::info!("  MQTT_TLS      : {}", self.use_tls);
        tracing::info!("  MQTT_USERNAME : {}", self.username.as_deref().unwrap_or("(none)"));
        tracing::info!("  MQTT_PASSWORD : {}", password);
        tracing::info!("  MQTT_TOPIC    : {}", self.topic);
        tracing::info!("  MQTT_UNIT_KEY : {}", self.unit_key.as_deref().unwrap_or("(none)"));
        tracing::info!("  MQTT_CLIENT_ID: {}", self.client_id);
    }
}

/// Replace the password portion of a connection string with `****`.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    let Some(at_pos) = db_url.rfind('@') else {
        return db_url.to_string();
    };
    let Some(colon_pos) = db_url[..at_pos].rfind(':') else {
        return db_url.to_string();
    };
    // `postgres://host@...` has its only colon in the scheme
    if db_url[colon_pos..].starts_with("://") {
        return db_url.to_string();
    }
    format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..])
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        // ---
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_primary_url_wins_over_fallback() {
        // ---
        let cfg = load_with(lookup_from(&[
            ("JEEVES_DATABASE_URL", "postgres://a/primary"),
            ("DATABASE_URL", "postgres://b/fallback"),
        ]))
        .unwrap();

        assert_eq!(cfg.db_url, "postgres://a/primary");
        assert_eq!(cfg.db_url_source, PRIMARY_DB_VAR);
    }

    #[test]
    fn test_fallback_used_when_primary_missing_or_blank() {
        // ---
        let cfg = load_with(lookup_from(&[
            ("JEEVES_DATABASE_URL", "  "),
            ("DATABASE_URL", "postgres://b/fallback"),
        ]))
        .unwrap();

        assert_eq!(cfg.db_url, "postgres://b/fallback");
        assert_eq!(cfg.db_url_source, FALLBACK_DB_VAR);
    }

    #[test]
    fn test_missing_database_url_is_an_error() {
        // ---
        let err = load_with(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_defaults() {
        // ---
        let cfg = load_with(lookup_from(&[("DATABASE_URL", "postgres://x/db")])).unwrap();

        assert_eq!(cfg.db_pool_max, 5);
        assert_eq!(cfg.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(cfg.scope().unit(), "fcu-201");
        assert_eq!(cfg.recent_window(), chrono::Duration::minutes(30));
        assert_eq!(cfg.recent_tick_limit, 100);
        assert!(!cfg.ingestion_enabled_default);
        assert_eq!(cfg.feed_poll_ms, 2000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        // ---
        let bad_pool = load_with(lookup_from(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("DB_POOL_MAX", "lots"),
        ]));
        assert!(bad_pool.is_err());

        let bad_flag = load_with(lookup_from(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("INGESTION_ENABLED", "maybe"),
        ]));
        assert!(bad_flag.is_err());

        let enabled = load_with(lookup_from(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("INGESTION_ENABLED", "true"),
        ]))
        .unwrap();
        assert!(enabled.ingestion_enabled_default);
    }

    #[test]
    fn test_unit_prefix_must_name_a_unit() {
        // ---
        for prefix in ["*", "-", "%", " -* "] {
            let result = load_with(lookup_from(&[
                ("DATABASE_URL", "postgres://x/db"),
                ("UNIT_PREFIX", prefix),
            ]));
            assert!(result.is_err(), "{:?} should be rejected", prefix);
        }

        let cfg = load_with(lookup_from(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("UNIT_PREFIX", "fcu-305-*"),
        ]))
        .unwrap();
        assert_eq!(cfg.scope().unit(), "fcu-305");
    }

    #[test]
    fn test_monitor_requires_host_and_topic() {
        // ---
        let err = load_monitor_with(lookup_from(&[("MQTT_TOPIC", "dt/fcu")])).unwrap_err();
        assert!(err.to_string().contains("MQTT_HOST"));

        let err = load_monitor_with(lookup_from(&[("MQTT_HOST", "broker")])).unwrap_err();
        assert!(err.to_string().contains("MQTT_TOPIC"));
    }

    #[test]
    fn test_monitor_defaults_and_overrides() {
        // ---
        let cfg = load_monitor_with(lookup_from(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_TOPIC", "dt/csg/nbc/hvac/fcu/measuredvalue"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8883);
        assert!(cfg.use_tls);
        assert_eq!(cfg.keep_alive_secs, 60);
        assert!(cfg.username.is_none());
        assert!(cfg.unit_key.is_none());
        assert!(cfg.client_id.starts_with("jeeves-monitor-"));

        let cfg = load_monitor_with(lookup_from(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_TOPIC", "dt/fcu"),
            ("MQTT_PORT", "1883"),
            ("MQTT_TLS", "false"),
            ("MQTT_UNIT_KEY", "fCU_01_04"),
            ("MQTT_DUMP_DIR", "/tmp/payloads"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 1883);
        assert!(!cfg.use_tls);
        assert_eq!(cfg.unit_key.as_deref(), Some("fCU_01_04"));
        assert_eq!(cfg.dump_dir, Some(PathBuf::from("/tmp/payloads")));

        let bad_port = load_monitor_with(lookup_from(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_TOPIC", "dt/fcu"),
            ("MQTT_PORT", "99999"),
        ]));
        assert!(bad_port.is_err());
    }

    #[test]
    fn test_mask_db_url_hides_password() {
        // ---
        assert_eq!(
            mask_db_url("postgres://jeeves:s3cret@db:5432/jeeves"),
            "postgres://jeeves:****@db:5432/jeeves"
        );
        assert_eq!(mask_db_url("postgres://db/jeeves"), "postgres://db/jeeves");
        assert_eq!(mask_db_url("postgres://jeeves@db/x"), "postgres://jeeves@db/x");
    }
}
