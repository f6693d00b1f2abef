//! Configuration loader for the `codemetal-sensorwatch` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Result};

/// Parse an optional typed environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Which store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("expected 'postgres' or 'memory', got '{}'", other)),
        }
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string; required for the Postgres backend.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// NATS server the telemetry is published to.
    pub nats_url: String,

    /// Subjects to subscribe to for telemetry.
    pub telemetry_subjects: Vec<String>,

    /// Station for messages whose subject names none.
    pub default_station_id: i32,

    /// Upper bound on every store call made by the pipeline.
    pub store_timeout: Duration,

    /// Events buffered per live viewer before it starts losing them.
    pub broadcast_capacity: usize,

    /// Messages buffered per station before new ones are dropped.
    pub station_queue_depth: usize,

    pub http_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string (Postgres backend only)
///
/// Optional:
/// - `STORE_BACKEND` – `postgres` or `memory` (default: postgres)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `NATS_URL` – broker URL (default: nats://localhost:4222)
/// - `TELEMETRY_SUBJECTS` – comma-separated subjects (default: stations.*.telemetry)
/// - `DEFAULT_STATION_ID` – fallback station binding (default: 1)
/// - `STORE_TIMEOUT_MS` – store call bound (default: 5000)
/// - `BROADCAST_CAPACITY` – live viewer buffer (default: 1024)
/// - `STATION_QUEUE_DEPTH` – per-station queue bound (default: 256)
/// - `HTTP_PORT` – admin API port (default: 8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let store_backend = parse_env!("STORE_BACKEND", StoreBackend, StoreBackend::Postgres);
    let db_url = match store_backend {
        StoreBackend::Postgres => Some(require_env!("DATABASE_URL")),
        StoreBackend::Memory => env::var("DATABASE_URL").ok(),
    };
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let nats_url = env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let telemetry_subjects = parse_subjects(
        &env::var("TELEMETRY_SUBJECTS").unwrap_or_else(|_| "stations.*.telemetry".to_string()),
    )?;
    let default_station_id = parse_env!("DEFAULT_STATION_ID", i32, 1);
    let store_timeout_ms = parse_env!("STORE_TIMEOUT_MS", u64, 5000);
    let broadcast_capacity = parse_env!("BROADCAST_CAPACITY", usize, 1024);
    let station_queue_depth = parse_env!("STATION_QUEUE_DEPTH", usize, 256);
    let http_port = parse_env!("HTTP_PORT", u16, 8080);

    if default_station_id <= 0 {
        bail!("Invalid DEFAULT_STATION_ID: must be positive");
    }
    for (name, value) in [
        ("DB_POOL_MAX", db_pool_max as u64),
        ("STORE_TIMEOUT_MS", store_timeout_ms),
        ("BROADCAST_CAPACITY", broadcast_capacity as u64),
        ("STATION_QUEUE_DEPTH", station_queue_depth as u64),
    ] {
        if value == 0 {
            bail!("Invalid {}: must be greater than zero", name);
        }
    }

    Ok(Config {
        store_backend,
        db_url,
        db_pool_max,
        nats_url,
        telemetry_subjects,
        default_station_id,
        store_timeout: Duration::from_millis(store_timeout_ms),
        broadcast_capacity,
        station_queue_depth,
        http_port,
    })
}

/// Split a comma-separated subject list, ignoring blanks.
fn parse_subjects(raw: &str) -> Result<Vec<String>> {
    // ---
    let subjects: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if subjects.is_empty() {
        bail!("TELEMETRY_SUBJECTS must name at least one subject");
    }
    Ok(subjects)
}

/// Replace the password in a connection URL with `****`.
fn mask_password(url: &str) -> String {
    // ---
    let userinfo_start = url.find("://").map_or(0, |i| i + 3);
    if let Some(at_pos) = url.rfind('@').filter(|at| *at >= userinfo_start) {
        if let Some(colon_pos) = url[userinfo_start..at_pos].rfind(':') {
            let colon_pos = userinfo_start + colon_pos;
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_db_url = self
            .db_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(unset)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  STORE_BACKEND       : {:?}", self.store_backend);
        tracing::info!("  DATABASE_URL        : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX         : {}", self.db_pool_max);
        tracing::info!("  NATS_URL            : {}", self.nats_url);
        tracing::info!("  TELEMETRY_SUBJECTS  : {}", self.telemetry_subjects.join(","));
        tracing::info!("  DEFAULT_STATION_ID  : {}", self.default_station_id);
        tracing::info!("  STORE_TIMEOUT_MS    : {}", self.store_timeout.as_millis());
        tracing::info!("  BROADCAST_CAPACITY  : {}", self.broadcast_capacity);
        tracing::info!("  STATION_QUEUE_DEPTH : {}", self.station_queue_depth);
        tracing::info!("  HTTP_PORT           : {}", self.http_port);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_mask_password() {
        // ---
        assert_eq!(
            mask_password("postgres://sensor:s3cret@db:5432/sensorwatch"),
            "postgres://sensor:****@db:5432/sensorwatch"
        );
        assert_eq!(
            mask_password("postgres://db:5432/sensorwatch"),
            "postgres://db:5432/sensorwatch"
        );
        assert_eq!(
            mask_password("postgres://sensor@db/sensorwatch"),
            "postgres://sensor@db/sensorwatch"
        );
    }

    #[test]
    fn test_parse_subjects() {
        // ---
        assert_eq!(
            parse_subjects(" stations.*.telemetry , agro.datos,, ").unwrap(),
            vec!["stations.*.telemetry".to_string(), "agro.datos".to_string()]
        );
        assert!(parse_subjects(" , ").is_err());
    }

    #[test]
    fn test_store_backend_from_str() {
        // ---
        assert_eq!("Postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
