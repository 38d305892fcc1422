//! Configuration module - environment variable parsing

use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::util::time::DEFAULT_TICK_MILLIS;

/// Default pub/sub topic shared by every server process
pub const DEFAULT_BUS_CHANNEL: &str = "channel";

/// Default number of snapshots buffered per participant
pub const DEFAULT_OUTPUT_BUFFER: usize = 32;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Fixed simulation period
    pub tick_interval: Duration,
    /// Snapshots buffered per participant before frames are skipped
    pub output_buffer: usize,
    /// Pub/sub bus; `None` runs in local mode
    pub bus: Option<BusConfig>,
}

/// Broker connection for distributed mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub url: String,
    pub channel: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_MILLIS),
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            bus: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?
        } else if let Ok(addr) = env::var("SERVER_ADDR") {
            addr.parse().map_err(|_| ConfigError::InvalidAddress)?
        } else {
            defaults.server_addr
        };

        let tick_millis = match env::var("TICK_MS") {
            Ok(raw) => parse_positive(&raw, "TICK_MS")?,
            Err(_) => DEFAULT_TICK_MILLIS,
        };

        let output_buffer = match env::var("OUTPUT_BUFFER") {
            Ok(raw) => parse_positive(&raw, "OUTPUT_BUFFER")? as usize,
            Err(_) => defaults.output_buffer,
        };

        let channel =
            env::var("BUS_CHANNEL").unwrap_or_else(|_| DEFAULT_BUS_CHANNEL.to_string());

        let bus_url = if let Ok(url) = env::var("REDIS_URL") {
            Some(url)
        } else if let Ok(blob) = env::var("DATABASES_FOR_REDIS_CONNECTION") {
            Some(parse_redis_connection(&blob)?)
        } else {
            None
        };

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            tick_interval: Duration::from_millis(tick_millis),
            output_buffer,
            bus: bus_url.map(|url| BusConfig { url, channel }),
        })
    }
}

fn parse_positive(raw: &str, name: &'static str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(name)),
    }
}

#[derive(Deserialize)]
struct ManagedRedisConnection {
    rediss: ManagedRediss,
}

#[derive(Deserialize)]
struct ManagedRediss {
    composed: Vec<String>,
}

/// Extract the broker URL from a managed-database connection blob,
/// e.g. `{"rediss":{"composed":["rediss://..."]}}`. The first URL wins.
pub fn parse_redis_connection(blob: &str) -> Result<String, ConfigError> {
    let connection: ManagedRedisConnection = serde_json::from_str(blob)
        .map_err(|e| ConfigError::InvalidBusConnection(e.to_string()))?;

    connection
        .rediss
        .composed
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::InvalidBusConnection("no connection URL".to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid bus connection settings: {0}")]
    InvalidBusConnection(String),
}
