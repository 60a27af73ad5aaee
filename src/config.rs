use crate::error::{MonozoneError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Default TCP port of the iTach serial bridge
pub const DEFAULT_PORT: u16 = 4999;

/// Connection and polling settings for the bridge
///
/// Deserializes from a settings document with durations given in
/// milliseconds; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge host name or IP address
    pub host: String,

    /// Bridge TCP port
    pub port: u16,

    /// Deadline for connecting and for each command/response exchange
    #[serde(deserialize_with = "millis")]
    pub timeout: Duration,

    /// Minimum wait before retrying a failed connect on demand
    #[serde(deserialize_with = "millis")]
    pub reconnect_delay: Duration,

    /// Pause between consecutive commands in a multi-zone sweep
    #[serde(deserialize_with = "millis")]
    pub inter_request_delay: Duration,

    /// Interval of the background state poll
    #[serde(deserialize_with = "millis")]
    pub poll_interval: Duration,

    /// Whether the background poll runs at all
    pub poll_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(5),
            inter_request_delay: Duration::from_millis(50),
            poll_interval: Duration::from_secs(2),
            poll_enabled: true,
        }
    }
}

impl BridgeConfig {
    /// Defaults for everything except the bridge address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `ITACH_*` / `POLL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup
    ///
    /// Recognised keys: `ITACH_HOST`, `ITACH_PORT`, `ITACH_TIMEOUT_MS`,
    /// `ITACH_RECONNECT_DELAY_MS`, `POLL_INTERVAL_MS`, `POLL_ENABLED`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("ITACH_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("ITACH_PORT") {
            config.port = parse_value("ITACH_PORT", &port)?;
        }
        if let Some(ms) = lookup("ITACH_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(parse_value("ITACH_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("ITACH_RECONNECT_DELAY_MS") {
            config.reconnect_delay =
                Duration::from_millis(parse_value("ITACH_RECONNECT_DELAY_MS", &ms)?);
        }
        if let Some(ms) = lookup("POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(parse_value("POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(enabled) = lookup("POLL_ENABLED") {
            config.poll_enabled = parse_flag("POLL_ENABLED", &enabled)?;
        }

        if config.timeout.is_zero() {
            return Err(MonozoneError::Config("ITACH_TIMEOUT_MS must be positive".to_string()));
        }

        Ok(config)
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MonozoneError::Config(format!("{key}: invalid value {value:?}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MonozoneError::Config(format!("{key}: invalid flag {value:?}"))),
    }
}
