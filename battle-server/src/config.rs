use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Unset means battles live in memory only
    pub database_url: Option<String>,
    pub challenges_file: Option<PathBuf>,
    pub tick_interval: Duration,
    pub connection_timeout_seconds: u64,
    pub rate_limit_burst: u32,
    pub rate_limit_refill: Duration,
    pub finished_retention_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Ok(Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            database_url: text("DATABASE_URL"),
            challenges_file: text("CHALLENGES_FILE").map(PathBuf::from),
            tick_interval: Duration::from_millis(parse_positive(
                &lookup,
                "TICK_INTERVAL_MS",
                defaults.tick_interval.as_millis() as u64,
            )?),
            connection_timeout_seconds: parse(
                &lookup,
                "CONNECTION_TIMEOUT_SECONDS",
                defaults.connection_timeout_seconds,
            )?,
            rate_limit_burst: parse(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_refill: Duration::from_millis(parse(
                &lookup,
                "RATE_LIMIT_REFILL_MS",
                defaults.rate_limit_refill.as_millis() as u64,
            )?),
            finished_retention_seconds: parse(
                &lookup,
                "FINISHED_RETENTION_SECONDS",
                defaults.finished_retention_seconds,
            )?,
            cleanup_interval_seconds: parse_positive(
                &lookup,
                "CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval_seconds,
            )?,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Intervals that drive timers must be non-zero.
fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match parse(lookup, name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: None,
            challenges_file: None,
            tick_interval: Duration::from_millis(1000),
            connection_timeout_seconds: 300,
            rate_limit_burst: 30,
            rate_limit_refill: Duration::from_millis(2000),
            finished_retention_seconds: 3600,
            cleanup_interval_seconds: 30,
        }
    }
}
