//! Pool configuration.
//!
//! A [`PoolConfig`] is the declarative form: a strategy plus a string
//! property set, the way deployment configuration usually arrives. It is
//! validated into a typed [`PoolSettings`] before any pool is built, and
//! invalid combinations fail fast with a `Config` error.

use crate::error::{MapResult, MapperError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_TEST_BEFORE_ACQUIRE: bool = false;

/// Pooling strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStrategy {
    /// Bounded free-list with blocking acquire.
    Fixed,
    /// Grows and shrinks between min/max bounds based on demand.
    Adaptive,
    /// Delegates to the driver library's own pool.
    External,
}

impl std::fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Adaptive => write!(f, "adaptive"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Declarative pool configuration: strategy plus string options.
///
/// Recognized option keys (strategy-independent, normalized here so the
/// External strategy sees the same shape as the built-in ones):
///
/// - `url` (required): connection URL (`sqlite:...`, `mysql://...`,
///   `postgres://...`)
/// - `max_connections`: pool capacity (default 10)
/// - `min_connections`: lower bound kept warm (default 1)
/// - `acquire_timeout_ms`: wait budget before `PoolExhausted` (default 30000)
/// - `idle_timeout_ms`: idle lifetime above the minimum (default 600000)
/// - `cleanup_interval_ms`: idle reaper period (default 60000)
/// - `test_before_acquire`: ping connections before handing them out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub strategy: PoolStrategy,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

const KNOWN_OPTION_KEYS: &[&str] = &[
    "url",
    "max_connections",
    "min_connections",
    "acquire_timeout_ms",
    "idle_timeout_ms",
    "cleanup_interval_ms",
    "test_before_acquire",
];

impl PoolConfig {
    /// Create a configuration with the given strategy and connection URL.
    pub fn new(strategy: PoolStrategy, url: impl Into<String>) -> Self {
        let mut options = HashMap::new();
        options.insert("url".to_string(), url.into());
        Self { strategy, options }
    }

    /// Set an option, builder style.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Validate the option set into typed settings. Fails fast on unknown
    /// keys, unparseable values, and inconsistent bounds.
    pub fn settings(&self) -> MapResult<PoolSettings> {
        for key in self.options.keys() {
            if !KNOWN_OPTION_KEYS.contains(&key.as_str()) {
                return Err(MapperError::config(format!(
                    "unknown pool option '{}'",
                    key
                )));
            }
        }

        let url = self
            .options
            .get("url")
            .ok_or_else(|| MapperError::config("pool option 'url' is required"))?
            .clone();
        Url::parse(&url)
            .map_err(|e| MapperError::config(format!("invalid connection URL: {}", e)))?;

        let max_connections = self.parse_u32("max_connections", DEFAULT_MAX_CONNECTIONS)?;
        let min_connections = self.parse_u32("min_connections", DEFAULT_MIN_CONNECTIONS)?;
        let acquire_timeout =
            Duration::from_millis(self.parse_u64("acquire_timeout_ms", DEFAULT_ACQUIRE_TIMEOUT_MS)?);
        let idle_timeout =
            Duration::from_millis(self.parse_u64("idle_timeout_ms", DEFAULT_IDLE_TIMEOUT_MS)?);
        let cleanup_interval = Duration::from_millis(
            self.parse_u64("cleanup_interval_ms", DEFAULT_CLEANUP_INTERVAL_MS)?,
        );
        let test_before_acquire =
            self.parse_bool("test_before_acquire", DEFAULT_TEST_BEFORE_ACQUIRE)?;

        if max_connections == 0 {
            return Err(MapperError::config("max_connections must be greater than 0"));
        }
        if min_connections > max_connections {
            return Err(MapperError::config(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                min_connections, max_connections
            )));
        }
        if cleanup_interval.is_zero() {
            return Err(MapperError::config(
                "cleanup_interval_ms must be greater than 0",
            ));
        }

        Ok(PoolSettings {
            url,
            max_connections,
            min_connections,
            acquire_timeout,
            idle_timeout,
            cleanup_interval,
            test_before_acquire,
        })
    }

    fn parse_u32(&self, key: &str, default: u32) -> MapResult<u32> {
        match self.options.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                MapperError::config(format!("pool option '{}' is not a number: '{}'", key, raw))
            }),
        }
    }

    fn parse_u64(&self, key: &str, default: u64) -> MapResult<u64> {
        match self.options.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                MapperError::config(format!("pool option '{}' is not a number: '{}'", key, raw))
            }),
        }
    }

    fn parse_bool(&self, key: &str, default: bool) -> MapResult<bool> {
        match self.options.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<bool>().map_err(|_| {
                MapperError::config(format!(
                    "pool option '{}' is not a boolean: '{}'",
                    key, raw
                ))
            }),
        }
    }
}

/// Typed, validated pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
    pub test_before_acquire: bool,
}
