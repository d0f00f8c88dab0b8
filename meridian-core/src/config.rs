//! Configuration types

use crate::{ConfigError, MeridianResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of entries kept in memory per item cache. Zero means
/// every entry leaves memory on the next eviction pass.
pub const DEFAULT_MEMORY_MAX_COUNT: usize = 0;
/// Default maximum memory age in seconds.
pub const DEFAULT_MEMORY_MAX_AGE_SECS: u64 = 600;
/// Default number of rows kept in the durable tier per cache.
pub const DEFAULT_DURABLE_MAX_COUNT: usize = 5000;
/// Default maximum durable age in seconds.
pub const DEFAULT_DURABLE_MAX_AGE_SECS: u64 = 86_400;
/// Default number of per-identifier histories kept in memory.
pub const DEFAULT_HISTORY_MAX_COUNT: usize = 1000;
/// Default maximum history age in seconds.
pub const DEFAULT_HISTORY_MAX_AGE_SECS: u64 = 86_400;
/// Default interval between registry-wide eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Size and age bounds for one item cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    pub memory_max_count: usize,
    pub memory_max_age: Duration,
    pub durable_max_count: usize,
    pub durable_max_age: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            memory_max_count: DEFAULT_MEMORY_MAX_COUNT,
            memory_max_age: Duration::from_secs(DEFAULT_MEMORY_MAX_AGE_SECS),
            durable_max_count: DEFAULT_DURABLE_MAX_COUNT,
            durable_max_age: Duration::from_secs(DEFAULT_DURABLE_MAX_AGE_SECS),
        }
    }
}

impl CacheLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create limits from environment variables.
    ///
    /// # Environment Variables
    /// - `MERIDIAN_CACHE_MEMORY_MAX_COUNT` (default: 0)
    /// - `MERIDIAN_CACHE_MEMORY_MAX_AGE_SECS` (default: 600)
    /// - `MERIDIAN_CACHE_DURABLE_MAX_COUNT` (default: 5000)
    /// - `MERIDIAN_CACHE_DURABLE_MAX_AGE_SECS` (default: 86400)
    pub fn from_env() -> Self {
        Self {
            memory_max_count: env_or("MERIDIAN_CACHE_MEMORY_MAX_COUNT", DEFAULT_MEMORY_MAX_COUNT),
            memory_max_age: Duration::from_secs(env_or(
                "MERIDIAN_CACHE_MEMORY_MAX_AGE_SECS",
                DEFAULT_MEMORY_MAX_AGE_SECS,
            )),
            durable_max_count: env_or("MERIDIAN_CACHE_DURABLE_MAX_COUNT", DEFAULT_DURABLE_MAX_COUNT),
            durable_max_age: Duration::from_secs(env_or(
                "MERIDIAN_CACHE_DURABLE_MAX_AGE_SECS",
                DEFAULT_DURABLE_MAX_AGE_SECS,
            )),
        }
    }

    pub fn with_memory_max_count(mut self, max: usize) -> Self {
        self.memory_max_count = max;
        self
    }

    pub fn with_memory_max_age(mut self, age: Duration) -> Self {
        self.memory_max_age = age;
        self
    }

    pub fn with_durable_max_count(mut self, max: usize) -> Self {
        self.durable_max_count = max;
        self
    }

    pub fn with_durable_max_age(mut self, age: Duration) -> Self {
        self.durable_max_age = age;
        self
    }

    /// The durable tier holds what memory lets go of, so it must not
    /// expire entries sooner than memory does.
    pub fn validate(&self) -> MeridianResult<()> {
        if self.durable_max_age < self.memory_max_age {
            return Err(ConfigError::InvalidValue {
                field: "durable_max_age".to_string(),
                value: format!("{:?}", self.durable_max_age),
                reason: format!("must be at least memory_max_age ({:?})", self.memory_max_age),
            }
            .into());
        }
        Ok(())
    }
}

/// Bounds for the per-identifier history maps of a versioned cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLimits {
    pub max_count: usize,
    pub max_age: Duration,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_HISTORY_MAX_COUNT,
            max_age: Duration::from_secs(DEFAULT_HISTORY_MAX_AGE_SECS),
        }
    }
}

impl HistoryLimits {
    /// # Environment Variables
    /// - `MERIDIAN_HISTORY_MAX_COUNT` (default: 1000)
    /// - `MERIDIAN_HISTORY_MAX_AGE_SECS` (default: 86400)
    pub fn from_env() -> Self {
        Self {
            max_count: env_or("MERIDIAN_HISTORY_MAX_COUNT", DEFAULT_HISTORY_MAX_COUNT),
            max_age: Duration::from_secs(env_or(
                "MERIDIAN_HISTORY_MAX_AGE_SECS",
                DEFAULT_HISTORY_MAX_AGE_SECS,
            )),
        }
    }

    pub fn with_max_count(mut self, max: usize) -> Self {
        self.max_count = max;
        self
    }

    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }
}

/// Configuration for the periodic eviction sweep task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// How often to run `evict_all` (default: 60 seconds)
    pub interval: Duration,
    /// Whether cycles that evicted nothing are logged at debug level
    pub log_empty_cycles: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            log_empty_cycles: false,
        }
    }
}

impl SweepConfig {
    /// # Environment Variables
    /// - `MERIDIAN_SWEEP_INTERVAL_SECS` (default: 60)
    /// - `MERIDIAN_SWEEP_LOG_EMPTY_CYCLES` (default: false)
    pub fn from_env() -> Self {
        let log_empty_cycles = std::env::var("MERIDIAN_SWEEP_LOG_EMPTY_CYCLES")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            interval: Duration::from_secs(env_or(
                "MERIDIAN_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            log_empty_cycles,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn validate(&self) -> MeridianResult<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "interval".to_string(),
                value: "0s".to_string(),
                reason: "sweep interval must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
