//! Configuration schema for the billing cache
//!
//! Configuration is stored at `~/.config/billing-cache/config.toml`

use crate::cache::retry::RetryPolicy;
use crate::cache::store::{ResourceClass, Staleness, StalenessTable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Logging settings
    pub logging: LoggingConfig,

    /// Read retry settings
    pub retry: RetryConfig,

    /// Staleness windows per resource class
    pub staleness: StalenessConfig,
}

impl CacheConfig {
    /// Build the retry policy used by every query executor
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    /// Build the staleness table used by the cache
    pub fn staleness_table(&self) -> StalenessTable {
        let s = &self.staleness;
        StalenessTable::uniform(s.time_entries.into())
            .with(ResourceClass::Unsubmitted, s.unsubmitted.into())
            .with(ResourceClass::Recent, s.recent.into())
            .with(ResourceClass::Entry, s.entry.into())
            .with(ResourceClass::Matters, s.matters.into())
            .with(ResourceClass::ClientBilling, s.client_billing.into())
            .with(ResourceClass::Analytics, s.analytics.into())
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "billing_cache=debug"
    pub filter: String,

    /// Log format: "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "billing_cache=info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Retry settings for reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// One staleness window, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// How long a value is served without revalidation
    pub fresh_secs: u64,

    /// How long a value is kept at all
    pub gc_secs: u64,
}

impl WindowConfig {
    const fn minutes(fresh: u64, gc: u64) -> Self {
        Self {
            fresh_secs: fresh * 60,
            gc_secs: gc * 60,
        }
    }
}

impl From<WindowConfig> for Staleness {
    fn from(w: WindowConfig) -> Self {
        Staleness::new(
            Duration::from_secs(w.fresh_secs),
            Duration::from_secs(w.gc_secs),
        )
    }
}

/// Staleness windows per resource class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub time_entries: WindowConfig,
    pub unsubmitted: WindowConfig,
    pub recent: WindowConfig,
    pub entry: WindowConfig,
    pub matters: WindowConfig,
    pub client_billing: WindowConfig,
    pub analytics: WindowConfig,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            time_entries: WindowConfig::minutes(2, 10),
            unsubmitted: WindowConfig::minutes(1, 5),
            recent: WindowConfig::minutes(2, 10),
            entry: WindowConfig::minutes(2, 10),
            matters: WindowConfig::minutes(10, 30),
            client_billing: WindowConfig::minutes(5, 15),
            analytics: WindowConfig::minutes(15, 60),
        }
    }
}
