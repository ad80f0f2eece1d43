//! Configuration for the tiered cache
//!
//! [`CacheConfig`] holds instance-wide defaults. Each call may override them
//! with [`CacheOptions`]; the two are resolved into the concrete
//! [`CacheItemOptions`] that drive item lifecycle decisions.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_PREFIX: &str = "OUROBOROS_CACHE_";

/// Instance-wide cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard expiry handed to the drivers. `None` stores items forever.
    pub physical_ttl: Option<Duration>,

    /// Soft expiry after which items are stale. `None` means "same as physical".
    pub logical_ttl: Option<Duration>,

    /// Serve stale-but-alive items while refreshing or when a fetch fails
    pub graceful_retain: bool,

    /// Maximum wait for a remote read or loader call
    pub timeout: Option<Duration>,

    /// TTL jitter factor (0.0 - 1.0) applied to the logical TTL
    /// Spreads refreshes of keys written together
    pub ttl_jitter: f64,

    /// Channel used for invalidation messages
    pub bus_channel: String,

    /// Drop every local entry after the bus reconnects
    pub purge_local_on_reconnect: bool,

    /// Keep failed bus messages for a later retry
    pub bus_retry_queue_enabled: bool,

    /// Maximum number of queued bus messages
    pub bus_retry_queue_max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 30 minutes
            physical_ttl: Some(Duration::from_secs(30 * 60)),
            logical_ttl: None,
            graceful_retain: false,
            timeout: None,
            ttl_jitter: 0.0,
            bus_channel: "ouroboros-cache:bus".to_string(),
            purge_local_on_reconnect: true,
            bus_retry_queue_enabled: true,
            bus_retry_queue_max_size: 1_000,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Load configuration from the environment
    ///
    /// A `.env` file is read first when present. Recognized variables:
    /// `OUROBOROS_CACHE_PHYSICAL_TTL_MS`, `OUROBOROS_CACHE_LOGICAL_TTL_MS`,
    /// `OUROBOROS_CACHE_GRACEFUL_RETAIN`, `OUROBOROS_CACHE_TIMEOUT_MS`,
    /// `OUROBOROS_CACHE_TTL_JITTER` and `OUROBOROS_CACHE_BUS_CHANNEL`.
    /// A TTL of `0` for the physical TTL means "never expire".
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = CacheConfig::default();

        if let Some(ms) = env_parse::<u64>("PHYSICAL_TTL_MS")? {
            config.physical_ttl = if ms == 0 {
                None
            } else {
                Some(Duration::from_millis(ms))
            };
        }
        if let Some(ms) = env_parse::<u64>("LOGICAL_TTL_MS")? {
            config.logical_ttl = Some(Duration::from_millis(ms));
        }
        if let Some(enabled) = env_parse::<bool>("GRACEFUL_RETAIN")? {
            config.graceful_retain = enabled;
        }
        if let Some(ms) = env_parse::<u64>("TIMEOUT_MS")? {
            config.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(jitter) = env_parse::<f64>("TTL_JITTER")? {
            config.ttl_jitter = jitter;
        }
        if let Ok(channel) = std::env::var(format!("{}BUS_CHANNEL", ENV_PREFIX)) {
            config.bus_channel = channel;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if let (Some(logical), Some(physical)) = (self.logical_ttl, self.physical_ttl) {
            if logical > physical {
                return Err(CacheError::ConfigError(
                    "logical_ttl must not exceed physical_ttl".to_string(),
                ));
            }
        }

        if self.bus_channel.is_empty() {
            return Err(CacheError::ConfigError(
                "bus_channel must not be empty".to_string(),
            ));
        }

        if self.bus_retry_queue_enabled && self.bus_retry_queue_max_size == 0 {
            return Err(CacheError::ConfigError(
                "bus_retry_queue_max_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply jitter to a TTL
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;

        Duration::from_secs_f64((base_secs + jitter).max(0.0))
    }

    /// Resolve per-call overrides against these defaults
    pub fn resolve(&self, overrides: &CacheOptions) -> CacheItemOptions {
        let physical_ttl = overrides.physical_ttl.unwrap_or(self.physical_ttl);

        let logical_ttl = overrides
            .logical_ttl
            .unwrap_or(self.logical_ttl)
            .map(|ttl| self.ttl_with_jitter(ttl))
            .or(physical_ttl);

        // logical <= physical
        let logical_ttl = match (logical_ttl, physical_ttl) {
            (Some(logical), Some(physical)) => Some(logical.min(physical)),
            (None, Some(physical)) => Some(physical),
            (logical, None) => logical,
        };

        CacheItemOptions {
            physical_ttl,
            logical_ttl,
            graceful_retain: overrides.graceful_retain.unwrap_or(self.graceful_retain),
            timeout: overrides.timeout.unwrap_or(self.timeout),
        }
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    physical_ttl: Option<Option<Duration>>,
    logical_ttl: Option<Duration>,
    graceful_retain: Option<bool>,
    timeout: Option<Duration>,
    ttl_jitter: Option<f64>,
    bus_channel: Option<String>,
    purge_local_on_reconnect: Option<bool>,
    bus_retry_queue_enabled: Option<bool>,
    bus_retry_queue_max_size: Option<usize>,
}

impl CacheConfigBuilder {
    /// Set the default physical (hard) TTL
    pub fn physical_ttl(mut self, ttl: Duration) -> Self {
        self.physical_ttl = Some(Some(ttl));
        self
    }

    /// Store items without a hard expiry by default
    pub fn no_expiry(mut self) -> Self {
        self.physical_ttl = Some(None);
        self
    }

    /// Set the default logical (soft) TTL
    pub fn logical_ttl(mut self, ttl: Duration) -> Self {
        self.logical_ttl = Some(ttl);
        self
    }

    /// Enable or disable graceful retain
    pub fn graceful_retain(mut self, enable: bool) -> Self {
        self.graceful_retain = Some(enable);
        self
    }

    /// Set the fetch timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the invalidation bus channel
    pub fn bus_channel(mut self, channel: impl Into<String>) -> Self {
        self.bus_channel = Some(channel.into());
        self
    }

    /// Enable or disable the local purge on bus reconnect
    pub fn purge_local_on_reconnect(mut self, enable: bool) -> Self {
        self.purge_local_on_reconnect = Some(enable);
        self
    }

    /// Enable or disable the bus retry queue
    pub fn bus_retry_queue_enabled(mut self, enable: bool) -> Self {
        self.bus_retry_queue_enabled = Some(enable);
        self
    }

    /// Set the bus retry queue capacity
    pub fn bus_retry_queue_max_size(mut self, size: usize) -> Self {
        self.bus_retry_queue_max_size = Some(size);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            physical_ttl: self.physical_ttl.unwrap_or(defaults.physical_ttl),
            logical_ttl: self.logical_ttl.or(defaults.logical_ttl),
            graceful_retain: self.graceful_retain.unwrap_or(defaults.graceful_retain),
            timeout: self.timeout.or(defaults.timeout),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            bus_channel: self.bus_channel.unwrap_or(defaults.bus_channel),
            purge_local_on_reconnect: self
                .purge_local_on_reconnect
                .unwrap_or(defaults.purge_local_on_reconnect),
            bus_retry_queue_enabled: self
                .bus_retry_queue_enabled
                .unwrap_or(defaults.bus_retry_queue_enabled),
            bus_retry_queue_max_size: self
                .bus_retry_queue_max_size
                .unwrap_or(defaults.bus_retry_queue_max_size),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Short-lived data that should never be served stale
    pub fn realtime() -> Self {
        Self {
            physical_ttl: Some(Duration::from_secs(10)),
            logical_ttl: None,
            graceful_retain: false,
            timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        }
    }

    /// Availability first: one hour fresh, six more hours of stale fallback
    pub fn resilient() -> Self {
        Self {
            physical_ttl: Some(Duration::from_secs(7 * 3600)),
            logical_ttl: Some(Duration::from_secs(3600)),
            graceful_retain: true,
            timeout: Some(Duration::from_secs(2)),
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }
}

/// Per-call overrides of the instance configuration
///
/// Unset fields fall back to [`CacheConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    physical_ttl: Option<Option<Duration>>,
    logical_ttl: Option<Option<Duration>>,
    graceful_retain: Option<bool>,
    timeout: Option<Option<Duration>>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hard expiry for this call. `Duration::ZERO` means "do not store".
    pub fn physical_ttl(mut self, ttl: Duration) -> Self {
        self.physical_ttl = Some(Some(ttl));
        self
    }

    /// Soft expiry for this call
    pub fn logical_ttl(mut self, ttl: Duration) -> Self {
        self.logical_ttl = Some(Some(ttl));
        self
    }

    /// Never expire, neither logically nor physically
    pub fn forever(mut self) -> Self {
        self.physical_ttl = Some(None);
        self.logical_ttl = Some(None);
        self
    }

    pub fn graceful_retain(mut self, enable: bool) -> Self {
        self.graceful_retain = Some(enable);
        self
    }

    /// Bound remote reads and loader calls for this call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    /// Wait indefinitely for this call
    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }
}

/// Fully resolved options for one cache operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheItemOptions {
    pub physical_ttl: Option<Duration>,
    pub logical_ttl: Option<Duration>,
    pub graceful_retain: bool,
    pub timeout: Option<Duration>,
}

impl CacheItemOptions {
    /// Whether a write with these options would be dead on arrival
    pub fn is_doomed(&self) -> bool {
        !self.graceful_retain && matches!(self.physical_ttl, Some(ttl) if ttl.is_zero())
    }

    /// Same options with a different physical TTL, clamping the logical TTL
    pub fn with_physical_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.physical_ttl = ttl;
        if let (Some(logical), Some(physical)) = (self.logical_ttl, ttl) {
            self.logical_ttl = Some(logical.min(physical));
        }
        self
    }
}

impl Default for CacheItemOptions {
    fn default() -> Self {
        CacheConfig::default().resolve(&CacheOptions::default())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let var = format!("{}{}", ENV_PREFIX, name);
    match std::env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::ConfigError(format!("{}: {}", var, e))),
        Err(_) => Ok(None),
    }
}
