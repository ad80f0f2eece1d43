//! Storage backend contract
//!
//! Local and remote tiers both sit on a [`CacheDriver`]. A driver stores opaque
//! strings with an optional hard TTL and knows nothing about item lifecycles.

use crate::cache::types::CacheValue;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key/value storage with TTL support
///
/// Implementations must be safe for concurrent use. Only per-key
/// linearizability is expected. Failures are reported as
/// [`CacheError::DriverError`](crate::error::CacheError::DriverError).
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Short backend name used in logs and errors
    fn name(&self) -> &str;

    /// Get a raw value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Store a raw value. `ttl` of `None` never expires.
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove several keys
    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Remove every key
    async fn clear(&self) -> Result<()>;

    /// Release connections held by the driver
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
