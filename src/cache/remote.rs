//! Network-backed cache tier
//!
//! [`RemoteCache`] has the same item-aware contract as
//! [`LocalCache`](crate::cache::local::LocalCache) but treats the driver as
//! unreliable: calls are bounded by the per-call timeout and every failure is
//! reported as [`CacheError::RemoteUnavailable`] so the tiered cache can apply
//! its grace fallback uniformly.

use crate::cache::config::CacheItemOptions;
use crate::cache::driver::CacheDriver;
use crate::cache::item::CacheItem;
use crate::error::{CacheError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Remote (shared) cache tier
#[derive(Clone)]
pub struct RemoteCache {
    driver: Arc<dyn CacheDriver>,
}

impl RemoteCache {
    pub fn new(driver: Arc<dyn CacheDriver>) -> Self {
        Self { driver }
    }

    /// Name of the underlying driver
    pub fn backend(&self) -> &str {
        self.driver.name()
    }

    /// Get an item from the remote cache
    ///
    /// A malformed entry is logged and reported as a miss.
    pub async fn get(&self, key: &str, options: &CacheItemOptions) -> Result<Option<CacheItem>> {
        trace!(context = "remote_cache", key, "getting remote cache item");

        let raw = self
            .bounded("get", key, options.timeout, self.driver.get(key))
            .await?;

        let Some(raw) = raw else {
            trace!(context = "remote_cache", key, "remote cache item not found");
            return Ok(None);
        };

        match CacheItem::from_driver(key, &raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!(context = "remote_cache", key, error = %e, "ignoring corrupt remote cache item");
                Ok(None)
            }
        }
    }

    /// Set a serialized item in the remote cache
    pub async fn set(&self, key: &str, raw: String, options: &CacheItemOptions) -> Result<()> {
        if options.is_doomed() {
            return self.delete(key, Some(options)).await.map(|_| ());
        }

        trace!(context = "remote_cache", key, ttl = ?options.physical_ttl, "saving remote cache item");
        self.bounded(
            "set",
            key,
            options.timeout,
            self.driver.set(key, raw, options.physical_ttl),
        )
        .await
    }

    /// Delete an item from the remote cache
    pub async fn delete(&self, key: &str, options: Option<&CacheItemOptions>) -> Result<bool> {
        trace!(context = "remote_cache", key, "deleting remote cache item");
        let timeout = options.and_then(|o| o.timeout);
        self.bounded("delete", key, timeout, self.driver.delete(key))
            .await
    }

    /// Delete many items from the remote cache
    pub async fn delete_many(&self, keys: &[String], options: Option<&CacheItemOptions>) -> Result<()> {
        trace!(context = "remote_cache", ?keys, "deleting remote cache items");
        let timeout = options.and_then(|o| o.timeout);
        self.bounded("delete_many", "*", timeout, self.driver.delete_many(keys))
            .await
    }

    /// Release the underlying driver
    pub async fn disconnect(&self) -> Result<()> {
        self.driver
            .disconnect()
            .await
            .map_err(|e| self.unavailable(e))
    }

    async fn bounded<T, F>(&self, op: &str, key: &str, timeout: Option<Duration>, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(CacheError::RemoteUnavailable(format!(
                        "{} {} on {} timed out after {}ms",
                        op,
                        key,
                        self.driver.name(),
                        limit.as_millis()
                    )))
                }
            },
            None => call.await,
        };

        outcome.map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, error: CacheError) -> CacheError {
        match error {
            CacheError::RemoteUnavailable(_) => error,
            other => CacheError::RemoteUnavailable(format!("{}: {}", self.driver.name(), other)),
        }
    }
}
