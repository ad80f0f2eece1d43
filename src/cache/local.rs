//! In-process cache tier
//!
//! [`LocalCache`] wraps a [`CacheDriver`] and adds item awareness: reads parse
//! the stored [`CacheItem`], and writes that could never be served are turned
//! into deletes.

use crate::cache::config::CacheItemOptions;
use crate::cache::driver::CacheDriver;
use crate::cache::item::CacheItem;
use crate::error::Result;
use std::sync::Arc;
use tracing::trace;

/// Local (in-memory) cache tier
#[derive(Clone)]
pub struct LocalCache {
    driver: Arc<dyn CacheDriver>,
}

impl LocalCache {
    /// Create a local tier over the given driver
    pub fn new(driver: Arc<dyn CacheDriver>) -> Self {
        Self { driver }
    }

    /// Get an item from the local cache
    ///
    /// Freshness is not evaluated here. A malformed entry surfaces as
    /// [`CacheError::CorruptEntry`](crate::error::CacheError::CorruptEntry).
    pub async fn get(&self, key: &str, _options: &CacheItemOptions) -> Result<Option<CacheItem>> {
        trace!(context = "local_cache", key, "getting local cache item");

        let Some(raw) = self.driver.get(key).await? else {
            trace!(context = "local_cache", key, "local cache item not found");
            return Ok(None);
        };

        CacheItem::from_driver(key, &raw).map(Some)
    }

    /// Set a serialized item in the local cache
    pub async fn set(&self, key: &str, raw: String, options: &CacheItemOptions) -> Result<()> {
        // Dead on arrival: remove whatever is there instead
        if options.is_doomed() {
            return self.delete(key, Some(options)).await.map(|_| ());
        }

        trace!(context = "local_cache", key, ttl = ?options.physical_ttl, "saving local cache item");
        self.driver.set(key, raw, options.physical_ttl).await
    }

    /// Delete an item from the local cache
    pub async fn delete(&self, key: &str, _options: Option<&CacheItemOptions>) -> Result<bool> {
        trace!(context = "local_cache", key, "deleting local cache item");
        self.driver.delete(key).await
    }

    /// Delete many items from the local cache
    pub async fn delete_many(&self, keys: &[String], _options: Option<&CacheItemOptions>) -> Result<()> {
        trace!(context = "local_cache", ?keys, "deleting local cache items");
        self.driver.delete_many(keys).await
    }

    /// Drop every local item
    pub async fn clear(&self) -> Result<()> {
        trace!(context = "local_cache", "clearing local cache");
        self.driver.clear().await
    }

    /// Release the underlying driver
    pub async fn disconnect(&self) -> Result<()> {
        self.driver.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{CacheConfig, CacheOptions};
    use crate::cache::drivers::MemoryDriver;
    use crate::error::CacheError;
    use std::time::Duration;

    fn local() -> (LocalCache, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        (LocalCache::new(driver.clone()), driver)
    }

    #[tokio::test]
    async fn test_set_and_get_item() {
        let (cache, _) = local();
        let options = CacheItemOptions::default();
        let item = CacheItem::new("key1", "value1", &options);

        cache.set("key1", item.serialize().unwrap(), &options).await.unwrap();

        let fetched = cache.get("key1", &options).await.unwrap().unwrap();
        assert_eq!(fetched.value, "value1");
        assert_eq!(fetched.key, "key1");
    }

    #[tokio::test]
    async fn test_missing_item() {
        let (cache, _) = local();
        let fetched = cache.get("nope", &CacheItemOptions::default()).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_doomed_write_becomes_delete() {
        let (cache, driver) = local();
        let config = CacheConfig::default();

        let options = CacheItemOptions::default();
        let item = CacheItem::new("key1", "old", &options);
        cache.set("key1", item.serialize().unwrap(), &options).await.unwrap();

        let doomed = config.resolve(&CacheOptions::new().physical_ttl(Duration::ZERO));
        let item = CacheItem::new("key1", "new", &doomed);
        cache.set("key1", item.serialize().unwrap(), &doomed).await.unwrap();

        assert!(cache.get("key1", &doomed).await.unwrap().is_none());
        assert_eq!(driver.len().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        let (cache, driver) = local();
        driver.set("key1", "garbage".to_string(), None).await.unwrap();

        let result = cache.get("key1", &CacheItemOptions::default()).await;
        assert!(matches!(result, Err(CacheError::CorruptEntry { .. })));
    }

    #[tokio::test]
    async fn test_delete_many_and_clear() {
        let (cache, driver) = local();
        let options = CacheItemOptions::default();
        for key in ["a", "b", "c"] {
            let item = CacheItem::new(key, "v", &options);
            cache.set(key, item.serialize().unwrap(), &options).await.unwrap();
        }

        cache
            .delete_many(&["a".to_string(), "b".to_string()], None)
            .await
            .unwrap();
        assert_eq!(driver.len().await, 1);

        cache.clear().await.unwrap();
        assert_eq!(driver.len().await, 0);
    }
}
