//! In-process cache driver with TTL expiry and LRU eviction

use crate::cache::driver::CacheDriver;
use crate::cache::types::{CacheKey, CacheValue};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Memory-backed [`CacheDriver`]
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Per-entry hard expiry
/// - LRU eviction when `max_entries` is reached
///
/// Typically used as the local tier, or shared between two caches to stand
/// in for a remote store in tests.
pub struct MemoryDriver {
    max_entries: usize,
    store: Arc<RwLock<MemoryStore>>,
}

/// Internal storage
#[derive(Default)]
struct MemoryStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, StoredValue>,

    /// LRU tracking: maintains access order
    lru_queue: VecDeque<CacheKey>,

    /// Entries dropped to respect `max_entries`
    evictions: u64,
}

struct StoredValue {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

impl MemoryDriver {
    /// Create a driver holding up to 10,000 entries
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    /// Create a driver with a custom entry limit
    pub fn with_max_entries(max_entries: usize) -> Self {
        debug!("Initializing memory cache driver (max_entries: {})", max_entries);

        Self {
            max_entries: max_entries.max(1),
            store: Arc::new(RwLock::new(MemoryStore::default())),
        }
    }

    /// Get number of stored entries, expired ones included until cleanup
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    /// Check if the driver is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Number of LRU evictions so far
    pub async fn evictions(&self) -> u64 {
        self.store.read().await.evictions
    }

    /// Remove all expired entries, returning the removed keys
    pub async fn cleanup_expired(&self) -> Vec<CacheKey> {
        let mut store = self.store.write().await;
        let now = Instant::now();

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            Self::remove_entry(&mut store, key);
        }

        if !expired_keys.is_empty() {
            debug!("Cleaned up {} expired entries", expired_keys.len());
        }

        expired_keys
    }

    /// Internal: Remove an entry from the store
    fn remove_entry(store: &mut MemoryStore, key: &str) -> bool {
        if store.entries.remove(key).is_some() {
            store.lru_queue.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Internal: Move a key to the most recently used position
    fn touch(store: &mut MemoryStore, key: &str) {
        store.lru_queue.retain(|k| k != key);
        store.lru_queue.push_back(key.to_string());
    }

    /// Internal: Evict entries until there is room for one more
    fn evict_if_needed(&self, store: &mut MemoryStore) {
        while store.entries.len() >= self.max_entries {
            if let Some(key) = store.lru_queue.pop_front() {
                debug!("Evicting entry due to max_entries limit: {}", key);
                store.entries.remove(&key);
                store.evictions += 1;
            } else {
                warn!("LRU queue empty while over max_entries");
                break;
            }
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut store = self.store.write().await;
        let now = Instant::now();

        match store.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!("Memory entry expired: {}", key);
                Self::remove_entry(&mut store, key);
                Ok(None)
            }
            Some(entry) => {
                let value = entry.value.clone();
                Self::touch(&mut store, key);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let mut store = self.store.write().await;
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));

        if let Some(existing) = store.entries.get_mut(key) {
            existing.value = value;
            existing.expires_at = expires_at;
        } else {
            self.evict_if_needed(&mut store);
            store
                .entries
                .insert(key.to_string(), StoredValue { value, expires_at });
        }
        Self::touch(&mut store, key);

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(Self::remove_entry(&mut store, key))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut store = self.store.write().await;
        for key in keys {
            Self::remove_entry(&mut store, key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.store.write().await;
        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();

        info!("Cleared {} entries from memory driver", count);
        Ok(())
    }
}

/// Background task for automatic cleanup of expired entries
pub async fn start_auto_cleanup(driver: Arc<MemoryDriver>, interval: Duration) {
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let removed = driver.cleanup_expired().await;
        if !removed.is_empty() {
            debug!("Auto cleanup: {} entries", removed.len());
        }
    }
}
