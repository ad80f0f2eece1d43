//! Cache item lifecycle with dual TTL support
//!
//! An item carries its own creation time and both TTLs so that a bare driver
//! lookup is enough to decide whether it is fresh, stale or dead. The stored
//! JSON layout is shared by every process reading the same remote store and
//! must stay stable:
//!
//! ```text
//! {"value":"...","createdAt":1700000000000,"logicalTtl":60000,"physicalTtl":120000}
//! ```

use crate::cache::config::CacheItemOptions;
use crate::cache::types::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value with its timing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    /// The cache key (not part of the stored representation)
    #[serde(skip)]
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// When the item was created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Soft expiry, `None` for never stale
    #[serde(default, with = "duration_ms")]
    pub logical_ttl: Option<Duration>,

    /// Hard expiry, `None` for never evicted
    #[serde(default, with = "duration_ms")]
    pub physical_ttl: Option<Duration>,

    /// Whether the writer allowed stale serving of this item
    #[serde(default)]
    pub graceful_retain: bool,
}

impl CacheItem {
    /// Create a new item stamped with the current time
    pub fn new(key: impl Into<CacheKey>, value: impl Into<CacheValue>, options: &CacheItemOptions) -> Self {
        Self::with_created_at(key, value, options, Utc::now())
    }

    /// Create an item with an explicit creation time
    pub fn with_created_at(
        key: impl Into<CacheKey>,
        value: impl Into<CacheValue>,
        options: &CacheItemOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        let logical_ttl = match (options.logical_ttl, options.physical_ttl) {
            (Some(logical), Some(physical)) => Some(logical.min(physical)),
            (None, Some(physical)) => Some(physical),
            (logical, None) => logical,
        };

        Self {
            key: key.into(),
            value: value.into(),
            created_at,
            logical_ttl,
            physical_ttl: options.physical_ttl,
            graceful_retain: options.graceful_retain,
        }
    }

    /// Rebuild an item from the raw string a driver returned
    pub fn from_driver(key: &str, raw: &str) -> Result<Self> {
        let mut item: CacheItem =
            serde_json::from_str(raw).map_err(|e| CacheError::CorruptEntry {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        if let (Some(logical), Some(physical)) = (item.logical_ttl, item.physical_ttl) {
            if logical > physical {
                return Err(CacheError::CorruptEntry {
                    key: key.to_string(),
                    reason: "logical TTL exceeds physical TTL".to_string(),
                });
            }
        }

        item.key = key.to_string();
        Ok(item)
    }

    /// Encode the item for storage
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// When the item becomes stale
    pub fn logical_expiration(&self) -> Option<DateTime<Utc>> {
        self.logical_ttl.and_then(|ttl| self.expires_after(ttl))
    }

    /// When the item must no longer be served at all
    pub fn physical_expiration(&self) -> Option<DateTime<Utc>> {
        self.physical_ttl.and_then(|ttl| self.expires_after(ttl))
    }

    // Overflowing TTLs behave like no expiry
    fn expires_after(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    /// Check if the item is stale at `now`
    pub fn is_logically_expired(&self, now: DateTime<Utc>) -> bool {
        self.logical_expiration().map_or(false, |at| now >= at)
    }

    /// Check if the item is dead at `now`
    pub fn is_physically_expired(&self, now: DateTime<Utc>) -> bool {
        self.physical_expiration().map_or(false, |at| now >= at)
    }

    /// Neither stale nor dead at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.is_logically_expired(now) && !self.is_physically_expired(now)
    }

    /// Physical TTL left at `now`, used when copying an item between tiers
    ///
    /// Returns `Some(Duration::ZERO)` for a dead item and `None` for an item
    /// that never expires.
    pub fn remaining_physical_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.physical_expiration()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Get the age of the item
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Serde adapter storing `Option<Duration>` as integer milliseconds or null
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ttl) => serializer.serialize_u64(ttl.as_millis().min(u64::MAX as u128) as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(logical_ms: u64, physical_ms: u64) -> CacheItemOptions {
        CacheItemOptions {
            physical_ttl: Some(Duration::from_millis(physical_ms)),
            logical_ttl: Some(Duration::from_millis(logical_ms)),
            graceful_retain: true,
            timeout: None,
        }
    }

    #[test]
    fn test_cache_item_creation() {
        let item = CacheItem::new("test_key", "test_value", &options(1_000, 5_000));

        assert_eq!(item.key, "test_key");
        assert_eq!(item.value, "test_value");
        assert_eq!(item.logical_ttl, Some(Duration::from_secs(1)));
        assert_eq!(item.physical_ttl, Some(Duration::from_secs(5)));
        assert!(!item.is_logically_expired(Utc::now()));
        assert!(!item.is_physically_expired(Utc::now()));
    }

    #[test]
    fn test_logical_ttl_clamped_to_physical() {
        let item = CacheItem::new("k", "v", &options(10_000, 2_000));
        assert_eq!(item.logical_ttl, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_dual_expiration() {
        let created = Utc::now() - chrono::Duration::milliseconds(1_500);
        let item = CacheItem::with_created_at("k", "v", &options(1_000, 5_000), created);
        let now = Utc::now();

        assert!(item.is_logically_expired(now));
        assert!(!item.is_physically_expired(now));
        assert!(!item.is_fresh(now));

        let later = created + chrono::Duration::milliseconds(5_000);
        assert!(item.is_physically_expired(later));
        assert_eq!(item.remaining_physical_ttl(later), Some(Duration::ZERO));
    }

    #[test]
    fn test_never_expiring_item() {
        let forever = CacheItemOptions {
            physical_ttl: None,
            logical_ttl: None,
            graceful_retain: false,
            timeout: None,
        };
        let item = CacheItem::new("k", "v", &forever);
        let far_future = Utc::now() + chrono::Duration::days(365 * 100);

        assert!(!item.is_logically_expired(far_future));
        assert!(!item.is_physically_expired(far_future));
        assert_eq!(item.remaining_physical_ttl(far_future), None);
    }

    #[test]
    fn test_stored_layout() {
        let created = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let item = CacheItem::with_created_at("k", "hello", &options(60_000, 120_000), created);

        let raw = item.serialize().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(json["value"], "hello");
        assert_eq!(json["createdAt"], 1_700_000_000_000i64);
        assert_eq!(json["logicalTtl"], 60_000);
        assert_eq!(json["physicalTtl"], 120_000);
        assert!(json.get("key").is_none());
    }

    #[test]
    fn test_from_driver_restores_lifecycle() {
        let raw = r#"{"value":"v1","createdAt":1700000000000,"logicalTtl":null,"physicalTtl":null}"#;
        let item = CacheItem::from_driver("user:1", raw).unwrap();

        assert_eq!(item.key, "user:1");
        assert_eq!(item.value, "v1");
        assert_eq!(item.logical_ttl, None);
        assert!(!item.graceful_retain);
        assert_eq!(item.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_from_driver_rejects_corrupt_entries() {
        for raw in ["not json", r#"{"value":"v"}"#, r#"{"value":1,"createdAt":0}"#] {
            let err = CacheItem::from_driver("k", raw).unwrap_err();
            assert!(matches!(err, CacheError::CorruptEntry { .. }), "{raw}");
        }

        let inverted = r#"{"value":"v","createdAt":0,"logicalTtl":10,"physicalTtl":5}"#;
        assert!(matches!(
            CacheItem::from_driver("k", inverted),
            Err(CacheError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_age() {
        let created = Utc::now() - chrono::Duration::seconds(3);
        let item = CacheItem::with_created_at("k", "v", &options(1_000, 5_000), created);
        assert!(item.age(Utc::now()) >= Duration::from_secs(3));
    }
}
