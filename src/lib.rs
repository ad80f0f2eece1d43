//! # Ouroboros Cache (ouroboros-cache)
//!
//! A two-tier cache for services running several instances: a fast
//! per-process local tier in front of a shared remote tier, kept coherent
//! through an invalidation bus.
//!
//! ## Features
//!
//! - Dual TTLs: items go stale after their logical TTL and disappear after
//!   their physical TTL
//! - Grace period: stale items are served while a background refresh runs,
//!   or when the remote tier or the loader fails
//! - Stampede protection: concurrent misses on a key share a single fetch
//! - Bus invalidation: writes make peers drop their local copies; an
//!   instance ignores its own messages
//! - Pluggable storage and transport through the [`CacheDriver`],
//!   [`BusDriver`] and [`BusEncoder`] traits, with in-memory implementations
//!
//! ## Basic Usage
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheOptions, MemoryBus, MemoryDriver, TieredCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let remote = Arc::new(MemoryDriver::new());
//!     let hub = MemoryBus::new();
//!
//!     let config = CacheConfig::builder()
//!         .physical_ttl(Duration::from_secs(3600))
//!         .logical_ttl(Duration::from_secs(60))
//!         .graceful_retain(true)
//!         .build();
//!
//!     let cache = TieredCache::builder(Arc::new(MemoryDriver::new()))
//!         .remote(remote.clone())
//!         .bus(Arc::new(hub.driver()))
//!         .config(config)
//!         .build()
//!         .await?;
//!
//!     let user = cache
//!         .get_or_set(
//!             "user:42",
//!             || async { Ok("{\"name\":\"Ada\"}".to_string()) },
//!             &CacheOptions::default(),
//!         )
//!         .await?;
//!     println!("user:42 = {}", user);
//!
//!     println!("{}", cache.stats());
//!     cache.disconnect_all().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Per-call Options
//!
//! Instance defaults come from [`CacheConfig`] (see
//! [`CacheConfig::from_env`] for environment based setup). Any call can
//! override them:
//!
//! ```no_run
//! use ouroboros_cache::{CacheOptions, MemoryDriver, TieredCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = TieredCache::builder(Arc::new(MemoryDriver::new())).build().await?;
//!
//!     let options = CacheOptions::new()
//!         .physical_ttl(Duration::from_secs(30))
//!         .timeout(Duration::from_millis(200));
//!     cache.set("session:1", "alive", &options).await?;
//!
//!     // Physical TTL of zero without grace: nothing is stored
//!     let gone = CacheOptions::new().physical_ttl(Duration::ZERO);
//!     cache.set("session:2", "ephemeral", &gone).await?;
//!     assert!(cache.get("session:2", &gone).await?.is_none());
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod cache;
pub mod error;
pub mod stampede;
pub mod tiered;

// Re-export main types for convenience
pub use bus::{
    BusDriver, BusEncoder, BusOptions, BusState, CacheBusMessage, CacheBusMessageType,
    InvalidationBus, JsonBusEncoder, MemoryBus, MemoryBusDriver,
};
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheDriver, CacheItem, CacheItemOptions, CacheKey,
    CacheOptions, CacheStats, CacheValue, LocalCache, MemoryDriver, RemoteCache,
};
pub use error::{CacheError, Result};
pub use stampede::StampedeGuard;
pub use tiered::{TieredCache, TieredCacheBuilder};
