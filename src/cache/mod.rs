//! # Cache Tiers
//!
//! Building blocks shared by both tiers of a [`TieredCache`](crate::TieredCache).
//!
//! ## Features
//!
//! - **Dual TTL items**: a logical (soft) TTL after which an item is stale and
//!   a physical (hard) TTL after which it is gone
//! - **Pluggable storage**: any [`CacheDriver`] can back either tier
//! - **Self-describing entries**: items are stored as JSON carrying their own
//!   lifecycle, so every process reading the remote store agrees on freshness
//! - **Degrading remote tier**: remote failures are classified as
//!   `RemoteUnavailable` instead of failing the read
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{CacheConfig, CacheItem, CacheOptions, LocalCache, MemoryDriver};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .physical_ttl(Duration::from_secs(3600))
//!     .logical_ttl(Duration::from_secs(60))
//!     .graceful_retain(true)
//!     .build();
//!
//! let options = config.resolve(&CacheOptions::default());
//! let local = LocalCache::new(Arc::new(MemoryDriver::new()));
//!
//! let item = CacheItem::new("user:42", "{\"name\":\"Ada\"}", &options);
//! local.set("user:42", item.serialize()?, &options).await?;
//!
//! if let Some(item) = local.get("user:42", &options).await? {
//!     println!("Cached: {}", item.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod drivers;
pub mod item;
pub mod local;
pub mod remote;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, CacheItemOptions, CacheOptions};
pub use driver::CacheDriver;
pub use drivers::{start_auto_cleanup, MemoryDriver};
pub use item::CacheItem;
pub use local::LocalCache;
pub use remote::RemoteCache;
pub use types::{CacheKey, CacheStats, CacheValue};
