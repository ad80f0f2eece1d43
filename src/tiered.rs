//! Two-tier cache orchestration
//!
//! [`TieredCache`] reads the local tier first, then the remote tier, then the
//! loader, writing values back down the chain. Concurrent misses on a key
//! share one fetch, stale items can be served while a refresh runs in the
//! background, and writes are announced on the invalidation bus so peers
//! drop their local copies.

use crate::bus::{
    BusDriver, BusEncoder, BusOptions, BusState, CacheBusMessage, CacheBusMessageType,
    InvalidationBus, JsonBusEncoder,
};
use crate::cache::{
    CacheConfig, CacheDriver, CacheItem, CacheItemOptions, CacheKey, CacheOptions, CacheStats,
    CacheValue, LocalCache, RemoteCache,
};
use crate::cache::types::StatsRecorder;
use crate::error::{CacheError, Result};
use crate::stampede::StampedeGuard;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Produces a value for a key that no tier could answer
type Loader = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<CacheValue>> + Send + Sync>;

/// Where a fetch found its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchSource {
    Local,
    Remote,
    Loader,
    Stale,
    Miss,
}

#[derive(Debug, Clone)]
struct Fetched {
    item: Option<CacheItem>,
    source: FetchSource,
}

impl Fetched {
    fn new(item: Option<CacheItem>, source: FetchSource) -> Self {
        Self { item, source }
    }

    /// Whether a caller with these options may take this outcome as-is
    fn answers(&self, options: &CacheItemOptions, has_loader: bool) -> bool {
        match self.source {
            FetchSource::Stale => options.graceful_retain,
            FetchSource::Miss => !has_loader,
            _ => true,
        }
    }
}

/// Local + remote cache kept coherent through an invalidation bus
///
/// Cloning is cheap; clones share the same tiers, bus and statistics.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<TieredInner>,
}

struct TieredInner {
    config: CacheConfig,
    local: LocalCache,
    remote: Option<RemoteCache>,
    bus: Option<InvalidationBus>,
    stampede: StampedeGuard<Fetched>,
    stats: StatsRecorder,
}

/// Builder for [`TieredCache`]
pub struct TieredCacheBuilder {
    local: Arc<dyn CacheDriver>,
    remote: Option<Arc<dyn CacheDriver>>,
    bus: Option<(Arc<dyn BusDriver>, Arc<dyn BusEncoder>)>,
    config: CacheConfig,
}

impl TieredCacheBuilder {
    /// Shared remote tier
    pub fn remote(mut self, driver: Arc<dyn CacheDriver>) -> Self {
        self.remote = Some(driver);
        self
    }

    /// Invalidation bus transport, with JSON messages
    pub fn bus(self, driver: Arc<dyn BusDriver>) -> Self {
        self.bus_with_encoder(driver, Arc::new(JsonBusEncoder))
    }

    /// Invalidation bus transport with a custom wire encoding
    pub fn bus_with_encoder(mut self, driver: Arc<dyn BusDriver>, encoder: Arc<dyn BusEncoder>) -> Self {
        self.bus = Some((driver, encoder));
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and subscribe to the bus
    pub async fn build(self) -> Result<TieredCache> {
        self.config.validate()?;

        let bus_options = BusOptions {
            retry_queue_enabled: self.config.bus_retry_queue_enabled,
            retry_queue_max_size: self.config.bus_retry_queue_max_size,
        };
        let bus = self
            .bus
            .map(|(driver, encoder)| InvalidationBus::new(driver, encoder, bus_options));

        let inner = Arc::new(TieredInner {
            local: LocalCache::new(self.local),
            remote: self.remote.map(RemoteCache::new),
            bus,
            stampede: StampedeGuard::new(),
            stats: StatsRecorder::default(),
            config: self.config,
        });

        if let Some(bus) = &inner.bus {
            let weak = Arc::downgrade(&inner);
            bus.subscribe(&inner.config.bus_channel, move |message| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_bus_message(message).await;
                    }
                }
            })
            .await?;

            if inner.config.purge_local_on_reconnect {
                let weak = Arc::downgrade(&inner);
                bus.on_reconnect(move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.purge_local().await;
                        }
                    }
                })
                .await;
            }
        }

        info!(
            "Tiered cache ready (remote: {}, bus: {})",
            inner.remote.as_ref().map_or("none", |r| r.backend()),
            inner.bus.as_ref().map_or("none", |b| b.bus_id())
        );

        Ok(TieredCache { inner })
    }
}

impl TieredInner {
    async fn handle_bus_message(&self, message: CacheBusMessage) {
        StatsRecorder::incr(&self.stats.bus_received);
        debug!(
            "Bus {} from {} invalidates {} local keys",
            message.message_type,
            message.bus_id,
            message.keys.len()
        );

        if let Err(e) = self.local.delete_many(&message.keys, None).await {
            error!("Failed to invalidate local keys {:?}: {}", message.keys, e);
        }
    }

    async fn purge_local(&self) {
        info!("Bus reconnected, purging local tier");
        if let Err(e) = self.local.clear().await {
            error!("Failed to purge local tier: {}", e);
        }
    }
}

impl TieredCache {
    /// Start building a cache over the given local driver
    pub fn builder(local: Arc<dyn CacheDriver>) -> TieredCacheBuilder {
        TieredCacheBuilder {
            local,
            remote: None,
            bus: None,
            config: CacheConfig::default(),
        }
    }

    /// Get a value, or `None` when no tier has it
    pub async fn get(&self, key: &str, options: &CacheOptions) -> Result<Option<CacheValue>> {
        let options = self.inner.config.resolve(options);
        let item = self.lookup(key, None, &options).await?;
        Ok(item.map(|item| item.value))
    }

    /// Get a value, calling `loader` when no tier has it
    ///
    /// Concurrent calls for the same key share a single loader call. The
    /// loaded value is written to both tiers and announced on the bus.
    pub async fn get_or_set<F, Fut>(&self, key: &str, loader: F, options: &CacheOptions) -> Result<CacheValue>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CacheValue>> + Send + 'static,
    {
        let options = self.inner.config.resolve(options);
        let loader: Loader = Arc::new(move || loader().boxed());

        self.lookup(key, Some(loader), &options)
            .await?
            .map(|item| item.value)
            .ok_or_else(|| CacheError::Other(format!("no value produced for key {}", key)))
    }

    /// Write a value to both tiers and notify peers
    pub async fn set(&self, key: &str, value: impl Into<CacheValue>, options: &CacheOptions) -> Result<()> {
        let options = self.inner.config.resolve(options);
        self.store(key, value.into(), &options).await.map(|_| ())
    }

    /// Write a value that never expires
    pub async fn set_forever(&self, key: &str, value: impl Into<CacheValue>) -> Result<()> {
        self.set(key, value, &CacheOptions::new().forever()).await
    }

    /// Remove a key from both tiers and notify peers
    ///
    /// Returns whether either tier held the key.
    pub async fn delete(&self, key: &str, options: &CacheOptions) -> Result<bool> {
        let options = self.inner.config.resolve(options);
        let removed_local = self.inner.local.delete(key, Some(&options)).await?;

        let removed_remote = match &self.inner.remote {
            Some(remote) => remote
                .delete(key, Some(&options))
                .await
                .unwrap_or_else(|e| {
                    self.remote_failed("delete", key, &e);
                    false
                }),
            None => false,
        };

        self.publish(CacheBusMessageType::Delete, vec![key.to_string()])
            .await;
        Ok(removed_local || removed_remote)
    }

    /// Remove several keys from both tiers with a single bus message
    pub async fn delete_many(&self, keys: &[CacheKey], options: &CacheOptions) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let options = self.inner.config.resolve(options);
        self.inner.local.delete_many(keys, Some(&options)).await?;

        if let Some(remote) = &self.inner.remote {
            if let Err(e) = remote.delete_many(keys, Some(&options)).await {
                self.remote_failed("delete_many", &keys.join(","), &e);
            }
        }

        self.publish(CacheBusMessageType::Delete, keys.to_vec()).await;
        Ok(())
    }

    /// Whether a value (fresh or served under grace) exists for `key`
    pub async fn has(&self, key: &str, options: &CacheOptions) -> Result<bool> {
        Ok(self.get(key, options).await?.is_some())
    }

    pub async fn missing(&self, key: &str, options: &CacheOptions) -> Result<bool> {
        Ok(!self.has(key, options).await?)
    }

    /// Get a value and remove it
    pub async fn pull(&self, key: &str, options: &CacheOptions) -> Result<Option<CacheValue>> {
        let value = self.get(key, options).await?;
        if value.is_some() {
            self.delete(key, options).await?;
        }
        Ok(value)
    }

    /// Get a JSON-encoded value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> Result<Option<T>> {
        match self.get(key, options).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Set a value encoded as JSON
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, options).await
    }

    /// [`get_or_set`](Self::get_or_set) for JSON-encoded values
    pub async fn get_or_set_json<T, F, Fut>(&self, key: &str, loader: F, options: &CacheOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let raw = self
            .get_or_set(
                key,
                move || {
                    let fut = loader();
                    async move {
                        let value = fut.await?;
                        Ok::<_, anyhow::Error>(serde_json::to_string(&value)?)
                    }
                },
                options,
            )
            .await?;

        Ok(serde_json::from_str(&raw)?)
    }

    /// Snapshot of the read and bus counters
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Identifier of this instance on the bus, if one is configured
    pub fn bus_id(&self) -> Option<&str> {
        self.inner.bus.as_ref().map(|bus| bus.bus_id())
    }

    pub fn bus_state(&self) -> Option<BusState> {
        self.inner.bus.as_ref().map(|bus| bus.state())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Number of keys with a fetch in flight
    pub fn in_flight(&self) -> usize {
        self.inner.stampede.in_flight()
    }

    /// Close the bus and both drivers
    ///
    /// Bus and remote failures are logged; only a local failure is returned.
    pub async fn disconnect_all(&self) -> Result<()> {
        info!("Disconnecting tiered cache");

        if let Some(bus) = &self.inner.bus {
            if let Err(e) = bus.disconnect().await {
                warn!("Failed to disconnect bus: {}", e);
            }
        }

        if let Some(remote) = &self.inner.remote {
            if let Err(e) = remote.disconnect().await {
                warn!("Failed to disconnect remote tier: {}", e);
            }
        }

        self.inner.local.disconnect().await
    }

    async fn lookup(&self, key: &str, loader: Option<Loader>, options: &CacheItemOptions) -> Result<Option<CacheItem>> {
        let now = Utc::now();

        match self.read_local(key, options).await? {
            Some(item) if item.is_fresh(now) => {
                trace!("Local hit: {}", key);
                StatsRecorder::incr(&self.inner.stats.local_hits);
                return Ok(Some(item));
            }
            Some(item) if options.graceful_retain && !item.is_physically_expired(now) => {
                debug!("Serving stale value for {} while refreshing", key);
                StatsRecorder::incr(&self.inner.stats.stale_hits);
                self.refresh_in_background(key, loader, options, item.clone());
                return Ok(Some(item));
            }
            // Stale without grace is refetched like a miss
            _ => {}
        }

        let has_loader = loader.is_some();
        let mut fetched = self.fetch_shared(key, loader.clone(), options).await?;

        // A joined fetch ran with its starter's loader and grace setting
        if !fetched.answers(options, has_loader) {
            trace!("Joined fetch for {} does not answer this call, retrying", key);
            fetched = self.fetch_shared(key, loader.clone(), options).await?;
        }
        if !fetched.answers(options, has_loader) {
            fetched = self
                .clone()
                .fetch_from_source(key.to_string(), loader, *options, None)
                .await?;
        }

        self.record(fetched.source);
        Ok(fetched.item)
    }

    async fn fetch_shared(&self, key: &str, loader: Option<Loader>, options: &CacheItemOptions) -> Result<Fetched> {
        let this = self.clone();
        let owned_key = key.to_string();
        let options = *options;

        self.inner
            .stampede
            .run(key, None, move || this.fetch_from_source(owned_key, loader, options, None))
            .await
    }

    fn refresh_in_background(&self, key: &str, loader: Option<Loader>, options: &CacheItemOptions, stale: CacheItem) {
        let this = self.clone();
        let owned_key = key.to_string();
        let options = *options;

        let started = self.inner.stampede.spawn(key, None, move || {
            this.fetch_from_source(owned_key, loader, options, Some(stale))
        });

        if started {
            debug!("Background refresh started for key: {}", key);
        }
    }

    /// Remote tier, then loader, with grace fallback to `stale`
    async fn fetch_from_source(
        self,
        key: String,
        loader: Option<Loader>,
        options: CacheItemOptions,
        mut stale: Option<CacheItem>,
    ) -> Result<Fetched> {
        // Another caller may have filled the local tier since our miss
        if let Some(item) = self.read_local(&key, &options).await? {
            if item.is_fresh(Utc::now()) {
                return Ok(Fetched::new(Some(item), FetchSource::Local));
            }
        }

        if let Some(remote) = &self.inner.remote {
            match remote.get(&key, &options).await {
                Ok(Some(item)) => {
                    let now = Utc::now();
                    if item.is_fresh(now) {
                        trace!("Remote hit: {}", key);
                        self.promote(&item, &options, now).await?;
                        return Ok(Fetched::new(Some(item), FetchSource::Remote));
                    }
                    if options.graceful_retain && !item.is_physically_expired(now) {
                        stale = Some(match stale {
                            Some(local) if local.created_at >= item.created_at => local,
                            _ => item,
                        });
                    }
                }
                Ok(None) => {}
                Err(e) => self.remote_failed("get", &key, &e),
            }
        }

        // An unreachable remote without a loader degrades to a miss
        let Some(loader) = loader else {
            return match stale {
                Some(item) => Ok(Fetched::new(Some(item), FetchSource::Stale)),
                None => {
                    trace!("Miss: {}", key);
                    Ok(Fetched::new(None, FetchSource::Miss))
                }
            };
        };

        StatsRecorder::incr(&self.inner.stats.loader_calls);
        debug!("Calling loader for key: {}", key);

        let loaded = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, loader()).await {
                Ok(result) => result.map_err(|e| CacheError::LoaderError(format!("{:#}", e))),
                Err(_) => Err(CacheError::FetchTimeout {
                    key: key.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => loader()
                .await
                .map_err(|e| CacheError::LoaderError(format!("{:#}", e))),
        };

        match loaded {
            Ok(value) => {
                let item = self.store(&key, value, &options).await?;
                Ok(Fetched::new(Some(item), FetchSource::Loader))
            }
            Err(e) => match stale {
                Some(item) if e.allows_grace_fallback() => {
                    warn!("Serving stale value for {} after fetch failure: {}", key, e);
                    Ok(Fetched::new(Some(item), FetchSource::Stale))
                }
                _ => Err(e),
            },
        }
    }

    async fn read_local(&self, key: &str, options: &CacheItemOptions) -> Result<Option<CacheItem>> {
        match self.inner.local.get(key, options).await {
            Ok(item) => Ok(item),
            Err(CacheError::CorruptEntry { reason, .. }) => {
                warn!("Discarding corrupt local entry for {}: {}", key, reason);
                self.inner.local.delete(key, Some(options)).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Copy a remote item into the local tier for its remaining lifetime
    async fn promote(&self, item: &CacheItem, options: &CacheItemOptions, now: DateTime<Utc>) -> Result<()> {
        let local_options = options.with_physical_ttl(item.remaining_physical_ttl(now));
        self.inner
            .local
            .set(&item.key, item.serialize()?, &local_options)
            .await
    }

    /// Write through both tiers and announce the change
    async fn store(&self, key: &str, value: CacheValue, options: &CacheItemOptions) -> Result<CacheItem> {
        let item = CacheItem::new(key, value, options);
        let raw = item.serialize()?;

        self.inner.local.set(key, raw.clone(), options).await?;

        if let Some(remote) = &self.inner.remote {
            if let Err(e) = remote.set(key, raw, options).await {
                self.remote_failed("set", key, &e);
            }
        }

        self.publish(CacheBusMessageType::Set, vec![key.to_string()])
            .await;
        Ok(item)
    }

    async fn publish(&self, message_type: CacheBusMessageType, keys: Vec<CacheKey>) {
        let Some(bus) = &self.inner.bus else {
            return;
        };

        match bus
            .publish(&self.inner.config.bus_channel, message_type, keys)
            .await
        {
            Ok(()) => StatsRecorder::incr(&self.inner.stats.bus_published),
            Err(e) => {
                StatsRecorder::incr(&self.inner.stats.bus_publish_failures);
                debug!("Bus {} not delivered: {}", message_type, e);
            }
        }
    }

    fn remote_failed(&self, op: &str, key: &str, error: &CacheError) {
        StatsRecorder::incr(&self.inner.stats.remote_errors);
        warn!("Remote {} failed for {}: {}", op, key, error);
    }

    fn record(&self, source: FetchSource) {
        let stats = &self.inner.stats;
        match source {
            FetchSource::Local => StatsRecorder::incr(&stats.local_hits),
            FetchSource::Remote => StatsRecorder::incr(&stats.remote_hits),
            FetchSource::Stale => StatsRecorder::incr(&stats.stale_hits),
            FetchSource::Loader | FetchSource::Miss => StatsRecorder::incr(&stats.misses),
        }
    }
}
