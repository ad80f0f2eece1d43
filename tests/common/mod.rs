//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use ouroboros_cache::{
    CacheConfig, CacheDriver, CacheError, CacheValue, MemoryBus, MemoryBusDriver, MemoryDriver,
    Result, TieredCache,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory driver whose availability and latency can be changed at runtime
#[derive(Default)]
pub struct FlakyDriver {
    inner: MemoryDriver,
    down: AtomicBool,
    delay_ms: AtomicU64,
}

impl FlakyDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn check(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::driver("flaky", "connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheDriver for FlakyDriver {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.check().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.check().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check().await?;
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.check().await?;
        self.inner.clear().await
    }
}

/// One cache instance as a separate process would see it
pub struct Instance {
    pub cache: TieredCache,
    pub local: Arc<MemoryDriver>,
    pub bus: Arc<MemoryBusDriver>,
}

pub async fn instance(remote: Arc<dyn CacheDriver>, hub: &MemoryBus, config: CacheConfig) -> Instance {
    let local = Arc::new(MemoryDriver::new());
    let bus = Arc::new(hub.driver());

    let cache = TieredCache::builder(local.clone())
        .remote(remote)
        .bus(bus.clone())
        .config(config)
        .build()
        .await
        .expect("failed to build cache instance");

    Instance { cache, local, bus }
}

/// Two instances sharing a remote store and a bus
pub async fn instance_pair(config: CacheConfig) -> (Instance, Instance, Arc<FlakyDriver>, MemoryBus) {
    let remote = Arc::new(FlakyDriver::new());
    let hub = MemoryBus::new();

    let a = instance(remote.clone(), &hub, config.clone()).await;
    let b = instance(remote.clone(), &hub, config).await;
    (a, b, remote, hub)
}

/// Loader counting its calls, answering `value` after `delay`
pub fn counting_loader(
    calls: Arc<AtomicUsize>,
    value: &str,
    delay: Duration,
) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
    let value = value.to_string();
    move || {
        let calls = calls.clone();
        let value = value.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(value)
        }
        .boxed()
    }
}

/// Loader that always fails
pub fn failing_loader(
    calls: Arc<AtomicUsize>,
) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
    move || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("source of truth unavailable"))
        }
        .boxed()
    }
}

/// Config with short TTLs for expiry tests
pub fn short_lived(logical: Duration, physical: Duration, graceful: bool) -> CacheConfig {
    CacheConfig::builder()
        .physical_ttl(physical)
        .logical_ttl(logical)
        .graceful_retain(graceful)
        .build()
}
