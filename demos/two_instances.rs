//! Two Instances Demo
//!
//! Runs two cache instances in one process, sharing an in-memory remote tier
//! and an in-memory bus, and walks through read-through, invalidation, grace
//! period and statistics.
//!
//! Usage:
//!   cargo run --example two_instances
//!
//! Environment variables:
//!   RUST_LOG                          - log filter (default: info)
//!   OUROBOROS_CACHE_PHYSICAL_TTL_MS   - hard TTL (default: 30 minutes)
//!   OUROBOROS_CACHE_LOGICAL_TTL_MS    - soft TTL (default: 500ms for this demo)
//!   OUROBOROS_CACHE_GRACEFUL_RETAIN   - serve stale values (default: true for this demo)

use ouroboros_cache::{CacheConfig, CacheOptions, MemoryBus, MemoryDriver, TieredCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Tiered Cache Demo ===");

    let mut config = CacheConfig::from_env()?;
    if std::env::var("OUROBOROS_CACHE_LOGICAL_TTL_MS").is_err() {
        config.logical_ttl = Some(Duration::from_millis(500));
    }
    if std::env::var("OUROBOROS_CACHE_GRACEFUL_RETAIN").is_err() {
        config.graceful_retain = true;
    }

    let remote = Arc::new(MemoryDriver::new());
    let hub = MemoryBus::new();

    let cache_a = TieredCache::builder(Arc::new(MemoryDriver::new()))
        .remote(remote.clone())
        .bus(Arc::new(hub.driver()))
        .config(config.clone())
        .build()
        .await?;
    let cache_b = TieredCache::builder(Arc::new(MemoryDriver::new()))
        .remote(remote.clone())
        .bus(Arc::new(hub.driver()))
        .config(config)
        .build()
        .await?;

    let options = CacheOptions::default();
    let loads = Arc::new(AtomicUsize::new(0));

    info!("\n--- Read-through ---");
    let counter = loads.clone();
    let value = cache_a
        .get_or_set(
            "user:42",
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(format!("{{\"name\":\"Ada\",\"version\":{}}}", n))
                }
            },
            &options,
        )
        .await?;
    info!("A loaded user:42 = {}", value);
    info!("B reads user:42 = {:?}", cache_b.get("user:42", &options).await?);

    info!("\n--- Invalidation ---");
    cache_a.set("user:42", "{\"name\":\"Ada Lovelace\"}", &options).await?;
    info!("B after A's write = {:?}", cache_b.get("user:42", &options).await?);

    info!("\n--- Grace period ---");
    tokio::time::sleep(Duration::from_millis(600)).await;
    let counter = loads.clone();
    let stale = cache_b
        .get_or_set(
            "user:42",
            move || {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(format!("{{\"name\":\"Ada\",\"version\":{}}}", n))
                }
            },
            &options,
        )
        .await?;
    info!("B served immediately = {}", stale);
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("B after refresh = {:?}", cache_b.get("user:42", &options).await?);

    info!("\n--- Statistics ---");
    info!("A: {}", cache_a.stats());
    info!("B: {}", cache_b.stats());
    info!("Loader calls: {}", loads.load(Ordering::SeqCst));

    cache_a.disconnect_all().await?;
    cache_b.disconnect_all().await?;

    info!("\n=== Demo Complete ===");
    Ok(())
}
