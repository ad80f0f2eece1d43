use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ouroboros_cache::{CacheOptions, MemoryDriver, TieredCache};
use std::sync::Arc;

fn bench_local_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");

    let cache = runtime.block_on(async {
        let cache = TieredCache::builder(Arc::new(MemoryDriver::new()))
            .build()
            .await
            .expect("failed to build cache");
        cache
            .set("user:42", "{\"name\":\"Ada\"}", &CacheOptions::default())
            .await
            .expect("failed to seed cache");
        cache
    });

    let options = CacheOptions::default();
    c.bench_function("get local hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(cache.get(black_box("user:42"), &options).await) })
    });

    c.bench_function("get miss", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(cache.get(black_box("user:missing"), &options).await) })
    });
}

criterion_group!(benches, bench_local_hit);
criterion_main!(benches);
