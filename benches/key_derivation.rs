use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use response_cache::cache::{CacheEntry, MemoryCache};
use response_cache::{CacheKey, Clock, SystemClock};

fn bench_key_derivation(c: &mut Criterion) {
    let headers = [
        ("Authorization", "Bearer 0123456789abcdef"),
        ("Accept", "application/json"),
        ("Accept-Language", "en-US"),
    ];
    c.bench_function("derive_key_3_headers", |b| {
        b.iter(|| CacheKey::derive("https://api.example.com/v1/items?page=2", "GET", headers))
    });
}

fn bench_memory_hit(c: &mut Criterion) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let memory = MemoryCache::new(64 * 1024 * 1024, Arc::clone(&clock));
    let keys: Vec<String> = (0..1_000)
        .map(|i| {
            CacheKey::new(format!("https://api.example.com/v1/items/{i}"))
                .hashed_value()
                .to_string()
        })
        .collect();
    for key in &keys {
        memory.set(key, CacheEntry::new(vec![0; 512], clock.now(), None, None));
    }

    let mut i = 0;
    c.bench_function("memory_hit_512b", |b| {
        b.iter(|| {
            i = (i + 1) % keys.len();
            memory.get(&keys[i])
        })
    });
}

criterion_group!(benches, bench_key_derivation, bench_memory_hit);
criterion_main!(benches);
