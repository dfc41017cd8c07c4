//! Criterion benchmarks for the cache store: admission, hits, misses.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use coalesce_cache::{CacheStore, StoreConfig};
use coalesce_core::fixed_size;

fn populated(entries: usize) -> CacheStore<u64> {
    let store = CacheStore::new(StoreConfig::default(), fixed_size());
    for i in 0..entries {
        store.set_value(&format!("key-{i}"), i as u64).unwrap();
    }
    store
}

fn bench_set(c: &mut Criterion) {
    let store = CacheStore::new(StoreConfig::default(), fixed_size::<u64>());
    let mut g = c.benchmark_group("set_value");
    g.throughput(Throughput::Elements(1));
    let mut i = 0u64;
    g.bench_function("overwrite_1k_keys", |b| {
        b.iter(|| {
            i = (i + 1) % 1000;
            black_box(store.set_value(&format!("key-{i}"), i)).unwrap();
        });
    });
    g.finish();
}

fn bench_get(c: &mut Criterion) {
    let store = populated(10_000);
    let mut g = c.benchmark_group("get");
    g.throughput(Throughput::Elements(1));
    g.bench_function("hit", |b| {
        b.iter(|| black_box(store.get("key-5000")));
    });
    g.bench_function("miss", |b| {
        b.iter(|| black_box(store.get("absent")));
    });
    g.finish();
}

criterion_group!(benches, bench_set, bench_get);
criterion_main!(benches);
