//! Criterion benchmarks for the batcher: cached loads and coalesced misses.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use coalesce_batch::{batch_fn, Batcher, BatcherConfig, Cause, Outcome};
use tokio::runtime::Runtime;

fn squares() -> Batcher<u64, u64> {
    let f = batch_fn(|keys: Vec<u64>| async move {
        Ok::<_, Cause>(keys.into_iter().map(|k| Outcome::Value(k * k)).collect())
    });
    Batcher::new(f, BatcherConfig::default()).unwrap()
}

fn bench_cached_load(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let batcher = squares();
    rt.block_on(batcher.load(7)).unwrap();

    c.bench_function("load_cached", |b| {
        b.iter(|| rt.block_on(batcher.load(black_box(7))).unwrap());
    });
}

fn bench_load_many(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut g = c.benchmark_group("load_many_uncached");

    for size in [16u64, 256, 1024] {
        g.throughput(Throughput::Elements(size));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let batcher = squares();
                rt.block_on(batcher.load_many((0..size).collect()))
            });
        });
    }
    g.finish();
}

criterion_group!(benches, bench_cached_load, bench_load_many);
criterion_main!(benches);
