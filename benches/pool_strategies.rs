//! Buffer pool strategy benchmarks.
//!
//! Compares the single-lock size-class pool, the sharded pool and plain
//! allocation (a config with no classes) on acquire/release round trips,
//! single-threaded and under contention.

#![allow(clippy::unwrap_used, missing_docs)]

use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use refstore::buffer::{build_pool, ByteBufferPool, PoolStrategy};
use refstore::ByteBufferPoolConfig;

const REQUEST_SIZES: [usize; 4] = [16, 200, 4096, 50_000];

// =============================================================================
// Helpers
// =============================================================================

fn candidates() -> Vec<(&'static str, Arc<dyn ByteBufferPool>)> {
    vec![
        (
            "size_class",
            build_pool(PoolStrategy::SizeClass, ByteBufferPoolConfig::default()).unwrap(),
        ),
        (
            "sharded_8",
            build_pool(PoolStrategy::Sharded { shards: 8 }, ByteBufferPoolConfig::default()).unwrap(),
        ),
        (
            "unpooled",
            build_pool(PoolStrategy::SizeClass, ByteBufferPoolConfig::unpooled()).unwrap(),
        ),
    ]
}

fn round_trip(pool: &dyn ByteBufferPool, size: usize) {
    let mut buffer = pool.acquire(size).unwrap();
    buffer.put_slice(&[0xA5; 8]).unwrap();
    black_box(buffer.as_slice());
    pool.release(buffer);
}

// =============================================================================
// Single Thread
// =============================================================================

/// Acquire and release one buffer per iteration.
fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/single_thread");
    group.throughput(Throughput::Elements(1));

    for (name, pool) in candidates() {
        pool.warm_up().unwrap();
        for size in REQUEST_SIZES {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                b.iter(|| round_trip(pool.as_ref(), size));
            });
        }
    }

    group.finish();
}

/// Hold a key and a value buffer at once, the way typed puts do.
fn bench_buffer_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/buffer_pair");
    group.throughput(Throughput::Elements(1));

    for (name, pool) in candidates() {
        group.bench_function(name, |b| {
            b.iter(|| {
                pool.do_with_buffer_pair(32, 512, |key, value| {
                    key.put_slice(b"GBP").unwrap();
                    value.put_slice(&[1; 64]).unwrap();
                    Ok(black_box(key.len() + value.len()))
                })
                .unwrap()
            });
        });
    }

    group.finish();
}

// =============================================================================
// Contention
// =============================================================================

/// Several threads hammering the same pool.
fn bench_contended(c: &mut Criterion) {
    const OPS_PER_THREAD: usize = 1_000;

    let mut group = c.benchmark_group("pool/contended");

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));

        for (name, pool) in candidates() {
            group.bench_with_input(BenchmarkId::new(name, threads), &threads, |b, &threads| {
                b.iter(|| {
                    let barrier = Arc::new(Barrier::new(threads));
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let pool = Arc::clone(&pool);
                            let barrier = Arc::clone(&barrier);
                            thread::spawn(move || {
                                barrier.wait();
                                for i in 0..OPS_PER_THREAD {
                                    round_trip(pool.as_ref(), REQUEST_SIZES[(t + i) % REQUEST_SIZES.len()]);
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_buffer_pair, bench_contended);
criterion_main!(benches);
