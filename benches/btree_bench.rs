use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use kestreldb::common::types::Rid;
use kestreldb::index::btree::BPlusTree;
use kestreldb::storage::buffer::BufferPoolManager;

fn create_bench_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path).unwrap());

    std::mem::forget(temp_file);

    buffer_pool
}

fn btree_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BPlusTree");

    for size in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
            b.iter_with_setup(
                || {
                    let buffer_pool = create_bench_buffer_pool(256);
                    let btree = BPlusTree::<i64>::new("bench", buffer_pool).unwrap();
                    let mut keys: Vec<i64> = (0..size as i64).collect();
                    keys.shuffle(&mut rand::thread_rng());
                    (btree, keys)
                },
                |(btree, keys)| {
                    for key in keys {
                        btree.insert(key, Rid::new(0, key as u32)).unwrap();
                    }
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("point_lookup", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(256);
            let btree = BPlusTree::<i64>::new("bench", buffer_pool).unwrap();
            for key in 0..size as i64 {
                btree.insert(key, Rid::new(0, key as u32)).unwrap();
            }

            let mut rng = rand::thread_rng();
            let probes: Vec<i64> = (0..1000).map(|_| rng.gen_range(0..size as i64)).collect();

            b.iter(|| {
                for key in &probes {
                    std::hint::black_box(btree.get_value(key).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("full_scan", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(256);
            let btree = BPlusTree::<i64>::new("bench", buffer_pool).unwrap();
            for key in 0..size as i64 {
                btree.insert(key, Rid::new(0, key as u32)).unwrap();
            }

            b.iter(|| {
                let count = btree.iter().unwrap().count();
                std::hint::black_box(count);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, btree_benchmark);
criterion_main!(benches);
