//! Benchmarks for diskmap operations

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use diskmap::{Config, DiskMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const KEY_SPACE: u64 = 10_000;

fn prefilled_map(temp: &TempDir) -> DiskMap<u64, Vec<u8>> {
    let config = Config::builder()
        .path(temp.path().join("bench.db"))
        .bucket_size(4096)
        .max_buckets(512)
        .max_depth(12)
        .build();
    let map = DiskMap::create(config).unwrap();
    for key in 0..KEY_SPACE {
        map.put(&key, &vec![0xABu8; 64]).unwrap();
    }
    map
}

fn map_benchmarks(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let map = prefilled_map(&temp);
    let mut rng = StdRng::seed_from_u64(7);

    c.bench_function("get_random", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..KEY_SPACE);
            black_box(map.get(&key).unwrap());
        })
    });

    c.bench_function("put_overwrite_random", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..KEY_SPACE);
            map.put(&key, &vec![0xCDu8; 64]).unwrap();
        })
    });

    c.bench_function("contains_key_random", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..KEY_SPACE * 2);
            black_box(map.contains_key(&key).unwrap());
        })
    });
}

criterion_group!(benches, map_benchmarks);
criterion_main!(benches);
