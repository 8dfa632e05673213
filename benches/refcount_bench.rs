//! Allocation, reference counting and locking benchmarks.
//!
//! Run with: cargo bench --bench refcount_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refblock::{alloc, decrement, increment, lock, try_lock, unlock, Shared, Variant};

const VARIANTS: [(&str, Variant); 3] = [
    ("locked", Variant::Locked),
    ("shared_lock", Variant::SharedLock),
    ("unlocked", Variant::Unlocked),
];

fn bench_alloc_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_release");

    for &(name, variant) in VARIANTS.iter() {
        for &size in [16usize, 256, 4096].iter() {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                b.iter(|| {
                    let handle = alloc(black_box(size), None, variant).unwrap();
                    unsafe { decrement(handle).unwrap() }
                });
            });
        }
    }

    group.finish();
}

fn bench_refcount(c: &mut Criterion) {
    let mut group = c.benchmark_group("refcount");

    let handle = alloc(16, None, Variant::Unlocked).unwrap();
    group.bench_function("increment_decrement", |b| {
        b.iter(|| unsafe {
            black_box(increment(handle).unwrap());
            black_box(decrement(handle).unwrap());
        });
    });
    unsafe {
        decrement(handle).unwrap();
    }

    let shared = Shared::new([0u64; 4], Variant::Unlocked).unwrap();
    group.bench_function("shared_clone_drop", |b| {
        b.iter(|| black_box(shared.clone()));
    });

    group.finish();
}

fn bench_locking(c: &mut Criterion) {
    let mut group = c.benchmark_group("locking");

    for &(name, variant) in VARIANTS.iter() {
        let handle = alloc(16, None, variant).unwrap();
        group.bench_function(BenchmarkId::new("lock_unlock", name), |b| {
            b.iter(|| unsafe {
                lock(handle).unwrap();
                unlock(handle).unwrap();
            });
        });
        group.bench_function(BenchmarkId::new("try_lock_unlock", name), |b| {
            b.iter(|| unsafe {
                try_lock(handle).unwrap();
                unlock(handle).unwrap();
            });
        });
        unsafe {
            decrement(handle).unwrap();
        }
    }

    group.finish();
}

criterion_group!(benches, bench_alloc_release, bench_refcount, bench_locking);
criterion_main!(benches);
