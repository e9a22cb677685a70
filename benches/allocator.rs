use criterion::{black_box, criterion_group, criterion_main, Criterion};

use multiarena::{ArenaPool, ArenaResource, FixedArenaPool, SyncArenaPool};

fn bench_unsync_alloc_dealloc(c: &mut Criterion) {
    let pool = ArenaPool::new(64, 4096).expect("pool");
    c.bench_function("unsync_alloc_dealloc_64b", |b| {
        b.iter(|| {
            let ptr = pool.allocate(black_box(64), 8).expect("alloc");
            unsafe { pool.deallocate(ptr, 64, 8) };
        });
    });
}

fn bench_inline_alloc_dealloc(c: &mut Criterion) {
    let pool = FixedArenaPool::<64, 4096>::new();
    c.bench_function("inline_alloc_dealloc_64b", |b| {
        b.iter(|| {
            let ptr = pool.allocate(black_box(64), 8).expect("alloc");
            unsafe { pool.deallocate(ptr, 64, 8) };
        });
    });
}

fn bench_sync_alloc_dealloc(c: &mut Criterion) {
    let pool = SyncArenaPool::new(64, 4096).expect("pool");
    c.bench_function("sync_alloc_dealloc_64b", |b| {
        b.iter(|| {
            let ptr = pool.allocate(black_box(64), 8).expect("alloc");
            unsafe { pool.deallocate(ptr, 64, 8) };
        });
    });
}

fn bench_arena_turnover(c: &mut Criterion) {
    // Fill and drain a whole arena so the free-list swap is on the measured
    // path, not just the bump carve.
    let pool = ArenaPool::new(8, 1024).expect("pool");
    c.bench_function("unsync_arena_turnover", |b| {
        b.iter(|| {
            let mut blocks = [std::ptr::NonNull::<u8>::dangling(); 8];
            for slot in blocks.iter_mut() {
                *slot = pool.allocate(black_box(1024), 8).expect("alloc");
            }
            for ptr in blocks {
                unsafe { pool.deallocate(ptr, 1024, 8) };
            }
        });
    });
}

criterion_group!(
    benches,
    bench_unsync_alloc_dealloc,
    bench_inline_alloc_dealloc,
    bench_sync_alloc_dealloc,
    bench_arena_turnover
);
criterion_main!(benches);
