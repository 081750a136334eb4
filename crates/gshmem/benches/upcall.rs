//! Ring round-trip latency and fast-path AMO throughput.
//!
//! Measurements run inside a PE thread, so the harness is driven manually
//! rather than through `criterion_group!`.

use criterion::Criterion;
use gshmem::{Attr, LocalWorld};

fn bench_ring_scalar_roundtrip() {
    // One PE, fast path off: every op is a full ring round trip.
    let attr = Attr::default().with_ipc(false).with_heap_length(1 << 16);
    LocalWorld::launch(1, attr, |pe| {
        let cell = pe.calloc(1, 8).unwrap() as *mut u64;
        let mut c = Criterion::default().configure_from_args();
        c.bench_function("ring_p_g_roundtrip", |b| {
            let mut v = 0u64;
            b.iter(|| {
                v = v.wrapping_add(1);
                pe.p(cell, v, 0);
                std::hint::black_box(pe.g(cell as *const u64, 0))
            });
        });
    });
}

fn bench_fast_path_fetch_add() {
    let attr = Attr::default().with_heap_length(1 << 16);
    LocalWorld::launch(1, attr, |pe| {
        let counter = pe.calloc(1, 8).unwrap() as *mut u64;
        let mut c = Criterion::default().configure_from_args();
        c.bench_function("fast_path_fetch_add", |b| {
            b.iter(|| std::hint::black_box(pe.atomic_fetch_add(counter, 1u64, 0)));
        });
    });
}

fn main() {
    bench_ring_scalar_roundtrip();
    bench_fast_path_fetch_add();
    Criterion::default().configure_from_args().final_summary();
}
