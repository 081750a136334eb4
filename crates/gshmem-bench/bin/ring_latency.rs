//! Round-trip latency of the upcall ring.
//!
//! Runs one PE with the fast path disabled so every scalar put/get is a
//! full device-to-proxy round trip, then reports the mean latency.

use std::time::Instant;

use gshmem::{Attr, LocalWorld};

const WARMUP: usize = 10_000;
const ITERATIONS: usize = 200_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let attr = Attr::default().with_ipc(false).with_heap_length(1 << 20);
    LocalWorld::launch(1, attr, |pe| {
        let cell = pe.calloc(1, 8).unwrap() as *mut u64;

        for i in 0..WARMUP {
            pe.p(cell, i as u64, 0);
        }
        pe.quiet();

        let start = Instant::now();
        for i in 0..ITERATIONS {
            pe.p(cell, i as u64, 0);
            let got = pe.g(cell as *const u64, 0);
            assert_eq!(got, i as u64);
        }
        let elapsed = start.elapsed();

        let per_op = elapsed.as_nanos() / (ITERATIONS as u128 * 2);
        tracing::info!(
            iterations = ITERATIONS,
            total_ms = elapsed.as_millis() as u64,
            ns_per_op = per_op as u64,
            "ring round-trip latency"
        );

        let stamp = pe.timestamp();
        tracing::info!(proxy_nanos = stamp, "proxy clock sampled");
    });
}
