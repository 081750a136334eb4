//! Fan-in atomics: every PE hammers one counter on PE 0.
//!
//! With the fast path on, this measures hardware atomics over translated
//! pointers; with `GSHMEM_ENABLE_IPC=0` it measures the ring path.

use std::time::Instant;

use gshmem::{Attr, LocalWorld};

const N_PES: usize = 4;
const OPS_PER_PE: u64 = 100_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let attr = Attr::from_env().with_heap_length(1 << 20);
    tracing::info!(ipc = attr.enable_ipc, n_pes = N_PES, "launching fan-in");

    LocalWorld::launch(N_PES, attr, |pe| {
        let counter = pe.calloc(1, 8).unwrap() as *mut u64;
        pe.barrier_all();

        let start = Instant::now();
        for _ in 0..OPS_PER_PE {
            pe.atomic_add(counter, 1u64, 0);
        }
        pe.quiet();
        pe.barrier_all();
        let elapsed = start.elapsed();

        let total = pe.atomic_fetch(counter as *const u64, 0);
        assert_eq!(total, OPS_PER_PE * N_PES as u64);

        if pe.my_pe() == 0 {
            let rate = (OPS_PER_PE * N_PES as u64) as f64 / elapsed.as_secs_f64();
            tracing::info!(
                total,
                elapsed_ms = elapsed.as_millis() as u64,
                ops_per_sec = rate as u64,
                "fan-in complete"
            );
        }
        pe.barrier_all();
    });
}
