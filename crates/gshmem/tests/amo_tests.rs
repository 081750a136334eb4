//! Atomic memory operation semantics across PEs.
//!
//! These run with the IPC fast path enabled: integer AMOs execute as
//! hardware atomics on translated pointers, floats fall through to the
//! ring.

use std::sync::Mutex;

use gshmem::{Attr, LocalWorld};

fn attr() -> Attr {
    Attr::default().with_heap_length(1 << 16)
}

/// All PEs OR their own bit into one word at PE 0; the word converges to
/// the full mask and every return value is a subset not containing the
/// caller's bit.
#[test]
fn test_fetch_or_fan_in() {
    let n_pes = 4;
    let returns = Mutex::new(Vec::new());
    LocalWorld::launch(n_pes, attr(), |pe| {
        let word = pe.calloc(1, 4).unwrap() as *mut u32;
        pe.barrier_all();

        let mype = pe.my_pe();
        let prev = pe.atomic_fetch_or(word, 1u32 << mype, 0);
        assert_eq!(prev & (1 << mype), 0, "own bit was already set");
        assert_eq!(prev & !0b1111, 0, "return outside the lattice");
        returns.lock().unwrap().push(prev);

        pe.barrier_all();
        let final_value = pe.atomic_fetch(word as *const u32, 0);
        assert_eq!(final_value, 0b1111);
    });
    assert_eq!(returns.into_inner().unwrap().len(), n_pes);
}

/// Concurrent fetch-adds serialize: distinct return values, exact final
/// sum.
#[test]
fn test_fetch_add_atomicity() {
    let n_pes = 4;
    let per_pe = 256u64;
    let returns = Mutex::new(Vec::new());
    LocalWorld::launch(n_pes, attr(), |pe| {
        let counter = pe.calloc(1, 8).unwrap() as *mut u64;
        pe.barrier_all();

        let mut mine = Vec::with_capacity(per_pe as usize);
        for _ in 0..per_pe {
            mine.push(pe.atomic_fetch_add(counter, 1u64, 0));
        }
        returns.lock().unwrap().extend(mine);

        pe.barrier_all();
        let total = pe.atomic_fetch(counter as *const u64, 0);
        assert_eq!(total, per_pe * n_pes as u64);
    });

    // Each return value is a unique point in the serialization.
    let mut all = returns.into_inner().unwrap();
    all.sort_unstable();
    let expected: Vec<u64> = (0..per_pe * n_pes as u64).collect();
    assert_eq!(all, expected);
}

/// Compare-swap chain: the second swap observes the first and fails.
#[test]
fn test_compare_swap_chain() {
    LocalWorld::launch(2, attr(), |pe| {
        let word = pe.calloc(1, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 1 {
            let first = pe.atomic_compare_swap(word, 0u64, 1, 0);
            assert_eq!(first, 0);
            let second = pe.atomic_compare_swap(word, 0u64, 2, 0);
            assert_eq!(second, 1);
        }
        pe.barrier_all();

        let settled = pe.atomic_fetch(word as *const u64, 0);
        assert_eq!(settled, 1);
    });
}

#[test]
fn test_swap_set_inc() {
    LocalWorld::launch(2, attr(), |pe| {
        let word = pe.calloc(1, 8).unwrap() as *mut i64;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            pe.atomic_set(word, -7i64, 1);
            let prev = pe.atomic_swap(word, 10i64, 1);
            assert_eq!(prev, -7);
            pe.atomic_inc(word, 1);
            let bumped = pe.atomic_fetch_inc(word, 1);
            assert_eq!(bumped, 11);
        }
        pe.barrier_all();

        if pe.my_pe() == 1 {
            // Safety: word is in our own heap; all writers are quiesced.
            assert_eq!(unsafe { *word }, 12);
        }
        pe.barrier_all();
    });
}

#[test]
fn test_bitwise_family() {
    LocalWorld::launch(2, attr(), |pe| {
        let word = pe.calloc(1, 4).unwrap() as *mut u32;
        pe.barrier_all();

        if pe.my_pe() == 1 {
            pe.atomic_set(word, 0b1100u32, 0);
            assert_eq!(pe.atomic_fetch_and(word, 0b0110u32, 0), 0b1100);
            assert_eq!(pe.atomic_fetch_xor(word, 0b0011u32, 0), 0b0100);
            pe.atomic_or(word, 0b1000u32, 0);
            assert_eq!(pe.atomic_fetch(word as *const u32, 0), 0b1111);
        }
        pe.barrier_all();
    });
}

/// Floats have no native atomics: the operation must still be correct
/// through the ring fallback.
#[test]
fn test_float_fetch_add_falls_through_to_ring() {
    let n_pes = 4;
    LocalWorld::launch(n_pes, attr(), |pe| {
        let acc = pe.calloc(1, 8).unwrap() as *mut f64;
        pe.barrier_all();

        let prev = pe.atomic_fetch_add(acc, 1.5f64, 0);
        assert!(prev >= 0.0 && prev <= 1.5 * (n_pes - 1) as f64);

        pe.barrier_all();
        let total = pe.atomic_fetch(acc as *const f64, 0);
        assert_eq!(total, 1.5 * n_pes as f64);
    });
}

#[test]
fn test_float_swap_and_set() {
    LocalWorld::launch(2, attr(), |pe| {
        let cell = pe.calloc(1, 4).unwrap() as *mut f32;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            pe.atomic_set(cell, 2.5f32, 1);
            let prev = pe.atomic_swap(cell, -1.0f32, 1);
            assert_eq!(prev, 2.5);
            assert_eq!(pe.atomic_fetch(cell as *const f32, 1), -1.0);
        }
        pe.barrier_all();
    });
}

/// Non-blocking fetching AMOs deliver into the local cell after a quiet.
#[test]
fn test_fetch_add_nbi_visible_after_quiet() {
    LocalWorld::launch(2, attr(), |pe| {
        let counter = pe.calloc(1, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 1 {
            pe.atomic_set(counter, 40u64, 0);
            let mut fetched = 0u64;
            pe.atomic_fetch_add_nbi(&mut fetched, counter, 2u64, 0);
            pe.quiet();
            assert_eq!(fetched, 40);
            assert_eq!(pe.atomic_fetch(counter as *const u64, 0), 42);
        }
        pe.barrier_all();
    });
}
