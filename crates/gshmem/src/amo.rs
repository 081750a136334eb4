//! Atomic memory operations: fast-path dispatch and ring fallback.
//!
//! For a target PE reachable through IPC on an all-intra-node job, the
//! operation runs right here with a system-scope sequentially-consistent
//! atomic on the translated pointer. Otherwise a request is built and
//! pushed through the upcall ring (blocking forms ride `sendwait` or the
//! return-value path; non-blocking forms are fire-and-forget and complete
//! under a later `quiet`).
//!
//! Types without native atomics (floats) never take the fast path; they
//! fall through to the ring where the host performs the operation.

use std::mem::size_of;

use crate::err::{validate_initialized, validate_pe, validate_symmetric};
use crate::pe::Pe;
use crate::record::{AtomicArith, AtomicBits, AtomicBitwise, Op, Request, RingValue};

fn validate_amo<T: RingValue>(pe: &Pe, dest: usize, target_pe: i32) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_symmetric(pe.info(), dest, size_of::<T>())
    });
}

/// Translated pointer for the fast path, or `None` when the operation must
/// go through the ring.
#[inline]
fn fast_ptr<T: AtomicBits>(pe: &Pe, addr: usize, target_pe: i32) -> Option<*mut T> {
    if !T::NATIVE {
        return None;
    }
    pe.fast_local(addr, target_pe).map(|p| p as *mut T)
}

fn fetching_request<T: RingValue>(op: Op, dest: usize, target_pe: i32) -> Request {
    let mut req = Request::new(op, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest;
    req
}

// =============================================================================
// BLOCKING, FETCHING
// =============================================================================

pub(crate) fn fetch<T: AtomicBits>(pe: &Pe, source: *const T, target_pe: i32) -> T {
    validate_amo::<T>(pe, source as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, source as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        return unsafe { T::atomic_load(p) };
    }
    let mut req = Request::new(Op::AmoFetch, T::BASE);
    req.dest_pe = target_pe;
    req.src = source as usize;
    pe.invoke_blocking_return::<T>(&mut req)
}

pub(crate) fn compare_swap<T: AtomicBits>(
    pe: &Pe,
    dest: *mut T,
    cond: T,
    value: T,
    target_pe: i32,
) -> T {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        return unsafe { T::atomic_compare_swap(p, cond, value) };
    }
    let mut req = fetching_request::<T>(Op::AmoCompareSwap, dest as usize, target_pe);
    req.cond = cond.to_bits();
    req.value = value.to_bits();
    pe.invoke_blocking_return::<T>(&mut req)
}

pub(crate) fn swap<T: AtomicBits>(pe: &Pe, dest: *mut T, value: T, target_pe: i32) -> T {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        return unsafe { T::atomic_swap(p, value) };
    }
    let mut req = fetching_request::<T>(Op::AmoSwap, dest as usize, target_pe);
    req.value = value.to_bits();
    pe.invoke_blocking_return::<T>(&mut req)
}

pub(crate) fn fetch_inc<T: AtomicArith>(pe: &Pe, dest: *mut T, target_pe: i32) -> T {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        return unsafe { T::atomic_fetch_add(p, T::one()) };
    }
    let mut req = fetching_request::<T>(Op::AmoFetchInc, dest as usize, target_pe);
    pe.invoke_blocking_return::<T>(&mut req)
}

pub(crate) fn fetch_add<T: AtomicArith>(pe: &Pe, dest: *mut T, value: T, target_pe: i32) -> T {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        return unsafe { T::atomic_fetch_add(p, value) };
    }
    let mut req = fetching_request::<T>(Op::AmoFetchAdd, dest as usize, target_pe);
    req.value = value.to_bits();
    pe.invoke_blocking_return::<T>(&mut req)
}

macro_rules! fetching_bitwise {
    ($(($name:ident, $op:ident, $method:ident)),+ $(,)?) => {
        $(
            pub(crate) fn $name<T: AtomicBitwise>(
                pe: &Pe,
                dest: *mut T,
                value: T,
                target_pe: i32,
            ) -> T {
                validate_amo::<T>(pe, dest as usize, target_pe);
                if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
                    // Safety: p is a validated element of a mapped peer heap.
                    return unsafe { T::$method(p, value) };
                }
                let mut req = fetching_request::<T>(Op::$op, dest as usize, target_pe);
                req.value = value.to_bits();
                pe.invoke_blocking_return::<T>(&mut req)
            }
        )+
    };
}

fetching_bitwise! {
    (fetch_and, AmoFetchAnd, atomic_fetch_and),
    (fetch_or, AmoFetchOr, atomic_fetch_or),
    (fetch_xor, AmoFetchXor, atomic_fetch_xor),
}

// =============================================================================
// BLOCKING, NON-FETCHING
// =============================================================================

pub(crate) fn set<T: AtomicBits>(pe: &Pe, dest: *mut T, value: T, target_pe: i32) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        unsafe { T::atomic_store(p, value) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoSet, dest as usize, target_pe);
    req.value = value.to_bits();
    pe.invoke_blocking(&mut req);
}

pub(crate) fn inc<T: AtomicArith>(pe: &Pe, dest: *mut T, target_pe: i32) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        unsafe { T::atomic_fetch_add(p, T::one()) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoInc, dest as usize, target_pe);
    pe.invoke_blocking(&mut req);
}

pub(crate) fn add<T: AtomicArith>(pe: &Pe, dest: *mut T, value: T, target_pe: i32) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is a validated element of a mapped peer heap.
        unsafe { T::atomic_fetch_add(p, value) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoAdd, dest as usize, target_pe);
    req.value = value.to_bits();
    pe.invoke_blocking(&mut req);
}

macro_rules! plain_bitwise {
    ($(($name:ident, $op:ident, $method:ident)),+ $(,)?) => {
        $(
            pub(crate) fn $name<T: AtomicBitwise>(
                pe: &Pe,
                dest: *mut T,
                value: T,
                target_pe: i32,
            ) {
                validate_amo::<T>(pe, dest as usize, target_pe);
                if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
                    // Safety: p is a validated element of a mapped peer heap.
                    unsafe { T::$method(p, value) };
                    return;
                }
                let mut req = fetching_request::<T>(Op::$op, dest as usize, target_pe);
                req.value = value.to_bits();
                pe.invoke_blocking(&mut req);
            }
        )+
    };
}

plain_bitwise! {
    (and, AmoAnd, atomic_fetch_and),
    (or, AmoOr, atomic_fetch_or),
    (xor, AmoXor, atomic_fetch_xor),
}

// =============================================================================
// NON-BLOCKING, FETCHING
// =============================================================================
//
// The fetched value lands in the caller-provided local cell and is defined
// only after a subsequent quiet.

pub(crate) fn fetch_nbi<T: AtomicBits>(pe: &Pe, fetch: *mut T, source: *const T, target_pe: i32) {
    validate_amo::<T>(pe, source as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, source as usize, target_pe) {
        // Safety: p is validated; fetch is caller-local.
        unsafe { *fetch = T::atomic_load(p) };
        return;
    }
    let mut req = Request::new(Op::AmoFetchNbi, T::BASE);
    req.dest_pe = target_pe;
    req.src = source as usize;
    req.fetch = fetch as usize;
    pe.invoke_nonblocking(&mut req);
}

pub(crate) fn compare_swap_nbi<T: AtomicBits>(
    pe: &Pe,
    fetch: *mut T,
    dest: *mut T,
    cond: T,
    value: T,
    target_pe: i32,
) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is validated; fetch is caller-local.
        unsafe { *fetch = T::atomic_compare_swap(p, cond, value) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoCompareSwapNbi, dest as usize, target_pe);
    req.fetch = fetch as usize;
    req.cond = cond.to_bits();
    req.value = value.to_bits();
    pe.invoke_nonblocking(&mut req);
}

pub(crate) fn swap_nbi<T: AtomicBits>(
    pe: &Pe,
    fetch: *mut T,
    dest: *mut T,
    value: T,
    target_pe: i32,
) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is validated; fetch is caller-local.
        unsafe { *fetch = T::atomic_swap(p, value) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoSwapNbi, dest as usize, target_pe);
    req.fetch = fetch as usize;
    req.value = value.to_bits();
    pe.invoke_nonblocking(&mut req);
}

pub(crate) fn fetch_inc_nbi<T: AtomicArith>(pe: &Pe, fetch: *mut T, dest: *mut T, target_pe: i32) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is validated; fetch is caller-local.
        unsafe { *fetch = T::atomic_fetch_add(p, T::one()) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoFetchIncNbi, dest as usize, target_pe);
    req.fetch = fetch as usize;
    pe.invoke_nonblocking(&mut req);
}

pub(crate) fn fetch_add_nbi<T: AtomicArith>(
    pe: &Pe,
    fetch: *mut T,
    dest: *mut T,
    value: T,
    target_pe: i32,
) {
    validate_amo::<T>(pe, dest as usize, target_pe);
    if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
        // Safety: p is validated; fetch is caller-local.
        unsafe { *fetch = T::atomic_fetch_add(p, value) };
        return;
    }
    let mut req = fetching_request::<T>(Op::AmoFetchAddNbi, dest as usize, target_pe);
    req.fetch = fetch as usize;
    req.value = value.to_bits();
    pe.invoke_nonblocking(&mut req);
}

macro_rules! fetching_bitwise_nbi {
    ($(($name:ident, $op:ident, $method:ident)),+ $(,)?) => {
        $(
            pub(crate) fn $name<T: AtomicBitwise>(
                pe: &Pe,
                fetch: *mut T,
                dest: *mut T,
                value: T,
                target_pe: i32,
            ) {
                validate_amo::<T>(pe, dest as usize, target_pe);
                if let Some(p) = fast_ptr::<T>(pe, dest as usize, target_pe) {
                    // Safety: p is validated; fetch is caller-local.
                    unsafe { *fetch = T::$method(p, value) };
                    return;
                }
                let mut req = fetching_request::<T>(Op::$op, dest as usize, target_pe);
                req.fetch = fetch as usize;
                req.value = value.to_bits();
                pe.invoke_nonblocking(&mut req);
            }
        )+
    };
}

fetching_bitwise_nbi! {
    (fetch_and_nbi, AmoFetchAndNbi, atomic_fetch_and),
    (fetch_or_nbi, AmoFetchOrNbi, atomic_fetch_or),
    (fetch_xor_nbi, AmoFetchXorNbi, atomic_fetch_xor),
}
