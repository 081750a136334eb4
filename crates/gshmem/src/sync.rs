//! Point-to-point synchronization: test and wait-until families plus
//! signal-wait.
//!
//! These operate on ivars in the calling PE's own symmetric memory, so the
//! device executes them entirely locally with system-scope atomic loads
//! and bounded backoff; only the host-mode path proxies a single request.
//! `test_any` keeps a rotor across calls so repeated polling is fair to
//! every index.

use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::err::{validate_initialized, validate_symmetric};
use crate::pe::Pe;
use crate::record::{compare, AtomicBits, Cmp, Op, Request, RingValue};

fn validate_ivars<T>(pe: &Pe, ivars: usize, nelems: usize) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_symmetric(pe.info(), ivars, nelems * size_of::<T>())
    });
}

/// Whether index `i` is masked out by a status vector (nonzero = skip).
#[inline]
fn masked(status: Option<&[i32]>, i: usize) -> bool {
    status.is_some_and(|s| s[i] != 0)
}

// =============================================================================
// TEST
// =============================================================================

pub(crate) fn test<T: AtomicBits>(pe: &Pe, ivar: *mut T, cmp: Cmp, cmp_value: T) -> bool {
    validate_ivars::<T>(pe, ivar as usize, 1);
    if pe.device_side() {
        // Safety: validated symmetric element of our own heap.
        let v = unsafe { T::atomic_load(ivar) };
        return compare(v, cmp_value, cmp);
    }
    let mut req = Request::new(Op::Test, T::BASE);
    req.dst = ivar as usize;
    req.nelems = 1;
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<i32>(&mut req) != 0
}

pub(crate) fn test_all<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_value: T,
) -> bool {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        for i in 0..nelems {
            if masked(status, i) {
                continue;
            }
            // Safety: i < nelems over a validated array.
            let v = unsafe { T::atomic_load(ivars.add(i)) };
            if !compare(v, cmp_value, cmp) {
                return false;
            }
        }
        return true;
    }
    let mut req = Request::new(Op::TestAll, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<i32>(&mut req) != 0
}

/// One fair scan resuming after the rotor; `usize::MAX` when no index
/// matches (including `nelems == 0`).
pub(crate) fn test_any<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_value: T,
) -> usize {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        if nelems == 0 {
            return usize::MAX;
        }
        let rotor = pe.info().sync_rotor();
        let mut cur = rotor.load(Ordering::Relaxed);
        for _ in 0..nelems {
            cur += 1;
            if cur >= nelems {
                cur = 0;
            }
            if !masked(status, cur) {
                // Safety: cur < nelems over a validated array.
                let v = unsafe { T::atomic_load(ivars.add(cur)) };
                if compare(v, cmp_value, cmp) {
                    rotor.store(cur, Ordering::Relaxed);
                    return cur;
                }
            }
        }
        return usize::MAX;
    }
    let mut req = Request::new(Op::TestAny, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<usize>(&mut req)
}

/// Collect every matching index into `indices`; returns the count.
pub(crate) fn test_some<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    indices: &mut [usize],
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_value: T,
) -> usize {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    debug_assert!(indices.len() >= nelems);
    if pe.device_side() {
        let mut count = 0;
        for i in 0..nelems {
            if masked(status, i) {
                continue;
            }
            // Safety: i < nelems over a validated array.
            let v = unsafe { T::atomic_load(ivars.add(i)) };
            if compare(v, cmp_value, cmp) {
                indices[count] = i;
                count += 1;
            }
        }
        return count;
    }
    let mut req = Request::new(Op::TestSome, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.indices = indices.as_mut_ptr() as usize;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<usize>(&mut req)
}

// Vector forms: per-index compare values.

pub(crate) fn test_all_vector<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_values: &[T],
) -> bool {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        for i in 0..nelems {
            if masked(status, i) {
                continue;
            }
            // Safety: i < nelems over a validated array.
            let v = unsafe { T::atomic_load(ivars.add(i)) };
            if !compare(v, cmp_values[i], cmp) {
                return false;
            }
        }
        return true;
    }
    let mut req = Request::new(Op::TestAllVector, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_values = cmp_values.as_ptr() as usize;
    pe.invoke_blocking_return::<i32>(&mut req) != 0
}

pub(crate) fn test_any_vector<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_values: &[T],
) -> usize {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        if nelems == 0 {
            return usize::MAX;
        }
        let rotor = pe.info().sync_rotor();
        let mut cur = rotor.load(Ordering::Relaxed);
        for _ in 0..nelems {
            cur += 1;
            if cur >= nelems {
                cur = 0;
            }
            if !masked(status, cur) {
                // Safety: cur < nelems over a validated array.
                let v = unsafe { T::atomic_load(ivars.add(cur)) };
                if compare(v, cmp_values[cur], cmp) {
                    rotor.store(cur, Ordering::Relaxed);
                    return cur;
                }
            }
        }
        return usize::MAX;
    }
    let mut req = Request::new(Op::TestAnyVector, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_values = cmp_values.as_ptr() as usize;
    pe.invoke_blocking_return::<usize>(&mut req)
}

pub(crate) fn test_some_vector<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    indices: &mut [usize],
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_values: &[T],
) -> usize {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        let mut count = 0;
        for i in 0..nelems {
            if masked(status, i) {
                continue;
            }
            // Safety: i < nelems over a validated array.
            let v = unsafe { T::atomic_load(ivars.add(i)) };
            if compare(v, cmp_values[i], cmp) {
                indices[count] = i;
                count += 1;
            }
        }
        return count;
    }
    let mut req = Request::new(Op::TestSomeVector, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.indices = indices.as_mut_ptr() as usize;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_values = cmp_values.as_ptr() as usize;
    pe.invoke_blocking_return::<usize>(&mut req)
}

// =============================================================================
// WAIT-UNTIL
// =============================================================================

pub(crate) fn wait_until<T: AtomicBits>(pe: &Pe, ivar: *mut T, cmp: Cmp, cmp_value: T) {
    validate_ivars::<T>(pe, ivar as usize, 1);
    if pe.device_side() {
        let mut backoff = Backoff::new();
        loop {
            // Safety: validated symmetric element of our own heap.
            let v = unsafe { T::atomic_load(ivar) };
            if compare(v, cmp_value, cmp) {
                return;
            }
            backoff.snooze();
        }
    }
    let mut req = Request::new(Op::Wait, T::BASE);
    req.dst = ivar as usize;
    req.nelems = 1;
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking(&mut req);
}

/// Waits element-wise; `nelems == 0` returns immediately.
pub(crate) fn wait_until_all<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_value: T,
) {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        for i in 0..nelems {
            if masked(status, i) {
                continue;
            }
            // Safety: i < nelems over a validated array.
            wait_until(pe, unsafe { ivars.add(i) }, cmp, cmp_value);
        }
        return;
    }
    let mut req = Request::new(Op::WaitAll, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking(&mut req);
}

/// Returns the index of a matching ivar; `usize::MAX` for `nelems == 0`.
pub(crate) fn wait_until_any<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_value: T,
) -> usize {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        if nelems == 0 {
            return usize::MAX;
        }
        let mut backoff = Backoff::new();
        loop {
            let found = test_any(pe, ivars, nelems, status, cmp, cmp_value);
            if found != usize::MAX {
                return found;
            }
            backoff.snooze();
        }
    }
    let mut req = Request::new(Op::WaitAny, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<usize>(&mut req)
}

/// Returns the number of matching indices written; 0 only for
/// `nelems == 0`.
pub(crate) fn wait_until_some<T: AtomicBits>(
    pe: &Pe,
    ivars: *mut T,
    nelems: usize,
    indices: &mut [usize],
    status: Option<&[i32]>,
    cmp: Cmp,
    cmp_value: T,
) -> usize {
    validate_ivars::<T>(pe, ivars as usize, nelems);
    if pe.device_side() {
        if nelems == 0 {
            return 0;
        }
        let mut backoff = Backoff::new();
        loop {
            let count = test_some(pe, ivars, nelems, indices, status, cmp, cmp_value);
            if count != 0 {
                return count;
            }
            backoff.snooze();
        }
    }
    let mut req = Request::new(Op::WaitSome, T::BASE);
    req.dst = ivars as usize;
    req.nelems = nelems;
    req.indices = indices.as_mut_ptr() as usize;
    req.status = status.map_or(0, |s| s.as_ptr() as usize);
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<usize>(&mut req)
}

// =============================================================================
// SIGNAL WAIT
// =============================================================================

/// Spin on a 64-bit signal word; returns the satisfying value.
pub(crate) fn signal_wait_until(pe: &Pe, sig_addr: *mut u64, cmp: Cmp, cmp_value: u64) -> u64 {
    validate_ivars::<u64>(pe, sig_addr as usize, 1);
    if pe.device_side() {
        // Safety: validated symmetric 64-bit word of our own heap.
        let sig = unsafe { AtomicU64::from_ptr(sig_addr) };
        let mut backoff = Backoff::new();
        loop {
            let v = sig.load(Ordering::SeqCst);
            if compare(v, cmp_value, cmp) {
                return v;
            }
            backoff.snooze();
        }
    }
    let mut req = Request::new(Op::SignalWaitUntil, crate::record::BaseType::Uint64);
    req.sig_addr = sig_addr as usize;
    req.cmp = cmp;
    req.cmp_value = cmp_value.to_bits();
    pe.invoke_blocking_return::<u64>(&mut req)
}
