//! Proxy-side operation handlers.
//!
//! A handler receives the dispatch context and a request copied out of the
//! ring, performs the operation against the target PE's heap mapping (or
//! delegates to the runtime), and returns the optional return payload. The
//! proxy loop owns the completion protocol; handlers only produce values.
//!
//! Addresses arrive in the issuing PE's view of the symmetric heap;
//! `translate` rebases them through the IPC delta table. Local scratch
//! addresses (`fetch`, `indices`, wait/test ivars) are used as-is — they
//! already belong to this process.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::backoff::Backoff;
use crate::completion::RetValue;
use crate::dispatch::ProxyCtx;
use crate::err::{Result, ShmemError};
use crate::record::{
    compare, AtomicArith, AtomicBits, AtomicBitwise, Cmp, Request, RingValue, SignalOp,
};

#[inline]
fn ok_none() -> Result<Option<RetValue>> {
    Ok(None)
}

#[inline]
fn ok_value<T: RingValue>(v: T) -> Result<Option<RetValue>> {
    Ok(Some(RetValue {
        value: v.to_bits(),
        status: 0,
    }))
}

/// Rebase a symmetric-heap address for the target PE.
fn translate(ctx: &ProxyCtx, addr: usize, pe: i32) -> Result<usize> {
    let local_index = ctx.info.local_index(pe);
    if local_index == 0 {
        return Err(ShmemError::Transport(format!(
            "PE {pe} is not reachable from this node"
        )));
    }
    Ok(ctx.info.adjust(addr, local_index))
}

/// Whether index `i` is masked out by a status vector (0 = participate).
#[inline]
unsafe fn excluded(status: usize, i: usize) -> bool {
    status != 0 && *(status as *const i32).add(i) != 0
}

// =============================================================================
// SERVICE
// =============================================================================

pub(crate) fn nop(_ctx: &ProxyCtx, _req: &Request) -> Result<Option<RetValue>> {
    ok_none()
}

fn now_nanos() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

pub(crate) fn timestamp(_ctx: &ProxyCtx, _req: &Request) -> Result<Option<RetValue>> {
    ok_value(now_nanos() as usize)
}

pub(crate) fn print(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let text = ctx.info.message(req.root as usize).take();
    tracing::info!(target: "gshmem::device", pe = ctx.info.my_pe(), "{text}");
    ok_none()
}

pub(crate) fn exit(_ctx: &ProxyCtx, _req: &Request) -> Result<Option<RetValue>> {
    ok_none()
}

pub(crate) fn fence(ctx: &ProxyCtx, _req: &Request) -> Result<Option<RetValue>> {
    ctx.runtime.fence();
    ok_none()
}

pub(crate) fn quiet(ctx: &ProxyCtx, _req: &Request) -> Result<Option<RetValue>> {
    // FIFO consumption has already retired every upcall issued before this
    // request; what remains is the transport's own completion guarantee.
    ctx.runtime.quiet();
    ok_none()
}

// =============================================================================
// RMA
// =============================================================================

pub(crate) fn put<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    if req.nelems == 0 {
        return ok_none();
    }
    let dst = translate(ctx, req.dst, req.dest_pe)?;
    // Safety: validated symmetric ranges; source is issuer-local memory.
    unsafe {
        ptr::copy_nonoverlapping(req.src as *const T, dst as *mut T, req.nelems);
    }
    ok_none()
}

pub(crate) fn get<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    if req.nelems == 0 {
        return ok_none();
    }
    let src = translate(ctx, req.src, req.dest_pe)?;
    // Safety: validated symmetric ranges; destination is issuer-local.
    unsafe {
        ptr::copy_nonoverlapping(src as *const T, req.dst as *mut T, req.nelems);
    }
    ok_none()
}

pub(crate) fn put_scalar<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let dst = translate(ctx, req.dst, req.dest_pe)?;
    // Scalar cells may be concurrently observed by wait-until; the store
    // is atomic to match.
    // Safety: one element inside the validated symmetric range.
    unsafe { T::atomic_store(dst as *mut T, T::from_bits(req.value)) };
    ok_none()
}

pub(crate) fn get_scalar<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let src = translate(ctx, req.src, req.dest_pe)?;
    // Safety: one element inside the validated symmetric range.
    let v = unsafe { T::atomic_load(src as *mut T) };
    ok_value(v)
}

pub(crate) fn iput<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let dst = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    let src = req.src as *const T;
    // Safety: strides were validated positive; ranges are symmetric.
    unsafe {
        for i in 0..req.nelems {
            *dst.offset(i as isize * req.dst_stride) = *src.offset(i as isize * req.src_stride);
        }
    }
    ok_none()
}

pub(crate) fn iget<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let src = translate(ctx, req.src, req.dest_pe)? as *const T;
    let dst = req.dst as *mut T;
    // Safety: strides were validated positive; ranges are symmetric.
    unsafe {
        for i in 0..req.nelems {
            *dst.offset(i as isize * req.dst_stride) = *src.offset(i as isize * req.src_stride);
        }
    }
    ok_none()
}

pub(crate) fn ibput<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let dst = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    let src = req.src as *const T;
    // Safety: block size fits inside both strides (validated).
    unsafe {
        for i in 0..req.nelems {
            ptr::copy_nonoverlapping(
                src.offset(i as isize * req.src_stride),
                dst.offset(i as isize * req.dst_stride),
                req.bsize,
            );
        }
    }
    ok_none()
}

pub(crate) fn ibget<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let src = translate(ctx, req.src, req.dest_pe)? as *const T;
    let dst = req.dst as *mut T;
    // Safety: block size fits inside both strides (validated).
    unsafe {
        for i in 0..req.nelems {
            ptr::copy_nonoverlapping(
                src.offset(i as isize * req.src_stride),
                dst.offset(i as isize * req.dst_stride),
                req.bsize,
            );
        }
    }
    ok_none()
}

pub(crate) fn put_signal<T: RingValue>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    if req.nelems != 0 {
        let dst = translate(ctx, req.dst, req.dest_pe)?;
        // Safety: validated symmetric ranges.
        unsafe {
            ptr::copy_nonoverlapping(req.src as *const T, dst as *mut T, req.nelems);
        }
    }
    let sig = translate(ctx, req.sig_addr, req.dest_pe)?;
    // The signal must become visible only after the payload bytes.
    std::sync::atomic::fence(Ordering::SeqCst);
    // Safety: the signal cell is a 64-bit word in the symmetric heap.
    let sig = unsafe { AtomicU64::from_ptr(sig as *mut u64) };
    match req.sig_op {
        SignalOp::Set => sig.store(req.signal, Ordering::Release),
        SignalOp::Add => {
            sig.fetch_add(req.signal, Ordering::SeqCst);
        }
    }
    ok_none()
}

// =============================================================================
// AMO
// =============================================================================
//
// Fetching handlers return the prior value; the `*_nbi` forms instead
// store it through the request's local `fetch` pointer, to be observed by
// the issuer after a quiet.

pub(crate) fn amo_fetch<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.src, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    ok_value(unsafe { T::atomic_load(p) })
}

pub(crate) fn amo_set<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    unsafe { T::atomic_store(p, T::from_bits(req.value)) };
    ok_none()
}

pub(crate) fn amo_compare_swap<T: AtomicBits>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    let prev =
        // Safety: element inside the validated symmetric range.
        unsafe { T::atomic_compare_swap(p, T::from_bits(req.cond), T::from_bits(req.value)) };
    ok_value(prev)
}

pub(crate) fn amo_swap<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    ok_value(unsafe { T::atomic_swap(p, T::from_bits(req.value)) })
}

pub(crate) fn amo_fetch_inc<T: AtomicArith>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    ok_value(unsafe { T::atomic_fetch_add(p, T::one()) })
}

pub(crate) fn amo_inc<T: AtomicArith>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    unsafe { T::atomic_fetch_add(p, T::one()) };
    ok_none()
}

pub(crate) fn amo_fetch_add<T: AtomicArith>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    ok_value(unsafe { T::atomic_fetch_add(p, T::from_bits(req.value)) })
}

pub(crate) fn amo_add<T: AtomicArith>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range.
    unsafe { T::atomic_fetch_add(p, T::from_bits(req.value)) };
    ok_none()
}

macro_rules! bitwise_handlers {
    ($(($fetching:ident, $plain:ident, $method:ident)),+ $(,)?) => {
        $(
            pub(crate) fn $fetching<T: AtomicBitwise>(
                ctx: &ProxyCtx,
                req: &Request,
            ) -> Result<Option<RetValue>> {
                let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
                // Safety: element inside the validated symmetric range.
                ok_value(unsafe { T::$method(p, T::from_bits(req.value)) })
            }

            pub(crate) fn $plain<T: AtomicBitwise>(
                ctx: &ProxyCtx,
                req: &Request,
            ) -> Result<Option<RetValue>> {
                let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
                // Safety: element inside the validated symmetric range.
                unsafe { T::$method(p, T::from_bits(req.value)) };
                ok_none()
            }
        )+
    };
}

bitwise_handlers! {
    (amo_fetch_and, amo_and, atomic_fetch_and),
    (amo_fetch_or, amo_or, atomic_fetch_or),
    (amo_fetch_xor, amo_xor, atomic_fetch_xor),
}

/// Deliver a fetched value through the request's local fetch pointer.
#[inline]
unsafe fn deliver_fetch<T: RingValue>(req: &Request, value: T) {
    *(req.fetch as *mut T) = value;
}

pub(crate) fn amo_fetch_nbi<T: AtomicBits>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.src, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range; fetch is local.
    unsafe { deliver_fetch(req, T::atomic_load(p)) };
    ok_none()
}

pub(crate) fn amo_compare_swap_nbi<T: AtomicBits>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range; fetch is local.
    unsafe {
        let prev = T::atomic_compare_swap(p, T::from_bits(req.cond), T::from_bits(req.value));
        deliver_fetch(req, prev);
    }
    ok_none()
}

pub(crate) fn amo_swap_nbi<T: AtomicBits>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range; fetch is local.
    unsafe { deliver_fetch(req, T::atomic_swap(p, T::from_bits(req.value))) };
    ok_none()
}

pub(crate) fn amo_fetch_inc_nbi<T: AtomicArith>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range; fetch is local.
    unsafe { deliver_fetch(req, T::atomic_fetch_add(p, T::one())) };
    ok_none()
}

pub(crate) fn amo_fetch_add_nbi<T: AtomicArith>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
    // Safety: element inside the validated symmetric range; fetch is local.
    unsafe { deliver_fetch(req, T::atomic_fetch_add(p, T::from_bits(req.value))) };
    ok_none()
}

macro_rules! bitwise_nbi_handlers {
    ($(($name:ident, $method:ident)),+ $(,)?) => {
        $(
            pub(crate) fn $name<T: AtomicBitwise>(
                ctx: &ProxyCtx,
                req: &Request,
            ) -> Result<Option<RetValue>> {
                let p = translate(ctx, req.dst, req.dest_pe)? as *mut T;
                // Safety: element inside the validated symmetric range.
                unsafe { deliver_fetch(req, T::$method(p, T::from_bits(req.value))) };
                ok_none()
            }
        )+
    };
}

bitwise_nbi_handlers! {
    (amo_fetch_and_nbi, atomic_fetch_and),
    (amo_fetch_or_nbi, atomic_fetch_or),
    (amo_fetch_xor_nbi, atomic_fetch_xor),
}

// =============================================================================
// POINT-TO-POINT SYNCHRONIZATION
// =============================================================================
//
// The ivar arrays live in the issuing PE's own symmetric memory; no
// translation applies. Wait handlers spin in the proxy thread with bounded
// backoff; test handlers are single-shot predicates.

/// One fair scan over the ivars, resuming after the rotor position.
/// Returns the matching index or `usize::MAX`.
unsafe fn scan_any<T: AtomicBits>(
    ctx: &ProxyCtx,
    ivars: *mut T,
    nelems: usize,
    status: usize,
    cmp: Cmp,
    cmp_value: T,
) -> usize {
    if nelems == 0 {
        return usize::MAX;
    }
    let rotor = ctx.info.sync_rotor();
    let mut cur = rotor.load(Ordering::Relaxed);
    for _ in 0..nelems {
        cur += 1;
        if cur >= nelems {
            cur = 0;
        }
        if !excluded(status, cur) && compare(T::atomic_load(ivars.add(cur)), cmp_value, cmp) {
            rotor.store(cur, Ordering::Relaxed);
            return cur;
        }
    }
    usize::MAX
}

pub(crate) fn test<T: AtomicBits>(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    // Safety: ivar is a validated element of issuer-local memory.
    let v = unsafe { T::atomic_load(req.dst as *mut T) };
    ok_value(i32::from(compare(v, T::from_bits(req.cmp_value), req.cmp)))
}

pub(crate) fn test_all<T: AtomicBits>(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let ivars = req.dst as *mut T;
    let cmp_value = T::from_bits(req.cmp_value);
    for i in 0..req.nelems {
        // Safety: i < nelems, validated issuer-local array.
        unsafe {
            if !excluded(req.status, i) && !compare(T::atomic_load(ivars.add(i)), cmp_value, req.cmp)
            {
                return ok_value(0i32);
            }
        }
    }
    ok_value(1i32)
}

pub(crate) fn test_any<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    // Safety: validated issuer-local array.
    let found = unsafe {
        scan_any(
            ctx,
            req.dst as *mut T,
            req.nelems,
            req.status,
            req.cmp,
            T::from_bits(req.cmp_value),
        )
    };
    ok_value(found)
}

pub(crate) fn test_some<T: AtomicBits>(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let ivars = req.dst as *mut T;
    let indices = req.indices as *mut usize;
    let cmp_value = T::from_bits(req.cmp_value);
    let mut count = 0usize;
    for i in 0..req.nelems {
        // Safety: i < nelems; `indices` holds at least nelems entries.
        unsafe {
            if !excluded(req.status, i) && compare(T::atomic_load(ivars.add(i)), cmp_value, req.cmp)
            {
                *indices.add(count) = i;
                count += 1;
            }
        }
    }
    ok_value(count)
}

pub(crate) fn test_all_vector<T: AtomicBits>(
    _ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let ivars = req.dst as *mut T;
    let cmp_values = req.cmp_values as *const T;
    for i in 0..req.nelems {
        // Safety: i < nelems for both arrays.
        unsafe {
            if !excluded(req.status, i)
                && !compare(T::atomic_load(ivars.add(i)), *cmp_values.add(i), req.cmp)
            {
                return ok_value(0i32);
            }
        }
    }
    ok_value(1i32)
}

pub(crate) fn test_any_vector<T: AtomicBits>(
    ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    if req.nelems == 0 {
        return ok_value(usize::MAX);
    }
    let ivars = req.dst as *mut T;
    let cmp_values = req.cmp_values as *const T;
    let rotor = ctx.info.sync_rotor();
    let mut cur = rotor.load(Ordering::Relaxed);
    for _ in 0..req.nelems {
        cur += 1;
        if cur >= req.nelems {
            cur = 0;
        }
        // Safety: cur < nelems for both arrays.
        unsafe {
            if !excluded(req.status, cur)
                && compare(T::atomic_load(ivars.add(cur)), *cmp_values.add(cur), req.cmp)
            {
                rotor.store(cur, Ordering::Relaxed);
                return ok_value(cur);
            }
        }
    }
    ok_value(usize::MAX)
}

pub(crate) fn test_some_vector<T: AtomicBits>(
    _ctx: &ProxyCtx,
    req: &Request,
) -> Result<Option<RetValue>> {
    let ivars = req.dst as *mut T;
    let cmp_values = req.cmp_values as *const T;
    let indices = req.indices as *mut usize;
    let mut count = 0usize;
    for i in 0..req.nelems {
        // Safety: i < nelems for all three arrays.
        unsafe {
            if !excluded(req.status, i)
                && compare(T::atomic_load(ivars.add(i)), *cmp_values.add(i), req.cmp)
            {
                *indices.add(count) = i;
                count += 1;
            }
        }
    }
    ok_value(count)
}

pub(crate) fn wait<T: AtomicBits>(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let ivar = req.dst as *mut T;
    let cmp_value = T::from_bits(req.cmp_value);
    let mut backoff = Backoff::new();
    // Safety: validated issuer-local element.
    while !unsafe { compare(T::atomic_load(ivar), cmp_value, req.cmp) } {
        backoff.snooze();
    }
    ok_none()
}

pub(crate) fn wait_all<T: AtomicBits>(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let ivars = req.dst as *mut T;
    let cmp_value = T::from_bits(req.cmp_value);
    for i in 0..req.nelems {
        if unsafe { excluded(req.status, i) } {
            continue;
        }
        let mut backoff = Backoff::new();
        // Safety: i < nelems, validated issuer-local array.
        while !unsafe { compare(T::atomic_load(ivars.add(i)), cmp_value, req.cmp) } {
            backoff.snooze();
        }
    }
    ok_none()
}

pub(crate) fn wait_any<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    if req.nelems == 0 {
        return ok_value(usize::MAX);
    }
    let ivars = req.dst as *mut T;
    let cmp_value = T::from_bits(req.cmp_value);
    let mut backoff = Backoff::new();
    loop {
        // Safety: validated issuer-local array.
        let found =
            unsafe { scan_any(ctx, ivars, req.nelems, req.status, req.cmp, cmp_value) };
        if found != usize::MAX {
            return ok_value(found);
        }
        backoff.snooze();
    }
}

pub(crate) fn wait_some<T: AtomicBits>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    if req.nelems == 0 {
        return ok_value(0usize);
    }
    let mut backoff = Backoff::new();
    loop {
        let out = test_some::<T>(ctx, req)?;
        if let Some(ret) = out {
            if usize::from_bits(ret.value) != 0 {
                return Ok(Some(ret));
            }
        }
        backoff.snooze();
    }
}

pub(crate) fn signal_wait_until(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    // Safety: the signal cell is a validated 64-bit word.
    let sig = unsafe { AtomicU64::from_ptr(req.sig_addr as *mut u64) };
    let cmp_value = u64::from_bits(req.cmp_value);
    let mut backoff = Backoff::new();
    loop {
        let v = sig.load(Ordering::SeqCst);
        if compare(v, cmp_value, req.cmp) {
            return ok_value(v);
        }
        backoff.snooze();
    }
}

// =============================================================================
// COLLECTIVES
// =============================================================================

pub(crate) fn barrier(ctx: &ProxyCtx, _req: &Request) -> Result<Option<RetValue>> {
    ctx.runtime.barrier_all();
    ok_none()
}

pub(crate) fn sync(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    ctx.runtime.team_sync(req.team);
    ok_none()
}

pub(crate) fn bcast(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    let root = req.root;
    let is_root = ctx.info.my_pe() == root;
    let addr = if is_root { req.src } else { req.dst };
    ctx.runtime.bcast(addr, req.nelems, root);
    if is_root && req.dst != req.src {
        // Root's destination also observes the broadcast value.
        // Safety: validated issuer-local ranges.
        unsafe {
            ptr::copy_nonoverlapping(req.src as *const u8, req.dst as *mut u8, req.nelems);
        }
    }
    ok_none()
}

pub(crate) fn fcollect(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    ctx.runtime.fcollect(req.dst, req.src, req.nelems);
    ok_none()
}

pub(crate) fn sum_reduce<T>(ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>>
where
    T: RingValue + std::ops::Add<Output = T>,
{
    let team = ctx
        .info
        .team(req.team)
        .ok_or_else(|| ShmemError::Transport(format!("invalid team {}", req.team)))?;
    let n_pes = ctx.info.n_pes() as usize;
    if team.size() as usize != n_pes {
        return Err(ShmemError::Transport(
            "reductions are supported on world-spanning teams only".to_string(),
        ));
    }
    let nreduce = req.nelems;
    let zero = T::from_bits(crate::record::OpValue::ZERO);
    let mut gathered = vec![zero; n_pes * nreduce];
    ctx.runtime.fcollect(
        gathered.as_mut_ptr() as usize,
        req.src,
        nreduce * std::mem::size_of::<T>(),
    );
    let dst = req.dst as *mut T;
    for i in 0..nreduce {
        let mut acc = zero;
        for pe in 0..n_pes {
            acc = acc + gathered[pe * nreduce + i];
        }
        // Safety: validated issuer-local destination of nreduce elements.
        unsafe {
            *dst.add(i) = acc;
        }
    }
    ok_none()
}
