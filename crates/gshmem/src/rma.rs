//! Remote memory access: contiguous, scalar, strided, block-strided, and
//! signaled transfers.
//!
//! On the fast path a put is a batched wide store and a get a batched wide
//! load against the IPC-translated pointer; otherwise the transfer rides
//! the upcall ring. Blocking forms return once the source buffer is
//! reusable; non-blocking forms complete under a later quiet. Zero-length
//! transfers are no-ops and never produce an error.

use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::err::{
    validate_initialized, validate_no_overlap, validate_pe, validate_stride, validate_symmetric,
};
use crate::pe::Pe;
use crate::record::{AtomicBits, Op, Request, RingValue, SignalOp};

fn validate_rma<T>(pe: &Pe, remote: usize, local: usize, nelems: usize, target_pe: i32) {
    let nbytes = nelems * size_of::<T>();
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_symmetric(pe.info(), remote, nbytes)?;
        validate_no_overlap(pe.info(), target_pe, remote, nbytes, local, nbytes)
    });
}

/// Byte extent touched by a strided access of `nelems` blocks.
fn strided_extent<T>(nelems: usize, stride: isize, bsize: usize) -> usize {
    if nelems == 0 {
        return 0;
    }
    ((nelems - 1) * stride as usize + bsize) * size_of::<T>()
}

// =============================================================================
// CONTIGUOUS
// =============================================================================

pub(crate) fn put<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    target_pe: i32,
) {
    validate_rma::<T>(pe, dest as usize, src as usize, nelems, target_pe);
    if nelems == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(dest as usize, target_pe) {
        // Safety: validated symmetric destination in a mapped peer heap.
        unsafe { ptr::copy_nonoverlapping(src, p as *mut T, nelems) };
        return;
    }
    let mut req = Request::new(Op::Put, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nelems;
    pe.invoke_blocking(&mut req);
}

pub(crate) fn put_nbi<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    target_pe: i32,
) {
    validate_rma::<T>(pe, dest as usize, src as usize, nelems, target_pe);
    if nelems == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(dest as usize, target_pe) {
        // Safety: validated symmetric destination in a mapped peer heap.
        unsafe { ptr::copy_nonoverlapping(src, p as *mut T, nelems) };
        return;
    }
    let mut req = Request::new(Op::PutNbi, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nelems;
    pe.invoke_nonblocking(&mut req);
}

pub(crate) fn get<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    target_pe: i32,
) {
    validate_rma::<T>(pe, src as usize, dest as usize, nelems, target_pe);
    if nelems == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(src as usize, target_pe) {
        // Safety: validated symmetric source in a mapped peer heap.
        unsafe { ptr::copy_nonoverlapping(p as *const T, dest, nelems) };
        return;
    }
    let mut req = Request::new(Op::Get, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nelems;
    pe.invoke_blocking(&mut req);
}

pub(crate) fn get_nbi<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    target_pe: i32,
) {
    validate_rma::<T>(pe, src as usize, dest as usize, nelems, target_pe);
    if nelems == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(src as usize, target_pe) {
        // Safety: validated symmetric source in a mapped peer heap.
        unsafe { ptr::copy_nonoverlapping(p as *const T, dest, nelems) };
        return;
    }
    let mut req = Request::new(Op::GetNbi, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nelems;
    pe.invoke_nonblocking(&mut req);
}

/// Scalar put. Scalar cells are frequently paired with wait-until on the
/// receiver, so the store is atomic even on the fast path.
pub(crate) fn p<T: AtomicBits>(pe: &Pe, dest: *mut T, value: T, target_pe: i32) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_symmetric(pe.info(), dest as usize, size_of::<T>())
    });
    if let Some(ptr) = pe.fast_local(dest as usize, target_pe) {
        // Safety: validated symmetric destination in a mapped peer heap.
        unsafe { T::atomic_store(ptr as *mut T, value) };
        return;
    }
    let mut req = Request::new(Op::PutScalar, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.value = value.to_bits();
    pe.invoke_blocking(&mut req);
}

/// Scalar get.
pub(crate) fn g<T: AtomicBits>(pe: &Pe, src: *const T, target_pe: i32) -> T {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_symmetric(pe.info(), src as usize, size_of::<T>())
    });
    if let Some(ptr) = pe.fast_local(src as usize, target_pe) {
        // Safety: validated symmetric source in a mapped peer heap.
        return unsafe { T::atomic_load(ptr as *mut T) };
    }
    let mut req = Request::new(Op::GetScalar, T::BASE);
    req.dest_pe = target_pe;
    req.src = src as usize;
    pe.invoke_blocking_return::<T>(&mut req)
}

// =============================================================================
// STRIDED
// =============================================================================

pub(crate) fn iput<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    dst_stride: isize,
    src_stride: isize,
    nelems: usize,
    target_pe: i32,
) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_stride(dst_stride, 1)?;
        validate_stride(src_stride, 1)?;
        validate_symmetric(
            pe.info(),
            dest as usize,
            strided_extent::<T>(nelems, dst_stride, 1),
        )
    });
    if nelems == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(dest as usize, target_pe) {
        let dst = p as *mut T;
        // Safety: extents validated against the symmetric heap.
        unsafe {
            for i in 0..nelems {
                *dst.offset(i as isize * dst_stride) = *src.offset(i as isize * src_stride);
            }
        }
        return;
    }
    let mut req = Request::new(Op::Iput, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.dst_stride = dst_stride;
    req.src_stride = src_stride;
    req.nelems = nelems;
    pe.invoke_blocking(&mut req);
}

pub(crate) fn iget<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    dst_stride: isize,
    src_stride: isize,
    nelems: usize,
    target_pe: i32,
) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_stride(dst_stride, 1)?;
        validate_stride(src_stride, 1)?;
        validate_symmetric(
            pe.info(),
            src as usize,
            strided_extent::<T>(nelems, src_stride, 1),
        )
    });
    if nelems == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(src as usize, target_pe) {
        let src = p as *const T;
        // Safety: extents validated against the symmetric heap.
        unsafe {
            for i in 0..nelems {
                *dest.offset(i as isize * dst_stride) = *src.offset(i as isize * src_stride);
            }
        }
        return;
    }
    let mut req = Request::new(Op::Iget, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.dst_stride = dst_stride;
    req.src_stride = src_stride;
    req.nelems = nelems;
    pe.invoke_blocking(&mut req);
}

pub(crate) fn ibput<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    dst_stride: isize,
    src_stride: isize,
    bsize: usize,
    nblocks: usize,
    target_pe: i32,
) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_stride(dst_stride, bsize)?;
        validate_stride(src_stride, bsize)?;
        validate_symmetric(
            pe.info(),
            dest as usize,
            strided_extent::<T>(nblocks, dst_stride, bsize),
        )
    });
    if nblocks == 0 || bsize == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(dest as usize, target_pe) {
        let dst = p as *mut T;
        // Safety: block extents validated; blocks do not overlap (stride
        // is at least the block size).
        unsafe {
            for i in 0..nblocks {
                ptr::copy_nonoverlapping(
                    src.offset(i as isize * src_stride),
                    dst.offset(i as isize * dst_stride),
                    bsize,
                );
            }
        }
        return;
    }
    let mut req = Request::new(Op::Ibput, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.dst_stride = dst_stride;
    req.src_stride = src_stride;
    req.bsize = bsize;
    req.nelems = nblocks;
    pe.invoke_blocking(&mut req);
}

pub(crate) fn ibget<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    dst_stride: isize,
    src_stride: isize,
    bsize: usize,
    nblocks: usize,
    target_pe: i32,
) {
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_pe(pe.info(), target_pe)?;
        validate_stride(dst_stride, bsize)?;
        validate_stride(src_stride, bsize)?;
        validate_symmetric(
            pe.info(),
            src as usize,
            strided_extent::<T>(nblocks, src_stride, bsize),
        )
    });
    if nblocks == 0 || bsize == 0 {
        return;
    }
    if let Some(p) = pe.fast_local(src as usize, target_pe) {
        let src = p as *const T;
        // Safety: block extents validated.
        unsafe {
            for i in 0..nblocks {
                ptr::copy_nonoverlapping(
                    src.offset(i as isize * src_stride),
                    dest.offset(i as isize * dst_stride),
                    bsize,
                );
            }
        }
        return;
    }
    let mut req = Request::new(Op::Ibget, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.dst_stride = dst_stride;
    req.src_stride = src_stride;
    req.bsize = bsize;
    req.nelems = nblocks;
    pe.invoke_blocking(&mut req);
}

// =============================================================================
// SIGNALED
// =============================================================================

fn signal_update(sig: *mut u64, value: u64, sig_op: SignalOp) {
    // Safety: the signal cell is a validated 64-bit symmetric word.
    let sig = unsafe { AtomicU64::from_ptr(sig) };
    match sig_op {
        SignalOp::Set => sig.store(value, Ordering::Release),
        SignalOp::Add => {
            sig.fetch_add(value, Ordering::SeqCst);
        }
    }
}

fn put_signal_common<T: RingValue>(
    pe: &Pe,
    op: Op,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    sig_addr: *mut u64,
    signal: u64,
    sig_op: SignalOp,
    target_pe: i32,
) {
    validate_rma::<T>(pe, dest as usize, src as usize, nelems, target_pe);
    pe.validate(|| validate_symmetric(pe.info(), sig_addr as usize, size_of::<u64>()));

    if let Some(p) = pe.fast_local(dest as usize, target_pe) {
        if nelems != 0 {
            // Safety: validated symmetric destination.
            unsafe { ptr::copy_nonoverlapping(src, p as *mut T, nelems) };
        }
        // The signal becomes visible only after the payload bytes.
        std::sync::atomic::fence(Ordering::SeqCst);
        let sig = pe
            .fast_local(sig_addr as usize, target_pe)
            .unwrap_or(sig_addr as usize);
        signal_update(sig as *mut u64, signal, sig_op);
        return;
    }

    let mut req = Request::new(op, T::BASE);
    req.dest_pe = target_pe;
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nelems;
    req.sig_addr = sig_addr as usize;
    req.signal = signal;
    req.sig_op = sig_op;
    if op == Op::PutSignal {
        pe.invoke_blocking(&mut req);
    } else {
        pe.invoke_nonblocking(&mut req);
    }
}

pub(crate) fn put_signal<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    sig_addr: *mut u64,
    signal: u64,
    sig_op: SignalOp,
    target_pe: i32,
) {
    put_signal_common::<T>(
        pe,
        Op::PutSignal,
        dest,
        src,
        nelems,
        sig_addr,
        signal,
        sig_op,
        target_pe,
    );
}

pub(crate) fn put_signal_nbi<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    sig_addr: *mut u64,
    signal: u64,
    sig_op: SignalOp,
    target_pe: i32,
) {
    put_signal_common::<T>(
        pe,
        Op::PutSignalNbi,
        dest,
        src,
        nelems,
        sig_addr,
        signal,
        sig_op,
        target_pe,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_extent() {
        // 4 elements at stride 3: touches indices 0, 3, 6, 9.
        assert_eq!(strided_extent::<u32>(4, 3, 1), 10 * 4);
        // 2 blocks of 2 at stride 4: indices 0..2 and 4..6.
        assert_eq!(strided_extent::<u64>(2, 4, 2), 6 * 8);
        assert_eq!(strided_extent::<u8>(0, 5, 2), 0);
    }
}
