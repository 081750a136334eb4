//! Collectives entry points.
//!
//! The algorithms themselves live behind the runtime contract; this module
//! only moves each collective into and out of the upcall ring (or invokes
//! the handler directly in host mode). All collectives are blocking and
//! must be entered by every member PE.

use std::mem::size_of;

use crate::err::{validate_initialized, validate_symmetric};
use crate::pe::Pe;
use crate::record::{BaseType, Op, Request, RingValue};
use crate::team::TeamId;

/// Barrier across all PEs: quiet plus synchronization.
pub(crate) fn barrier_all(pe: &Pe) {
    crate::ordering::quiet(pe);
    let mut req = Request::new(Op::Barrier, BaseType::Void);
    pe.invoke_blocking(&mut req);
}

/// Synchronize without implying quiet.
pub(crate) fn sync_all(pe: &Pe) {
    pe.validate(|| validate_initialized(pe.info()));
    let mut req = Request::new(Op::Sync, BaseType::Void);
    req.team = crate::team::TEAM_WORLD;
    pe.invoke_blocking(&mut req);
}

pub(crate) fn team_sync(pe: &Pe, team: TeamId) {
    pe.validate(|| validate_initialized(pe.info()));
    let mut req = Request::new(Op::Sync, BaseType::Void);
    req.team = team;
    pe.invoke_blocking(&mut req);
}

/// Replicate `nelems` elements from `root`'s `src` into every PE's `dest`.
pub(crate) fn broadcast<T: RingValue>(
    pe: &Pe,
    dest: *mut T,
    src: *const T,
    nelems: usize,
    root: i32,
) {
    let nbytes = nelems * size_of::<T>();
    pe.validate(|| {
        validate_initialized(pe.info())?;
        crate::err::validate_pe(pe.info(), root)?;
        validate_symmetric(pe.info(), dest as usize, nbytes)
    });
    let mut req = Request::new(Op::Bcast, BaseType::Uint8);
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nbytes;
    req.root = root;
    pe.invoke_blocking(&mut req);
}

/// Concatenate every PE's `nelems` elements into each PE's `dest` in rank
/// order.
pub(crate) fn fcollect<T: RingValue>(pe: &Pe, dest: *mut T, src: *const T, nelems: usize) {
    let nbytes = nelems * size_of::<T>();
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_symmetric(pe.info(), dest as usize, nbytes * pe.n_pes() as usize)
    });
    let mut req = Request::new(Op::Fcollect, BaseType::Uint8);
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nbytes;
    pe.invoke_blocking(&mut req);
}

/// Element-wise sum over the team into every member's `dest`.
pub(crate) fn sum_reduce<T>(pe: &Pe, team: TeamId, dest: *mut T, src: *const T, nreduce: usize)
where
    T: RingValue + std::ops::Add<Output = T>,
{
    let nbytes = nreduce * size_of::<T>();
    pe.validate(|| {
        validate_initialized(pe.info())?;
        validate_symmetric(pe.info(), dest as usize, nbytes)
    });
    let mut req = Request::new(Op::SumReduce, T::BASE);
    req.team = team;
    req.dst = dest as usize;
    req.src = src as usize;
    req.nelems = nreduce;
    pe.invoke_blocking(&mut req);
}
