//! Work-group cooperation: leader election, broadcast, and AND-reduction.
//!
//! The group variants of the test/wait families elect a leader to perform
//! the check once and broadcast the result to every member. A
//! [`WorkGroup`] models the cooperating threads: member 0 is the leader,
//! a reusable barrier separates the phases, and a shared cell carries the
//! broadcast value.

use std::sync::{Barrier, Mutex};

use crate::record::{OpValue, RingValue};

/// A fixed-size group of cooperating threads.
pub struct WorkGroup {
    size: usize,
    barrier: Barrier,
    cell: Mutex<OpValue>,
    acc: Mutex<u64>,
}

impl WorkGroup {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a work group needs at least one member");
        Self {
            size,
            barrier: Barrier::new(size),
            cell: Mutex::new(OpValue::ZERO),
            acc: Mutex::new(0),
        }
    }

    /// Number of members.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `member` is the elected leader.
    #[inline]
    pub fn is_leader(&self, member: usize) -> bool {
        member == 0
    }

    /// Barrier across all members.
    pub fn sync(&self) {
        self.barrier.wait();
    }

    /// Leader computes, everyone receives. Every member must call with the
    /// same `member` identity it holds; only the leader's `value` is used.
    pub fn broadcast<T: RingValue>(&self, member: usize, value: impl FnOnce() -> T) -> T {
        self.sync();
        if self.is_leader(member) {
            *self.cell.lock().expect("group cell poisoned") = value().to_bits();
        }
        self.sync();
        let out = T::from_bits(*self.cell.lock().expect("group cell poisoned"));
        self.sync();
        out
    }

    /// AND-reduce a per-member predicate across the group.
    pub fn all(&self, member: usize, local: bool) -> bool {
        self.sync();
        if self.is_leader(member) {
            *self.acc.lock().expect("group acc poisoned") = 1;
        }
        self.sync();
        {
            let mut acc = self.acc.lock().expect("group acc poisoned");
            *acc &= u64::from(local);
        }
        self.sync();
        let out = *self.acc.lock().expect("group acc poisoned") != 0;
        self.sync();
        out
    }

    /// Partition `0..nelems` across members by stride.
    pub fn partition(&self, member: usize, nelems: usize) -> impl Iterator<Item = usize> {
        let size = self.size;
        (member..nelems).step_by(size.max(1))
    }
}
