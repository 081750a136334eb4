//! Fence and quiet.
//!
//! Fence orders subsequent RMAs to a PE after previously-issued ones; on
//! the fast path a system-scope fence suffices, on the ring path the
//! ordering request rides the FIFO so the handler sees every earlier
//! upcall already retired. Quiet drains this PE's outstanding upcalls —
//! checkpointing `next_send` with a bounded consistency loop, spinning
//! until `next_receive` catches up — and then delegates to the transport.

use std::sync::atomic::Ordering;

use crate::err::validate_initialized;
use crate::pe::Pe;
use crate::record::{BaseType, Op, Request};

pub(crate) fn fence(pe: &Pe) {
    pe.validate(|| validate_initialized(pe.info()));
    if pe.device_side() && pe.info().only_intra_node() {
        // Fast-path stores are plain; a full fence orders them.
        std::sync::atomic::fence(Ordering::SeqCst);
        return;
    }
    let mut req = Request::new(Op::Fence, BaseType::Void);
    pe.invoke_blocking(&mut req);
}

pub(crate) fn quiet(pe: &Pe) {
    pe.validate(|| validate_initialized(pe.info()));
    // Retire everything this PE pushed onto the ring, from any thread.
    pe.ring().drain();
    if pe.device_side() {
        std::sync::atomic::fence(Ordering::SeqCst);
        let mut req = Request::new(Op::Quiet, BaseType::Void);
        pe.invoke_blocking(&mut req);
    } else {
        pe.runtime().quiet();
    }
}
