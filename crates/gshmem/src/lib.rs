//! gshmem — host-device upcall ring and proxy engine for a GPU-centric
//! PGAS SHMEM library.
//!
//! Code running on a processing element (PE) performs symmetric-heap RMA,
//! atomics, point-to-point synchronization, signaling, and collectives
//! against other PEs. Operations on intra-node peers reachable through IPC
//! run directly over translated pointers with system-scope atomics; every
//! other operation is packed into a fixed-size request and pushed through
//! a lock-free upcall ring to a host proxy thread, which dispatches it
//! through an `(op, type)` table and acknowledges it through a completion
//! array that doubles as ring flow control.
//!
//! # Example
//!
//! ```no_run
//! use gshmem::{Attr, LocalWorld};
//!
//! // Two PEs as threads of this process; PE 1 owns a counter that PE 0
//! // bumps atomically.
//! LocalWorld::launch(2, Attr::default(), |pe| {
//!     let counter = pe.malloc(8).unwrap() as *mut u64;
//!     if pe.my_pe() == 0 {
//!         let prev = pe.atomic_fetch_add(counter, 5, 1);
//!         assert_eq!(prev % 5, 0);
//!     }
//!     pe.barrier_all();
//! });
//! ```

mod amo;
mod backoff;
mod collectives;
mod completion;
mod config;
mod dispatch;
mod err;
mod group;
mod handlers;
mod heap;
mod info;
mod ordering;
mod pe;
mod proxy;
mod record;
mod ring;
mod rma;
pub mod runtime;
mod sync;
mod team;

pub use backoff::Backoff;
pub use completion::{
    CompletionArray, CompletionSlot, RetValue, INVALID_SEQUENCE, RETURN_BIT, SEQUENCE_MASK,
    WAIT_MASK,
};
pub use config::{Attr, STACK_PRINT_MAX, STACK_PRINT_MIN};
pub use err::{Result, ShmemError};
pub use group::WorkGroup;
pub use info::GlobalInfo;
pub use pe::{init, Pe, TimestampHandle};
pub use record::{
    compare, AtomicArith, AtomicBits, AtomicBitwise, BaseType, Cmp, Op, OpValue, Request,
    RingValue, SignalOp,
};
pub use ring::{DRAIN_RING_THRESHOLD, RING_SIZE};
pub use runtime::{LocalRuntime, LocalWorld, Runtime, RuntimeKind};
pub use team::{Team, TeamId, TEAM_INVALID, TEAM_NODE, TEAM_SHARED, TEAM_WORLD};
