//! The proxy dispatch table: `(op, base type)` to handler.
//!
//! A two-dimensional table of monomorphized function pointers, sized
//! `Op::COUNT x BaseType::COUNT`, constructed at init. Every cell that no
//! registration fills holds the `unsupported` sentinel, which records a
//! diagnostic and returns a fatal status. Each type class is filled
//! mechanically from the type list — the per-type rows are generated, not
//! hand-maintained.

use std::sync::Arc;

use crate::completion::RetValue;
use crate::err::{Result, ShmemError};
use crate::handlers;
use crate::info::GlobalInfo;
use crate::record::{BaseType, Op, Request};
use crate::runtime::Runtime;

/// Context a handler executes against.
pub(crate) struct ProxyCtx {
    pub info: Arc<GlobalInfo>,
    pub runtime: Arc<dyn Runtime>,
    /// Diagnostic backtrace depth for fatal errors.
    pub stack_print_limit: usize,
}

/// Handler signature. `Ok(Some(_))` carries a return payload for the
/// completion; `Err(_)` is fatal at dispatch.
pub(crate) type ProxyFn = fn(&ProxyCtx, &Request) -> Result<Option<RetValue>>;

fn unsupported(_ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
    tracing::error!(op = ?req.op, base = ?req.base, "unsupported (op, type) pair");
    Err(ShmemError::Unsupported {
        op: req.op,
        base: req.base,
    })
}

/// Fill one `(op, type)` cell with a monomorphized handler, or a whole
/// type-class row at once.
macro_rules! fill {
    (@cell $funcs:expr, $op:ident, $handler:ident, $bt:ident, $ty:ty) => {
        $funcs[Op::$op as usize][BaseType::$bt as usize] = handlers::$handler::<$ty> as ProxyFn;
    };
    ($funcs:expr, $op:ident, $handler:ident, void) => {
        $funcs[Op::$op as usize][BaseType::Void as usize] = handlers::$handler as ProxyFn;
    };
    ($funcs:expr, $op:ident, $handler:ident, std) => {
        fill!(@cell $funcs, $op, $handler, Uint8, u8);
        fill!(@cell $funcs, $op, $handler, Uint16, u16);
        fill!(@cell $funcs, $op, $handler, Uint32, u32);
        fill!(@cell $funcs, $op, $handler, Uint64, u64);
        fill!(@cell $funcs, $op, $handler, Int8, i8);
        fill!(@cell $funcs, $op, $handler, Int16, i16);
        fill!(@cell $funcs, $op, $handler, Int32, i32);
        fill!(@cell $funcs, $op, $handler, Int64, i64);
        fill!(@cell $funcs, $op, $handler, Size, usize);
        fill!(@cell $funcs, $op, $handler, Ptrdiff, isize);
    };
    ($funcs:expr, $op:ident, $handler:ident, ext) => {
        fill!($funcs, $op, $handler, std);
        fill!(@cell $funcs, $op, $handler, Float, f32);
        fill!(@cell $funcs, $op, $handler, Double, f64);
    };
    ($funcs:expr, $op:ident, $handler:ident, bits) => {
        fill!(@cell $funcs, $op, $handler, Uint32, u32);
        fill!(@cell $funcs, $op, $handler, Uint64, u64);
        fill!(@cell $funcs, $op, $handler, Int32, i32);
        fill!(@cell $funcs, $op, $handler, Int64, i64);
        fill!(@cell $funcs, $op, $handler, Size, usize);
    };
}

pub(crate) struct DispatchTable {
    funcs: Box<[[ProxyFn; BaseType::COUNT]]>,
}

impl DispatchTable {
    pub(crate) fn new() -> Self {
        let mut funcs =
            vec![[unsupported as ProxyFn; BaseType::COUNT]; Op::COUNT].into_boxed_slice();

        // Service
        fill!(funcs, Nop, nop, void);
        fill!(funcs, Timestamp, timestamp, void);
        fill!(funcs, Print, print, void);
        fill!(funcs, Exit, exit, void);
        fill!(funcs, Fence, fence, void);
        fill!(funcs, Quiet, quiet, void);

        // RMA
        fill!(funcs, Put, put, ext);
        fill!(funcs, PutNbi, put, ext);
        fill!(funcs, Get, get, ext);
        fill!(funcs, GetNbi, get, ext);
        fill!(funcs, PutScalar, put_scalar, ext);
        fill!(funcs, GetScalar, get_scalar, ext);
        fill!(funcs, Iput, iput, ext);
        fill!(funcs, Iget, iget, ext);
        fill!(funcs, Ibput, ibput, ext);
        fill!(funcs, Ibget, ibget, ext);
        fill!(funcs, PutSignal, put_signal, ext);
        fill!(funcs, PutSignalNbi, put_signal, ext);

        // Blocking AMOs
        fill!(funcs, AmoFetch, amo_fetch, ext);
        fill!(funcs, AmoSet, amo_set, ext);
        fill!(funcs, AmoCompareSwap, amo_compare_swap, std);
        fill!(funcs, AmoSwap, amo_swap, ext);
        fill!(funcs, AmoFetchInc, amo_fetch_inc, std);
        fill!(funcs, AmoInc, amo_inc, std);
        fill!(funcs, AmoFetchAdd, amo_fetch_add, ext);
        fill!(funcs, AmoAdd, amo_add, ext);
        fill!(funcs, AmoFetchAnd, amo_fetch_and, bits);
        fill!(funcs, AmoAnd, amo_and, bits);
        fill!(funcs, AmoFetchOr, amo_fetch_or, bits);
        fill!(funcs, AmoOr, amo_or, bits);
        fill!(funcs, AmoFetchXor, amo_fetch_xor, bits);
        fill!(funcs, AmoXor, amo_xor, bits);

        // Non-blocking fetching AMOs
        fill!(funcs, AmoFetchNbi, amo_fetch_nbi, ext);
        fill!(funcs, AmoCompareSwapNbi, amo_compare_swap_nbi, std);
        fill!(funcs, AmoSwapNbi, amo_swap_nbi, ext);
        fill!(funcs, AmoFetchIncNbi, amo_fetch_inc_nbi, std);
        fill!(funcs, AmoFetchAddNbi, amo_fetch_add_nbi, ext);
        fill!(funcs, AmoFetchAndNbi, amo_fetch_and_nbi, bits);
        fill!(funcs, AmoFetchOrNbi, amo_fetch_or_nbi, bits);
        fill!(funcs, AmoFetchXorNbi, amo_fetch_xor_nbi, bits);

        // Point-to-point synchronization
        fill!(funcs, Test, test, std);
        fill!(funcs, TestAll, test_all, std);
        fill!(funcs, TestAny, test_any, std);
        fill!(funcs, TestSome, test_some, std);
        fill!(funcs, TestAllVector, test_all_vector, std);
        fill!(funcs, TestAnyVector, test_any_vector, std);
        fill!(funcs, TestSomeVector, test_some_vector, std);
        fill!(funcs, Wait, wait, std);
        fill!(funcs, WaitAll, wait_all, std);
        fill!(funcs, WaitAny, wait_any, std);
        fill!(funcs, WaitSome, wait_some, std);
        funcs[Op::SignalWaitUntil as usize][BaseType::Uint64 as usize] =
            handlers::signal_wait_until as ProxyFn;

        // Collectives
        fill!(funcs, Barrier, barrier, void);
        fill!(funcs, Sync, sync, void);
        funcs[Op::Bcast as usize][BaseType::Uint8 as usize] = handlers::bcast as ProxyFn;
        funcs[Op::Fcollect as usize][BaseType::Uint8 as usize] = handlers::fcollect as ProxyFn;
        fill!(funcs, SumReduce, sum_reduce, ext);

        Self { funcs }
    }

    /// Constant-time lookup and invocation.
    #[inline]
    pub(crate) fn dispatch(&self, ctx: &ProxyCtx, req: &Request) -> Result<Option<RetValue>> {
        self.funcs[req.op as usize][req.base as usize](ctx, req)
    }
}
