//! The host proxy: dedicated consumer of the upcall ring.
//!
//! One thread per PE polls the ring, dispatches each request through the
//! `(op, type)` table, publishes the completion, and advances the receive
//! counter. Contention-free progress is the common case; the consumer lock
//! only matters for diagnostic progress calls assisting from other threads
//! (e.g. during finalize).

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::completion::RetValue;
use crate::dispatch::{DispatchTable, ProxyCtx};
use crate::err::{fatal, Result};
use crate::record::{Op, Request};
use crate::ring::{SendRing, RING_SIZE};

use crate::backoff::Backoff;

/// Requests consumed per lock acquisition in assisted progress.
const PROGRESS_BURST: usize = 64;

/// Execute one request and publish its completion.
///
/// The built-in completion always gets the sequence store — that is the
/// flow-control release — with bit 31 set only when the waiter has a value
/// to collect from it. When the request names an allocated completion, the
/// return payload goes there instead and the built-in slot is released
/// bare.
fn process(
    table: &DispatchTable,
    ctx: &ProxyCtx,
    ring: &SendRing,
    req: &Request,
) -> Result<()> {
    let ret = table.dispatch(ctx, req)?;
    let slot = usize::from(req.sequence) & (RING_SIZE - 1);
    if req.completion != 0 {
        ring.completions
            .get(usize::from(req.completion))
            .publish(req.sequence, ret.or(Some(RetValue::default())));
        ring.completions.builtin(slot).publish(req.sequence, None);
    } else {
        ring.completions.builtin(slot).publish(req.sequence, ret);
    }
    Ok(())
}

/// Spawn the dedicated proxy thread for one PE.
pub(crate) fn spawn(
    ring: Arc<SendRing>,
    table: Arc<DispatchTable>,
    ctx: ProxyCtx,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("gshmem-proxy-{}", ctx.info.my_pe()))
        .spawn(move || run(&ring, &table, &ctx))
        .expect("failed to spawn proxy thread")
}

fn run(ring: &SendRing, table: &DispatchTable, ctx: &ProxyCtx) {
    tracing::debug!(pe = ctx.info.my_pe(), "proxy thread running");
    let mut backoff = Backoff::new();
    loop {
        if !ring.try_lock_consumer() {
            // An assisting thread holds the ring; let it finish its burst.
            backoff.snooze();
            continue;
        }
        let mut should_exit = false;
        let mut idle = true;
        if let Some(req) = ring.try_receive() {
            idle = false;
            backoff.reset();
            match process(table, ctx, ring, &req) {
                Ok(()) => {
                    ring.advance_receive();
                    should_exit = req.op == Op::Exit;
                }
                Err(err) => {
                    ring.unlock_consumer();
                    fatal(ctx.runtime.as_ref(), ctx.stack_print_limit, &err);
                }
            }
        }
        ring.unlock_consumer();
        if should_exit {
            break;
        }
        if idle {
            backoff.snooze();
        }
    }
    tracing::debug!(pe = ctx.info.my_pe(), "proxy thread exiting");
}

/// Best-effort assisted progress: drain up to a burst of requests if the
/// consumer lock is free. Returns the number consumed.
pub(crate) fn try_progress(ring: &SendRing, table: &DispatchTable, ctx: &ProxyCtx) -> usize {
    if !ring.try_lock_consumer() {
        return 0;
    }
    let mut consumed = 0;
    while consumed < PROGRESS_BURST {
        let Some(req) = ring.try_receive() else { break };
        if req.op == Op::Exit {
            // Leave shutdown to the dedicated thread.
            break;
        }
        match process(table, ctx, ring, &req) {
            Ok(()) => {
                ring.advance_receive();
                consumed += 1;
            }
            Err(err) => {
                ring.unlock_consumer();
                fatal(ctx.runtime.as_ref(), ctx.stack_print_limit, &err);
            }
        }
    }
    ring.unlock_consumer();
    consumed
}
