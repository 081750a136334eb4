//! The upcall send ring: device-side producers, host-side consumer.
//!
//! A fixed array of `RING_SIZE` request slots in memory visible to both
//! sides. Producers obtain a ticket from `next_send` with a relaxed
//! fetch-add, wait for the paired built-in completion to acknowledge the
//! slot's previous generation, write the request, and publish it with a
//! release store of the slot's sequence stamp. The consumer acquires the
//! stamp of slot `next_receive mod RING_SIZE`, dispatches, publishes the
//! completion, and advances `next_receive`.
//!
//! # Memory ordering protocol
//!
//! **Producer (send path):**
//! 1. `next_send.fetch_add(1)` with Relaxed — tickets only need uniqueness
//! 2. Acquire spin on the paired built-in completion (flow control);
//!    synchronizes with the consumer's release publish of the previous
//!    generation, so the slot's prior contents are dead before reuse
//! 3. Plain write of the request record into the slot
//! 4. Release store of the slot stamp — publishes the record
//!
//! **Consumer (receive path):**
//! 1. Acquire load of the slot stamp; any value other than the expected
//!    ticket means "not ready"
//! 2. Plain read (copy-out) of the record
//! 3. Handler runs; completion published with Release
//! 4. `next_receive` advanced with Release — `quiet` acquires it
//!
//! Counters are 32-bit and wrap; only the low 16 bits participate in
//! slot/sequence correlation, leaving 16 bits of safety margin against
//! information lag between the proxy and the producers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

use crate::backoff::Backoff;
use crate::completion::{CompletionArray, SEQUENCE_MASK};
use crate::record::Request;

/// Number of request slots. Fixed at build time; a power of two that
/// divides 2^16 so ticket truncation commutes with slot indexing.
pub const RING_SIZE: usize = 4096;

const RING_MASK: u32 = (RING_SIZE - 1) as u32;

/// Max retries to obtain two consecutive identical reads of `next_send`
/// while draining the ring.
pub const DRAIN_RING_THRESHOLD: u32 = 10;

/// A stamp value no ticket can ever equal before the counter's first full
/// wrap; marks a slot as uninitialized.
const STAMP_EMPTY: u32 = u32::MAX;

/// One request slot. The stamp carries the full 32-bit ticket of the
/// request currently published in `req`.
#[repr(C, align(128))]
struct Slot {
    stamp: AtomicU32,
    req: UnsafeCell<Request>,
}

// Safety: `req` is written only by the producer holding the slot's ticket
// (between flow-control clearance and the stamp release) and read only by
// the consumer after acquiring the matching stamp. Flow control guarantees
// the next writer cannot start before the consumer has published the
// completion for the previous generation.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

/// The send ring plus its completion array and both counters.
pub struct SendRing {
    slots: Box<[Slot]>,
    /// Incremented by producers; read by `drain` with acquire order.
    next_send: CachePadded<AtomicU32>,
    /// Advanced solely by the consumer.
    next_receive: CachePadded<AtomicU32>,
    /// Best-effort consumer exclusion for diagnostic progress calls.
    consumer_lock: AtomicU32,
    pub(crate) completions: CompletionArray,
}

impl SendRing {
    pub(crate) fn new() -> Self {
        let mut slots = Vec::with_capacity(RING_SIZE);
        for _ in 0..RING_SIZE {
            slots.push(Slot {
                stamp: AtomicU32::new(STAMP_EMPTY),
                req: UnsafeCell::new(Request::new(
                    crate::record::Op::Nop,
                    crate::record::BaseType::Void,
                )),
            });
        }
        Self {
            slots: slots.into_boxed_slice(),
            next_send: CachePadded::new(AtomicU32::new(0)),
            next_receive: CachePadded::new(AtomicU32::new(0)),
            consumer_lock: AtomicU32::new(0),
            completions: CompletionArray::new(),
        }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Publish a request; returns the correlation sequence (ticket mod
    /// 2^16) so the caller knows where to look for completion.
    ///
    /// Stalls while the slot's previous generation is unacknowledged. A
    /// completion still carrying bit 31 has a return value that its waiter
    /// has not collected yet; the slot may not be reused until it is.
    pub(crate) fn send(&self, msg: &mut Request) -> u16 {
        let ticket = self.next_send.fetch_add(1, Ordering::Relaxed);
        let slot_index = (ticket & RING_MASK) as usize;
        msg.sequence = ticket as u16;

        // Flow control: previous use of the slot must be fully complete.
        let comp = self.completions.builtin(slot_index);
        let expected = ticket.wrapping_sub(RING_SIZE as u32) & SEQUENCE_MASK;
        let mut backoff = Backoff::new();
        while comp.sequence() != expected {
            backoff.snooze();
        }

        let slot = &self.slots[slot_index];
        // Safety: the flow-control spin above synchronizes with the
        // consumer's completion publish for the previous generation, so no
        // reader of the old record remains and no other producer holds this
        // ticket.
        unsafe {
            *slot.req.get() = *msg;
        }
        slot.stamp.store(ticket, Ordering::Release);
        ticket as u16
    }

    /// Blocking form: publish and wait for the built-in completion. Clears
    /// the `completion` field to signal "built-in only".
    pub(crate) fn sendwait(&self, msg: &mut Request) {
        msg.completion = 0;
        let sequence = self.send(msg);
        let slot_index = (u32::from(sequence) & RING_MASK) as usize;
        let comp = self.completions.builtin(slot_index);
        let mut backoff = Backoff::new();
        // Exact compare: a sequence carrying an uncollected return value
        // has bit 31 set and will not match.
        while comp.sequence() != u32::from(sequence) {
            backoff.snooze();
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Copy out the next pending request, if one is published.
    pub(crate) fn try_receive(&self) -> Option<Request> {
        let ticket = self.next_receive.load(Ordering::Relaxed);
        let slot = &self.slots[(ticket & RING_MASK) as usize];
        if slot.stamp.load(Ordering::Acquire) != ticket {
            return None;
        }
        // Safety: the acquire load above synchronizes with the producer's
        // release stamp store; the producer of the next generation is held
        // off by flow control until this request's completion publishes.
        Some(unsafe { *slot.req.get() })
    }

    /// Advance past the request most recently returned by `try_receive`.
    /// Called only after its completion has been published.
    pub(crate) fn advance_receive(&self) {
        self.next_receive.fetch_add(1, Ordering::Release);
    }

    /// Best-effort second-consumer exclusion, intended for diagnostic
    /// progress calls (e.g. from finalize).
    pub(crate) fn try_lock_consumer(&self) -> bool {
        self.consumer_lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn unlock_consumer(&self) {
        self.consumer_lock.store(0, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // DRAIN
    // ---------------------------------------------------------------------

    /// Wait until every ticket issued before this call has been consumed.
    ///
    /// `next_send` is sampled until two consecutive reads agree, bounded by
    /// [`DRAIN_RING_THRESHOLD`]; on exhaustion a warning is logged and the
    /// last observed value is used as the checkpoint.
    pub(crate) fn drain(&self) {
        let mut checkpoint = self.next_send.load(Ordering::Acquire);
        let mut observed = self.next_send.load(Ordering::Acquire);
        let mut iteration = 0;
        while checkpoint != observed {
            iteration += 1;
            if iteration > DRAIN_RING_THRESHOLD {
                tracing::warn!(
                    checkpoint,
                    "could not obtain a consistent read of next_send; quiet may not \
                     cover every in-flight upcall"
                );
                checkpoint = observed;
                break;
            }
            checkpoint = observed;
            observed = self.next_send.load(Ordering::Acquire);
        }

        let mut backoff = Backoff::new();
        while (checkpoint.wrapping_sub(self.next_receive.load(Ordering::Acquire)) as i32) > 0 {
            backoff.snooze();
        }
    }

    /// Current send ticket — for debugging and tests.
    pub(crate) fn next_send(&self) -> u32 {
        self.next_send.load(Ordering::Acquire)
    }

    /// Current receive ticket — for debugging and tests.
    pub(crate) fn next_receive(&self) -> u32 {
        self.next_receive.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BaseType, Op, RingValue};
    use std::sync::Arc;
    use std::thread;

    /// Minimal consumer: acknowledge `count` requests in ticket order,
    /// returning each observed (ticket, dst) pair.
    fn consume(ring: &SendRing, count: usize) -> Vec<(u16, usize)> {
        let mut seen = Vec::with_capacity(count);
        let mut backoff = Backoff::new();
        while seen.len() < count {
            match ring.try_receive() {
                Some(req) => {
                    backoff.reset();
                    seen.push((req.sequence, req.dst));
                    let slot = usize::from(req.sequence) & (RING_SIZE - 1);
                    ring.completions.builtin(slot).publish(req.sequence, None);
                    ring.advance_receive();
                }
                None => backoff.snooze(),
            }
        }
        seen
    }

    fn request(dst: usize) -> Request {
        let mut req = Request::new(Op::PutNbi, BaseType::Uint64);
        req.dst = dst;
        req
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let ring = SendRing::new();
        let mut req = request(0x1000);
        let seq = ring.send(&mut req);
        assert_eq!(seq, 0);

        let got = ring.try_receive().expect("published request visible");
        assert_eq!(got.dst, 0x1000);
        assert_eq!(got.sequence, 0);
    }

    #[test]
    fn test_empty_ring_yields_nothing() {
        let ring = SendRing::new();
        assert!(ring.try_receive().is_none());
    }

    #[test]
    fn test_sequence_stamps_requests_in_ticket_order() {
        let ring = Arc::new(SendRing::new());
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || consume(&ring, 100))
        };
        for i in 0..100 {
            ring.send(&mut request(i));
        }
        let seen = consumer.join().unwrap();
        for (i, (seq, _)) in seen.iter().enumerate() {
            assert_eq!(usize::from(*seq), i);
        }
    }

    #[test]
    fn test_generation_monotonicity_across_wrap() {
        // Push several generations through one ring; each slot's observed
        // sequence must advance in steps of RING_SIZE modulo 2^16.
        let ring = Arc::new(SendRing::new());
        let total = RING_SIZE * 3 + 5;
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || consume(&ring, total))
        };
        for i in 0..total {
            ring.send(&mut request(i));
        }
        let seen = consumer.join().unwrap();
        let mut last: Vec<Option<u16>> = vec![None; RING_SIZE];
        for (seq, _) in seen {
            let slot = usize::from(seq) & (RING_SIZE - 1);
            if let Some(prev) = last[slot] {
                assert_eq!(
                    seq,
                    prev.wrapping_add(RING_SIZE as u16),
                    "slot {slot} skipped a generation"
                );
            }
            last[slot] = Some(seq);
        }
    }

    #[test]
    fn test_flow_control_blocks_unacked_slot() {
        // Fill every slot without acknowledging; the next send must stall
        // until the consumer releases slot 0.
        let ring = Arc::new(SendRing::new());
        for i in 0..RING_SIZE {
            ring.send(&mut request(i));
        }

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                ring.send(&mut request(0xdead));
            })
        };
        // The producer holds ticket RING_SIZE and spins on slot 0.
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!producer.is_finished(), "send overtook an unacked slot");

        let _ = consume(&ring, 1);
        producer.join().unwrap();
        assert_eq!(ring.next_send(), RING_SIZE as u32 + 1);
    }

    #[test]
    fn test_uncollected_return_blocks_reuse() {
        let ring = Arc::new(SendRing::new());
        ring.send(&mut request(1));

        // Complete slot 0 with a pending return value (bit 31 set).
        let req = ring.try_receive().unwrap();
        ring.completions.builtin(0).publish(
            req.sequence,
            Some(crate::completion::RetValue {
                value: 9usize.to_bits(),
                status: 0,
            }),
        );
        ring.advance_receive();

        // Fill the remaining slots, then try to reuse slot 0.
        for i in 1..RING_SIZE {
            ring.send(&mut request(i));
        }
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                ring.send(&mut request(0xbeef));
            })
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(
            !producer.is_finished(),
            "slot reused while its return value was pending"
        );

        // Collecting the value clears bit 31 and releases the slot.
        let ret = ring.completions.wait_return(0, req.sequence);
        assert_eq!(usize::from_bits(ret.value), 9);
        producer.join().unwrap();
    }

    #[test]
    fn test_concurrent_producers_unique_tickets() {
        let ring = Arc::new(SendRing::new());
        let total = 64 * 8;
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || consume(&ring, total))
        };
        let mut producers = Vec::new();
        for p in 0..8 {
            let ring = Arc::clone(&ring);
            producers.push(thread::spawn(move || {
                for i in 0..64 {
                    ring.send(&mut request(p * 1000 + i));
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }
        let mut seen = consumer.join().unwrap();
        seen.sort_unstable();
        for (i, (seq, _)) in seen.iter().enumerate() {
            assert_eq!(usize::from(*seq), i, "duplicate or missing ticket");
        }
    }

    #[test]
    fn test_drain_waits_for_consumption() {
        let ring = Arc::new(SendRing::new());
        for i in 0..16 {
            ring.send(&mut request(i));
        }
        let drainer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.drain())
        };
        thread::sleep(std::time::Duration::from_millis(10));
        assert!(!drainer.is_finished(), "drain returned before consumption");
        let _ = consume(&ring, 16);
        drainer.join().unwrap();
        assert_eq!(ring.next_receive(), 16);
    }

    #[test]
    fn test_consumer_lock_excludes() {
        let ring = SendRing::new();
        assert!(ring.try_lock_consumer());
        assert!(!ring.try_lock_consumer());
        ring.unlock_consumer();
        assert!(ring.try_lock_consumer());
        ring.unlock_consumer();
    }
}
