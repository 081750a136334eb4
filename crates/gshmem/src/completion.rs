//! Completion array: per-slot acknowledgement, return-value delivery, and
//! ring flow control.
//!
//! The array holds `2 * RING_SIZE` entries. The first `RING_SIZE` are
//! "built-in", pinned one-to-one to send-ring slots; the rest are
//! "allocated" on demand for long-running non-blocking operations.
//!
//! A built-in completion is complete when the low 16 bits of its sequence
//! match the request sequence and bit 31 is clear. Completions that carry a
//! return value have bit 31 set; the waiter reads the payload and then
//! stores the bare sequence back, which both marks the value as consumed
//! and releases the paired ring slot for its next generation. Built-in
//! sequence numbers double as ring flow control: a slot may be reused only
//! once its previous use shows sequence == previous ticket with bit 31
//! clear.
//!
//! Allocated completions are guarded by their `lock` field (0 idle, 1 in
//! use), set by [`CompletionArray::allocate`], held while the proxy writes,
//! and cleared by [`CompletionArray::free`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

use crate::backoff::Backoff;
use crate::record::OpValue;
use crate::ring::RING_SIZE;

/// Bit 31 of a completion sequence: return value present, not yet consumed.
pub const RETURN_BIT: u32 = 0x8000_0000;

/// Low 16 bits of a sequence participate in slot/ticket correlation.
pub const SEQUENCE_MASK: u32 = 0xffff;

/// Wait mask covering both built-in (low 16 bits + bit 31 cleared by the
/// consumer) and allocated (low 17 bits, invalidated via bit 16) slots, so
/// one wait routine serves both halves.
pub const WAIT_MASK: u32 = 0x1_ffff;

/// A sequence value no 16-bit ticket can produce; stored into a freshly
/// allocated completion so a spurious wake is impossible.
pub const INVALID_SEQUENCE: u32 = 0x1_0000;

/// Return payload: one base-type value plus a status code.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RetValue {
    pub value: OpValue,
    pub status: i32,
}

/// One completion entry.
///
/// `ret` is written once per request by the proxy before the release store
/// of `sequence`, and read once by the waiter after the matching acquire
/// load, so the plain cell never races.
#[repr(C, align(64))]
pub struct CompletionSlot {
    sequence: AtomicU32,
    lock: AtomicU32,
    ret: UnsafeCell<RetValue>,
}

// Safety: the sequence protocol (release publish / acquire wait) orders all
// accesses to `ret`; `lock` serializes ownership of allocated slots.
unsafe impl Send for CompletionSlot {}
unsafe impl Sync for CompletionSlot {}

impl CompletionSlot {
    fn new(sequence: u32) -> Self {
        Self {
            sequence: AtomicU32::new(sequence),
            lock: AtomicU32::new(0),
            ret: UnsafeCell::new(RetValue::default()),
        }
    }

    /// Current sequence word, acquire order.
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Publish completion of request `sequence`, optionally with a return
    /// payload. Sets bit 31 when a value is present; the waiter clears it.
    pub(crate) fn publish(&self, sequence: u16, ret: Option<RetValue>) {
        match ret {
            Some(value) => {
                // Safety: between the previous consumption of this slot and
                // this release store, the proxy is the only accessor.
                unsafe {
                    *self.ret.get() = value;
                }
                self.sequence
                    .store(u32::from(sequence) | RETURN_BIT, Ordering::Release);
            }
            None => {
                self.sequence.store(u32::from(sequence), Ordering::Release);
            }
        }
    }
}

/// The full completion array plus the rotating allocator for its upper half.
pub struct CompletionArray {
    slots: Box<[CompletionSlot]>,
    next_allocated: CachePadded<AtomicU32>,
}

impl CompletionArray {
    pub(crate) fn new() -> Self {
        let mut slots = Vec::with_capacity(RING_SIZE * 2);
        // Built-in half: seed each slot so that generation 0 passes flow
        // control, i.e. sequence == (slot - RING_SIZE) mod 2^16.
        for k in 0..RING_SIZE {
            let seeded = (k as u32).wrapping_sub(RING_SIZE as u32) & SEQUENCE_MASK;
            slots.push(CompletionSlot::new(seeded));
        }
        for _ in 0..RING_SIZE {
            slots.push(CompletionSlot::new(INVALID_SEQUENCE));
        }
        Self {
            slots: slots.into_boxed_slice(),
            next_allocated: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Built-in completion paired with ring slot `slot`.
    #[inline]
    pub(crate) fn builtin(&self, slot: usize) -> &CompletionSlot {
        debug_assert!(slot < RING_SIZE);
        &self.slots[slot]
    }

    /// Any completion by absolute index (built-in or allocated).
    #[inline]
    pub(crate) fn get(&self, index: usize) -> &CompletionSlot {
        &self.slots[index]
    }

    /// Acquire an allocated completion. The rotation spreads contention;
    /// the CAS on `lock` is the actual overlap protection.
    pub fn allocate(&self) -> u16 {
        loop {
            let rotor = self.next_allocated.fetch_add(1, Ordering::SeqCst);
            let index = RING_SIZE + (rotor as usize & (RING_SIZE - 1));
            let slot = &self.slots[index];
            if slot.lock.swap(1, Ordering::SeqCst) == 0 {
                // A sequence no ticket produces, so a stale waiter cannot
                // match before the proxy writes the real one.
                slot.sequence.store(INVALID_SEQUENCE, Ordering::SeqCst);
                // Truncation is safe: index < 2 * RING_SIZE.
                return index as u16;
            }
        }
    }

    /// Release an allocated completion.
    pub fn free(&self, index: usize) {
        debug_assert!((RING_SIZE..RING_SIZE * 2).contains(&index));
        self.slots[index].lock.store(0, Ordering::Release);
    }

    /// Spin until completion `index` acknowledges request `sequence`.
    ///
    /// The mask subsumes both halves: built-in slots match once the proxy
    /// publishes the bare sequence (a still-set bit 31 is invisible to the
    /// mask, which is correct — the value is for this waiter), and
    /// allocated slots start at the invalid sequence so they match only
    /// after the proxy writes.
    pub fn wait(&self, index: usize, sequence: u16) {
        let slot = &self.slots[index];
        let mut backoff = Backoff::new();
        while slot.sequence() & WAIT_MASK != u32::from(sequence) {
            backoff.snooze();
        }
    }

    /// Wait for `sequence` on completion `index`, take its return payload,
    /// and clear bit 31 — marking the value consumed and, for built-in
    /// slots, releasing the paired ring slot for reuse.
    pub(crate) fn wait_return(&self, index: usize, sequence: u16) -> RetValue {
        self.wait(index, sequence);
        let slot = &self.slots[index];
        // Safety: the acquire in `wait` synchronizes with the proxy's
        // release publish; the proxy will not touch `ret` again until the
        // slot's next generation, which cannot begin before the store below.
        let ret = unsafe { *slot.ret.get() };
        slot.sequence.store(u32::from(sequence), Ordering::Release);
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RingValue;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_builtin_seed_passes_first_generation() {
        let arr = CompletionArray::new();
        // Ticket t in [0, RING_SIZE) expects (t - RING_SIZE) mod 2^16.
        for t in [0usize, 1, 17, RING_SIZE - 1] {
            let expected = (t as u32).wrapping_sub(RING_SIZE as u32) & SEQUENCE_MASK;
            assert_eq!(arr.builtin(t % RING_SIZE).sequence(), expected);
        }
    }

    #[test]
    fn test_publish_and_wait_return() {
        let arr = CompletionArray::new();
        let ret = RetValue {
            value: OpValue([0xABCD, 0]),
            status: 0,
        };
        arr.builtin(7).publish(7, Some(ret));
        assert_eq!(arr.builtin(7).sequence(), 7 | RETURN_BIT);

        let got = arr.wait_return(7, 7);
        assert_eq!(got.value.0[0], 0xABCD);
        // Bit 31 cleared: slot released for the next generation.
        assert_eq!(arr.builtin(7).sequence(), 7);
    }

    #[test]
    fn test_allocate_initializes_invalid_sequence() {
        let arr = CompletionArray::new();
        let index = arr.allocate() as usize;
        assert!((RING_SIZE..RING_SIZE * 2).contains(&index));
        assert_eq!(arr.get(index).sequence(), INVALID_SEQUENCE);
        arr.free(index);
    }

    #[test]
    fn test_allocate_skips_held_slots() {
        let arr = CompletionArray::new();
        let first = arr.allocate() as usize;
        let second = arr.allocate() as usize;
        assert_ne!(first, second);
        arr.free(first);
        arr.free(second);
    }

    #[test]
    fn test_allocated_wait_matches_after_publish() {
        let arr = Arc::new(CompletionArray::new());
        let index = arr.allocate() as usize;

        let arr2 = Arc::clone(&arr);
        let waiter = thread::spawn(move || {
            let ret = arr2.wait_return(index, 0x1234);
            usize::from_bits(ret.value)
        });

        arr.get(index).publish(0x1234, Some(RetValue {
            value: 55usize.to_bits(),
            status: 0,
        }));
        assert_eq!(waiter.join().unwrap(), 55);
        arr.free(index);
    }

    #[test]
    fn test_allocate_contention() {
        let arr = Arc::new(CompletionArray::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let arr = Arc::clone(&arr);
            handles.push(thread::spawn(move || {
                let mut held = Vec::new();
                for _ in 0..64 {
                    held.push(arr.allocate());
                }
                for index in &held {
                    arr.free(*index as usize);
                }
                held
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        // Concurrently-held indices were unique per round; after frees the
        // array is fully idle again.
        assert_eq!(all.len(), 8 * 64);
        let probe = arr.allocate();
        arr.free(probe as usize);
    }
}
