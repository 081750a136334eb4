//! Loom-based exploration of the slot/completion publication protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! The full ring is too large for exhaustive interleaving search, so this
//! models the core protocol in isolation: a producer publishes a payload
//! with a release stamp store, the consumer acquires the stamp, executes,
//! and acknowledges through a completion word that doubles as flow
//! control for the slot's next generation.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU32, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

const EMPTY: u32 = u32::MAX;

/// One slot plus its paired completion.
struct SlotModel {
    stamp: AtomicU32,
    payload: UnsafeCell<u32>,
    completion: AtomicU32,
}

unsafe impl Send for SlotModel {}
unsafe impl Sync for SlotModel {}

impl SlotModel {
    fn new(previous_generation: u32) -> Self {
        Self {
            stamp: AtomicU32::new(EMPTY),
            payload: UnsafeCell::new(0),
            completion: AtomicU32::new(previous_generation),
        }
    }

    /// Producer: wait for the previous generation's ack, publish.
    fn send(&self, ticket: u32, payload: u32, previous: u32) {
        while self.completion.load(Ordering::Acquire) != previous {
            loom::thread::yield_now();
        }
        // Safety: the flow-control spin above excludes every other writer
        // and any reader of the previous payload.
        unsafe {
            *self.payload.get() = payload;
        }
        self.stamp.store(ticket, Ordering::Release);
    }

    /// Consumer: wait for the ticket, read, acknowledge.
    fn receive(&self, ticket: u32) -> u32 {
        while self.stamp.load(Ordering::Acquire) != ticket {
            loom::thread::yield_now();
        }
        // Safety: the acquire above synchronizes with the producer's
        // release stamp store.
        let payload = unsafe { *self.payload.get() };
        self.completion.store(ticket, Ordering::Release);
        payload
    }
}

/// A published payload is read intact by the consumer.
#[test]
fn loom_publish_then_consume() {
    loom::model(|| {
        let slot = Arc::new(SlotModel::new(0xFFF0));
        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.send(7, 0xCAFE, 0xFFF0))
        };
        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.receive(7))
        };
        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), 0xCAFE);
    });
}

/// Two generations through one slot: the second producer cannot overwrite
/// the payload before the consumer acknowledged the first.
#[test]
fn loom_flow_control_two_generations() {
    loom::model(|| {
        let slot = Arc::new(SlotModel::new(0xFFF0));

        let first = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.send(1, 100, 0xFFF0))
        };
        let second = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.send(2, 200, 1))
        };
        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let a = slot.receive(1);
                let b = slot.receive(2);
                (a, b)
            })
        };

        first.join().unwrap();
        second.join().unwrap();
        let (a, b) = consumer.join().unwrap();
        assert_eq!(a, 100);
        assert_eq!(b, 200);
    });
}
