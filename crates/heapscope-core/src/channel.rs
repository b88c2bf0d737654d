//! Bounded multi-producer ring buffer between producer call-sites and the
//! consumer thread.
//!
//! Every slot carries a stamp encoding the position it is ready for. A
//! producer claims a position with a compare-and-swap on `tail`, writes the
//! payload, then publishes it by storing `position + 1` into the stamp with
//! `Release`. The consumer only reads a slot after observing that stamp with
//! `Acquire`, and hands the slot back to the next lap by storing
//! `position + one_lap`.
//!
//! Positions pack a lap counter above the slot index so that a stale stamp
//! from the previous lap is distinguishable from a free slot. Capacity is
//! exact and fixed at construction. Neither side ever waits on the other:
//! a push that finds the next slot still occupied fails with the value
//! handed back, and a pop that finds the next slot unpublished reports empty.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

struct Slot<T> {
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

pub struct EventChannel<T> {
    /// Next position to read.
    head: CachePadded<AtomicUsize>,
    /// Next position to claim for writing.
    tail: CachePadded<AtomicUsize>,
    buffer: Box<[Slot<T>]>,
    capacity: usize,
    /// Smallest power of two strictly greater than `capacity`.
    one_lap: usize,
}

// SAFETY: slot contents are only accessed by the single thread that won the
// claim for that position, and hand-over between threads goes through the
// Release/Acquire stamp protocol. Values are moved across threads, so `T`
// must be `Send`.
unsafe impl<T: Send> Send for EventChannel<T> {}
// SAFETY: see above; shared access never creates aliased `&mut` to a slot.
unsafe impl<T: Send> Sync for EventChannel<T> {}

impl<T> EventChannel<T> {
    /// Create a channel with exactly `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or too large to encode a lap counter.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        assert!(
            capacity <= 1 << (usize::BITS - 2),
            "channel capacity {capacity} is too large"
        );

        let buffer: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            capacity,
            one_lap: (capacity + 1).next_power_of_two(),
        }
    }

    /// Position following `pos`, wrapping into the next lap after the last slot.
    #[inline]
    fn advance(&self, pos: usize) -> usize {
        let index = pos & (self.one_lap - 1);
        let lap = pos & !(self.one_lap - 1);
        if index + 1 < self.capacity {
            pos.wrapping_add(1)
        } else {
            lap.wrapping_add(self.one_lap)
        }
    }

    /// Try to enqueue `value` without blocking.
    ///
    /// Returns the value back when the channel is full so the caller can
    /// release whatever it owns.
    pub fn push(&self, value: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let index = tail & (self.one_lap - 1);
            let slot = &self.buffer[index];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail {
                let next = self.advance(tail);
                match self.tail.compare_exchange_weak(
                    tail,
                    next,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the successful CAS gives this thread sole
                        // ownership of the slot until the stamp is published,
                        // and the Acquire stamp load ordered us after the
                        // consumer's last read of it.
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        slot.stamp.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        backoff.spin();
                    }
                }
            } else if stamp.wrapping_add(self.one_lap) == tail.wrapping_add(1) {
                // Slot still holds an unread value from the previous lap.
                return Err(value);
            } else {
                // Another producer claimed this position first.
                backoff.spin();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Try to dequeue the oldest published value without blocking.
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let index = head & (self.one_lap - 1);
            let slot = &self.buffer[index];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head.wrapping_add(1) {
                let next = self.advance(head);
                match self.head.compare_exchange_weak(
                    head,
                    next,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the stamp proves the value was fully written
                        // and published; the CAS makes this the only reader.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.stamp
                            .store(head.wrapping_add(self.one_lap), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        head = current;
                        backoff.spin();
                    }
                }
            } else if stamp == head {
                // Empty, or the producer that claimed this slot has not
                // published yet.
                return None;
            } else {
                backoff.spin();
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of queued values. Advisory only.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        let hix = head & (self.one_lap - 1);
        let tix = tail & (self.one_lap - 1);

        if hix < tix {
            tix - hix
        } else if hix > tix {
            self.capacity - hix + tix
        } else if tail == head {
            0
        } else {
            self.capacity
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for EventChannel<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
