// src/spsc.rs
//
// Bounded wait-free queue for exactly one producer thread and one consumer
// thread. Every cross-thread hand-off in the venue goes through one of
// these; multi-producer or multi-consumer use is undefined.
//
// Protocol: the producer publishes a slot before advancing `write`
// (Release), the consumer moves a value out before advancing `read`
// (Release), and each side observes the other's cursor with Acquire.
// Cursors count monotonically and are masked into the slot array, so
// occupancy is a wrapping subtraction rather than a modulo comparison.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One cursor per cache line so the two sides never false-share.
#[repr(align(64))]
struct Cursor {
    pos: AtomicUsize,
}

impl Cursor {
    fn new() -> Self {
        Self { pos: AtomicUsize::new(0) }
    }
}

pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    write: Cursor,
    read: Cursor,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Capacity is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two().max(2);
        let slots: Box<[_]> = (0..cap).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
        Self { slots, mask: cap - 1, write: Cursor::new(), read: Cursor::new() }
    }

    /// Producer side. A full ring hands the value back; callers on the hot
    /// path treat that as a capacity misconfiguration and abort.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), T> {
        let write = self.write.pos.load(Ordering::Relaxed);
        let read = self.read.pos.load(Ordering::Acquire);
        if write.wrapping_sub(read) == self.slots.len() {
            return Err(value);
        }
        unsafe { (*self.slots[write & self.mask].get()).write(value) };
        self.write.pos.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let read = self.read.pos.load(Ordering::Relaxed);
        if read == self.write.pos.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*self.slots[read & self.mask].get()).assume_init_read() };
        self.read.pos.store(read.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Occupancy estimate; exact only from the owning producer or consumer
    /// thread.
    #[inline]
    pub fn len(&self) -> usize {
        self.write.pos.load(Ordering::Relaxed).wrapping_sub(self.read.pos.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order_across_threads() {
        let q: Arc<SpscRing<u64>> = Arc::new(SpscRing::new(1024));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                for i in 0..100_000u64 {
                    let mut v = i;
                    loop {
                        match q.push(v) {
                            Ok(()) => break,
                            Err(back) => { v = back; std::hint::spin_loop(); }
                        }
                    }
                }
            })
        };
        let mut expect = 0u64;
        while expect < 100_000 {
            if let Some(v) = q.pop() {
                assert_eq!(v, expect);
                expect += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_fails_when_full() {
        let q: SpscRing<u32> = SpscRing::new(4);
        for i in 0..4 { assert!(q.push(i).is_ok()); }
        assert_eq!(q.push(99), Err(99));
        assert_eq!(q.pop(), Some(0));
        assert!(q.push(99).is_ok());
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn capacity_rounds_up() {
        let q: SpscRing<u8> = SpscRing::new(5);
        assert_eq!(q.capacity(), 8);
    }
}
