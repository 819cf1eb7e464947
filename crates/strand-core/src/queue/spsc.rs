//! Single-producer / single-consumer ring buffer
//!
//! The ring has a power-of-two number of slots and keeps one slot empty to
//! tell "full" from "empty", so a ring of size N holds N-1 values:
//!
//! - full:  `(tail + 1) & mask == head`
//! - empty: `head == tail`
//!
//! The producer owns `tail`, the consumer owns `head`. Each side publishes
//! its index with a release store and reads the other side's index with an
//! acquire load.
//!
//! Used directly (`&mut self`) the queue is a plain local ring. `split()`
//! hands out a `Producer` and a `Consumer` that may live on different
//! threads; the single-producer / single-consumer contract is then carried
//! by the types.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use super::ring_size;

/// Bounded SPSC ring buffer
pub struct SpscQueue<T> {
    /// Consumer-owned read index
    head: CachePadded<AtomicUsize>,
    /// Producer-owned write index
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: values move between threads only through the publish protocol
// below, and `Sync` is only reachable through `split()` which hands out
// exactly one producer and one consumer.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Create a queue able to hold at least `capacity` values
    ///
    /// The ring is rounded up to the next power of two above `capacity`.
    pub fn new(capacity: usize) -> Self {
        let size = ring_size(capacity + 1);
        let buffer = (0..size)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: size - 1,
            buffer,
        }
    }

    /// Split into a producer and a consumer half
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let shared = Arc::new(self);
        (
            Producer { queue: Arc::clone(&shared) },
            Consumer { queue: shared },
        )
    }

    /// Push a value, handing it back if the ring is full
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        // Safety: `&mut self` excludes any concurrent producer
        unsafe { self.push_shared(value) }
    }

    /// Pop the oldest value
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // Safety: `&mut self` excludes any concurrent consumer
        unsafe { self.pop_shared() }
    }

    /// # Safety
    ///
    /// At most one thread may be pushing at any time.
    unsafe fn push_shared(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;
        if next == self.head.load(Ordering::Acquire) {
            return Err(value);
        }
        (*self.buffer[tail].get()).write(value);
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// # Safety
    ///
    /// At most one thread may be popping at any time.
    unsafe fn pop_shared(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let value = (*self.buffer[head].get()).assume_init_read();
        self.head.store((head + 1) & self.mask, Ordering::Release);
        Some(value)
    }

    /// Number of values the ring can hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask
    }

    /// Approximate number of queued values (exact when not shared)
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

/// Producing half of a split [`SpscQueue`]
pub struct Producer<T> {
    queue: Arc<SpscQueue<T>>,
}

impl<T> Producer<T> {
    /// Push a value, handing it back if the ring is full
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        // Safety: Producer is unique and not Clone
        unsafe { self.queue.push_shared(value) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}

/// Consuming half of a split [`SpscQueue`]
pub struct Consumer<T> {
    queue: Arc<SpscQueue<T>>,
}

impl<T> Consumer<T> {
    /// Pop the oldest value
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // Safety: Consumer is unique and not Clone
        unsafe { self.queue.pop_shared() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
