//! Bounded multi-producer / multi-consumer ring buffer
//!
//! Each cell carries a sequence number. For a cell at ring position `i`
//! the sequence walks `i, i+1, i+size, i+size+1, ...`: a producer may claim
//! the cell when `seq == pos`, a consumer when `seq == pos + 1`. Positions
//! only grow, so a stale claimant always sees a mismatched sequence and
//! retries instead of touching a recycled cell.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use super::ring_size;

struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC queue
///
/// `push` and `pop` take `&self` and may be called from any number of
/// threads. Capacity is rounded up to a power of two (minimum 2) and every
/// slot is usable.
pub struct MpmcQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// Safety: a cell's data is only touched by the thread that won the CAS on
// the matching position, and handed over through the sequence publish.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a queue holding at least `capacity` values
    pub fn new(capacity: usize) -> Self {
        let size = ring_size(capacity);
        let buffer = (0..size)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: size - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Push a value, handing it back if the queue is full
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made this cell ours until we publish
                        unsafe { (*cell.data.get()).write(value) };
                        cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Cell still holds a value from the previous lap
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the oldest available value
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the producer published this cell and the
                        // CAS made us its only reader
                        let value = unsafe { (*cell.data.get()).assume_init_read() };
                        cell.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Snapshot of the number of queued values
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Acquire);
        let head = self.dequeue_pos.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU64;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_single_thread_fifo() {
        let q = MpmcQueue::new(4);
        assert_eq!(q.capacity(), 4);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        assert_eq!(q.push(99), Err(99));
        assert_eq!(q.len(), 4);
        for i in 0..4 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_minimum_size() {
        let q = MpmcQueue::new(1);
        assert_eq!(q.capacity(), 2);
        q.push('a').unwrap();
        q.push('b').unwrap();
        assert!(q.push('c').is_err());
        assert_eq!(q.pop(), Some('a'));
        q.push('c').unwrap();
        assert_eq!(q.pop(), Some('b'));
        assert_eq!(q.pop(), Some('c'));
    }

    #[test]
    fn test_many_laps() {
        let q = MpmcQueue::new(8);
        for lap in 0..1000u32 {
            for i in 0..5 {
                q.push(lap * 10 + i).unwrap();
            }
            for i in 0..5 {
                assert_eq!(q.pop(), Some(lap * 10 + i));
            }
        }
    }

    #[test]
    fn test_drop_releases_values() {
        let marker = Arc::new(());
        {
            let q = MpmcQueue::new(16);
            for _ in 0..10 {
                q.push(Arc::clone(&marker)).unwrap();
            }
            drop(q.pop());
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_concurrent_exactly_once() {
        const PRODUCERS: u64 = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: u64 = 25_000;
        const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

        let q = Arc::new(MpmcQueue::new(128));
        let popped = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut v = p * PER_PRODUCER + i;
                    while let Err(back) = q.push(v) {
                        v = back;
                        thread::yield_now();
                    }
                }
            }));
        }

        for _ in 0..CONSUMERS {
            let q = Arc::clone(&q);
            let popped = Arc::clone(&popped);
            let seen = Arc::clone(&seen);
            handles.push(thread::spawn(move || {
                let mut local = Vec::new();
                while popped.load(Ordering::Relaxed) < TOTAL {
                    match q.pop() {
                        Some(v) => {
                            local.push(v);
                            popped.fetch_add(1, Ordering::Relaxed);
                        }
                        None => thread::yield_now(),
                    }
                }
                let mut seen = seen.lock().unwrap();
                for v in local {
                    assert!(seen.insert(v), "value {} popped twice", v);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len() as u64, TOTAL);
        assert!(q.is_empty());
    }

    #[test]
    fn test_per_producer_order_preserved() {
        // With one consumer, values from each producer arrive in push order
        let q = Arc::new(MpmcQueue::new(64));
        let producers: Vec<_> = (0..3u64)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..10_000u64 {
                        let mut v = (p, i);
                        while let Err(back) = q.push(v) {
                            v = back;
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut last = [None::<u64>; 3];
        let mut received = 0;
        while received < 30_000 {
            if let Some((p, i)) = q.pop() {
                if let Some(prev) = last[p as usize] {
                    assert!(i > prev);
                }
                last[p as usize] = Some(i);
                received += 1;
            } else {
                thread::yield_now();
            }
        }
        for h in producers {
            h.join().unwrap();
        }
    }
}
