//! Deadline heap for sleeping coroutines
//!
//! Min-heap on `(deadline, sequence)`. The sequence number makes equal
//! deadlines fire in insertion order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use strand_core::CoroutineId;

#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<(Instant, u64, CoroutineId)>>,
    seq: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` to be woken at `deadline`
    pub fn insert(&mut self, deadline: Instant, id: CoroutineId) {
        self.seq += 1;
        self.heap.push(Reverse((deadline, self.seq, id)));
    }

    /// Earliest pending deadline
    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Time from `now` until the earliest deadline, zero if already due
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline().map(|at| at.saturating_duration_since(now))
    }

    /// Move every coroutine whose deadline is `<= now` into `out`
    pub fn expire(&mut self, now: Instant, out: &mut Vec<CoroutineId>) -> usize {
        let before = out.len();
        while let Some(Reverse((at, _, id))) = self.heap.peek() {
            if *at > now {
                break;
            }
            out.push(*id);
            self.heap.pop();
        }
        out.len() - before
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerHeap::new();
        timers.insert(now + Duration::from_millis(30), CoroutineId::new(3));
        timers.insert(now + Duration::from_millis(10), CoroutineId::new(1));
        timers.insert(now + Duration::from_millis(20), CoroutineId::new(2));

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(timers.timeout(now), Some(Duration::from_millis(10)));

        let mut out = Vec::new();
        assert_eq!(timers.expire(now + Duration::from_millis(25), &mut out), 2);
        assert_eq!(out, vec![CoroutineId::new(1), CoroutineId::new(2)]);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_fifo() {
        let at = Instant::now();
        let mut timers = TimerHeap::new();
        for i in [5, 3, 9] {
            timers.insert(at, CoroutineId::new(i));
        }
        let mut out = Vec::new();
        timers.expire(at, &mut out);
        assert_eq!(out, vec![CoroutineId::new(5), CoroutineId::new(3), CoroutineId::new(9)]);
        assert!(timers.is_empty());
        assert_eq!(timers.timeout(at), None);
    }

    #[test]
    fn test_past_deadline_times_out_immediately() {
        let now = Instant::now();
        let mut timers = TimerHeap::new();
        timers.insert(now, CoroutineId::new(1));
        assert_eq!(timers.timeout(now + Duration::from_secs(1)), Some(Duration::ZERO));
    }
}
