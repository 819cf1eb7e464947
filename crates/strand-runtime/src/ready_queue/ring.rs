//! Ring-buffer ready queue
//!
//! Ids live in a fixed `SpscQueue`. When the ring is full new ids go to an
//! overflow deque, and every push after that also goes there until the
//! overflow has drained back into the ring. Overflow entries are therefore
//! always younger than ring entries and FIFO order survives the spill.

use std::collections::VecDeque;

use strand_core::{kdebug, CoroutineId, SpscQueue};

use super::ReadyQueue;

pub struct RingQueue {
    ring: SpscQueue<CoroutineId>,
    overflow: VecDeque<CoroutineId>,
    spills: u64,
}

impl RingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: SpscQueue::new(capacity),
            overflow: VecDeque::new(),
            spills: 0,
        }
    }

    /// How many pushes landed in the overflow list so far
    pub fn spills(&self) -> u64 {
        self.spills
    }

    fn refill(&mut self) {
        while let Some(id) = self.overflow.pop_front() {
            if let Err(id) = self.ring.push(id) {
                self.overflow.push_front(id);
                break;
            }
        }
    }
}

impl ReadyQueue for RingQueue {
    fn push(&mut self, id: CoroutineId) {
        if self.overflow.is_empty() {
            match self.ring.push(id) {
                Ok(()) => return,
                Err(id) => {
                    kdebug!("ready ring full ({}), spilling", self.ring.capacity());
                    self.overflow.push_back(id);
                }
            }
        } else {
            self.overflow.push_back(id);
        }
        self.spills += 1;
    }

    fn pop(&mut self) -> Option<CoroutineId> {
        match self.ring.pop() {
            Some(id) => {
                if !self.overflow.is_empty() {
                    self.refill();
                }
                Some(id)
            }
            None => self.overflow.pop_front(),
        }
    }

    fn len(&self) -> usize {
        self.ring.len() + self.overflow.len()
    }

    fn name(&self) -> &'static str {
        "ring"
    }
}
