//! Unbounded FIFO ready queue

use std::collections::VecDeque;

use strand_core::CoroutineId;

use super::ReadyQueue;

#[derive(Debug, Default)]
pub struct FifoQueue {
    queue: VecDeque<CoroutineId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self { queue: VecDeque::with_capacity(64) }
    }
}

impl ReadyQueue for FifoQueue {
    #[inline]
    fn push(&mut self, id: CoroutineId) {
        self.queue.push_back(id);
    }

    #[inline]
    fn pop(&mut self) -> Option<CoroutineId> {
        self.queue.pop_front()
    }

    #[inline]
    fn len(&self) -> usize {
        self.queue.len()
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}
