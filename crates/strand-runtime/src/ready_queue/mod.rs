//! Ready queue strategies
//!
//! The scheduler keeps runnable coroutine ids in a `ReadyQueue`. Every
//! implementation is strictly FIFO: a coroutine made ready earlier runs
//! earlier.
//!
//! # Implementations
//! - `FifoQueue` - unbounded `VecDeque`
//! - `RingQueue` - fixed SPSC ring with an overflow list for bursts

mod fifo;
mod ring;

pub use fifo::FifoQueue;
pub use ring::RingQueue;

use strand_core::CoroutineId;

use crate::config::{ReadyQueueKind, RuntimeConfig};

/// Runnable coroutines owned by one scheduler thread
pub trait ReadyQueue {
    fn push(&mut self, id: CoroutineId);

    fn pop(&mut self) -> Option<CoroutineId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str;
}

/// Build the queue selected by `config`
pub fn new_ready_queue(config: &RuntimeConfig) -> Box<dyn ReadyQueue> {
    match config.ready_queue {
        ReadyQueueKind::Fifo => Box::new(FifoQueue::new()),
        ReadyQueueKind::Ring => Box::new(RingQueue::new(config.ready_queue_capacity)),
    }
}
