//! Lock-free bounded ring buffers
//!
//! Two independent leaf structures:
//!
//! - [`SpscQueue`] - single producer / single consumer. Head and tail are
//!   each written by exactly one side; no CAS anywhere.
//! - [`MpmcQueue`] - bounded multi producer / multi consumer with a
//!   sequence counter per cell (Vyukov style).
//!
//! Neither queue blocks or retries internally. A full `push` hands the
//! value back, an empty `pop` returns `None`; backoff is the caller's
//! business. These are the only strand structures that may be shared
//! across OS threads.

mod spsc;
mod mpmc;

pub use spsc::{SpscQueue, Producer, Consumer};
pub use mpmc::MpmcQueue;

/// Round a requested capacity up to a power of two no smaller than 2
#[inline]
pub(crate) fn ring_size(capacity: usize) -> usize {
    capacity.max(2).next_power_of_two()
}
