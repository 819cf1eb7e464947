//! Host collaborator traits
//!
//! The runtime never talks to epoll or poll directly; it goes through a
//! [`Poller`]. That keeps the scheduler testable and lets each platform
//! supply the multiplexer it has.

use core::ops::BitOr;
use core::time::Duration;
use std::sync::Arc;

use crate::error::RuntimeResult;

/// OS-level handle for an I/O object (a Unix file descriptor)
pub type Descriptor = i32;

/// Readiness a coroutine wants to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };

    #[inline]
    pub const fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    /// Interest left after removing `other`
    #[inline]
    pub const fn without(self, other: Interest) -> Interest {
        Interest {
            readable: self.readable && !other.readable,
            writable: self.writable && !other.writable,
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
        }
    }
}

/// One readiness report from the multiplexer
///
/// Error and hang-up conditions are reported as both readable and writable
/// so the woken coroutine retries its call and observes the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: Descriptor,
    pub readable: bool,
    pub writable: bool,
}

/// Wakes a blocked [`Poller::poll`] from any thread
///
/// `notify()` never blocks, and several calls before the poller drains
/// them coalesce into a single wakeup.
pub trait Notify: Send + Sync {
    fn notify(&self) -> RuntimeResult<()>;
}

/// Readiness multiplexer driven by the scheduler thread
///
/// Registrations are level-triggered; the event loop removes interest
/// itself once the waiting coroutine has been woken.
pub trait Poller {
    /// Set the full interest for `fd`, adding or modifying the registration
    fn register_interest(&mut self, fd: Descriptor, interest: Interest) -> RuntimeResult<()>;

    /// Stop watching `fd`. Unknown descriptors are ignored.
    fn deregister(&mut self, fd: Descriptor) -> RuntimeResult<()>;

    /// Wait for readiness
    ///
    /// `timeout` of `None` blocks until an event or a notification;
    /// `Some(Duration::ZERO)` only collects what is already pending.
    /// Interrupted waits return `Ok(0)`. Notifier wakeups are drained
    /// internally and never appear in `events`.
    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> RuntimeResult<usize>;

    /// Handle that other threads use to interrupt `poll`
    fn notifier(&self) -> Arc<dyn Notify>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
