//! Readiness bridge between coroutines and the host multiplexer
//!
//! A coroutine that would block on a descriptor records a [`Registration`]
//! here and parks. `poll` asks the [`Poller`] for ready descriptors and
//! hands back the ids of the coroutines to wake; the scheduler does the
//! actual waking.
//!
//! Registrations are one-shot: once the waiter for a direction has been
//! reported, that direction's interest is dropped from the multiplexer.
//! The descriptor stays registered only while some coroutine still waits
//! on it.
//!
//! Sleeping coroutines live in a deadline heap owned by the loop, and the
//! poll timeout is clamped to the next deadline.

mod timer;
mod poll_fallback;

#[cfg(target_os = "linux")]
mod epoll_linux;

pub use poll_fallback::{PipeNotifier, PollPoller};
pub use timer::TimerHeap;

#[cfg(target_os = "linux")]
pub use epoll_linux::{EpollPoller, EventFdNotifier};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_core::{
    kwarn, ktrace, CoroutineId, Descriptor, Event, Interest, Notify, Poller, RuntimeError, RuntimeResult,
};

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", not(feature = "poll-fallback")))] {
        type DefaultPoller = EpollPoller;
    } else {
        type DefaultPoller = PollPoller;
    }
}

/// The best multiplexer available on this host
pub fn default_poller(max_events: usize) -> RuntimeResult<Box<dyn Poller>> {
    Ok(Box::new(DefaultPoller::new(max_events)?))
}

/// Convert a poll timeout to milliseconds, rounding up so short sleeps
/// never turn into busy polls. `None` means block indefinitely.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
    }
}

/// A coroutine waiting for readiness on a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub fd: Descriptor,
    pub interest: Interest,
    pub coroutine: CoroutineId,
}

#[derive(Debug, Default)]
struct Waiters {
    reader: Option<CoroutineId>,
    writer: Option<CoroutineId>,
}

impl Waiters {
    fn interest(&self) -> Interest {
        Interest { readable: self.reader.is_some(), writable: self.writer.is_some() }
    }
}

pub struct EventLoop {
    poller: Box<dyn Poller>,
    waiters: HashMap<Descriptor, Waiters>,
    timers: TimerHeap,
    events: Vec<Event>,
}

impl EventLoop {
    pub fn new(poller: Box<dyn Poller>) -> Self {
        Self {
            poller,
            waiters: HashMap::new(),
            timers: TimerHeap::new(),
            events: Vec::new(),
        }
    }

    pub fn with_default_poller(max_events: usize) -> RuntimeResult<Self> {
        Ok(Self::new(default_poller(max_events)?))
    }

    /// Record `reg` and add its interest to the multiplexer
    ///
    /// At most one coroutine may wait per descriptor and direction.
    pub fn register(&mut self, reg: Registration) -> RuntimeResult<()> {
        let w = self.waiters.entry(reg.fd).or_default();
        if (reg.interest.readable && w.reader.is_some()) || (reg.interest.writable && w.writer.is_some()) {
            return Err(RuntimeError::AlreadyRegistered { fd: reg.fd });
        }

        let before = w.interest();
        if reg.interest.readable {
            w.reader = Some(reg.coroutine);
        }
        if reg.interest.writable {
            w.writer = Some(reg.coroutine);
        }
        let after = w.interest();

        if let Err(e) = self.poller.register_interest(reg.fd, after) {
            // Roll back so a failed wait leaves no stale waiter behind
            let w = self.waiters.get_mut(&reg.fd);
            if let Some(w) = w {
                if !before.readable {
                    w.reader = None;
                }
                if !before.writable {
                    w.writer = None;
                }
                if w.interest().is_empty() {
                    self.waiters.remove(&reg.fd);
                }
            }
            return Err(e);
        }
        ktrace!("fd {} waiting {:?}", reg.fd, after);
        Ok(())
    }

    /// Forget `fd` entirely, returning the coroutines that were waiting on it
    pub fn deregister(&mut self, fd: Descriptor) -> RuntimeResult<Vec<CoroutineId>> {
        let mut orphans = Vec::new();
        if let Some(w) = self.waiters.remove(&fd) {
            orphans.extend(w.reader);
            if w.writer != w.reader {
                orphans.extend(w.writer);
            }
        }
        self.poller.deregister(fd)?;
        Ok(orphans)
    }

    /// Wake `id` once `deadline` has passed
    pub fn add_timer(&mut self, deadline: Instant, id: CoroutineId) {
        self.timers.insert(deadline, id);
    }

    /// Anything parked here: descriptors or timers
    #[inline]
    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty() || !self.timers.is_empty()
    }

    /// Number of descriptors with at least one waiter
    #[inline]
    pub fn io_waiters(&self) -> usize {
        self.waiters.len()
    }

    #[inline]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Time until the next timer fires
    pub fn next_timeout(&self) -> Option<Duration> {
        self.timers.timeout(Instant::now())
    }

    /// Collect coroutines made runnable by I/O readiness or expired timers
    ///
    /// `timeout` bounds the wait (`None` blocks until an event or a
    /// notification); it is shortened to the next timer deadline. Returns
    /// the number of ids appended to `ready`.
    pub fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<CoroutineId>) -> RuntimeResult<usize> {
        let start = ready.len();
        let timeout = match (timeout, self.next_timeout()) {
            (Some(t), Some(d)) => Some(t.min(d)),
            (None, d) => d,
            (t, None) => t,
        };

        let Self { poller, waiters, timers, events } = self;
        events.clear();
        poller.poll(events, timeout)?;

        for ev in events.iter() {
            let Some(w) = waiters.get_mut(&ev.fd) else {
                continue;
            };
            if ev.readable {
                ready.extend(w.reader.take());
            }
            if ev.writable {
                if let Some(id) = w.writer.take() {
                    // Same coroutine waiting both ways is woken once
                    if !ready[start..].contains(&id) {
                        ready.push(id);
                    }
                }
            }

            let remaining = w.interest();
            if remaining.is_empty() {
                waiters.remove(&ev.fd);
                if let Err(e) = poller.deregister(ev.fd) {
                    kwarn!("deregister fd {} failed: {}", ev.fd, e);
                }
            } else if let Err(e) = poller.register_interest(ev.fd, remaining) {
                kwarn!("re-arming fd {} failed: {}", ev.fd, e);
            }
        }

        timers.expire(Instant::now(), ready);
        Ok(ready.len() - start)
    }

    /// Handle other threads use to interrupt a blocking `poll`
    pub fn notifier(&self) -> Arc<dyn Notify> {
        self.poller.notifier()
    }

    /// Interrupt a blocking `poll` from this or another thread
    pub fn wake(&self) -> RuntimeResult<()> {
        self.poller.notifier().notify()
    }

    pub fn poller_name(&self) -> &'static str {
        self.poller.name()
    }
}
