//! epoll readiness multiplexer (Linux)
//!
//! Level-triggered. An eventfd registered under a reserved token lets
//! other threads interrupt `epoll_wait`; its counter coalesces any number
//! of notifications into one wakeup.

use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use strand_core::{kdebug, Descriptor, Event, Interest, Notify, Poller, RuntimeError, RuntimeResult};

use super::timeout_ms;

/// Token under which the eventfd is registered
const NOTIFY_TOKEN: u64 = u64::MAX;

fn last_os_error() -> RuntimeError {
    RuntimeError::Os(Errno::last() as i32)
}

/// Wakes an [`EpollPoller`] through an eventfd
pub struct EventFdNotifier {
    fd: RawFd,
}

impl EventFdNotifier {
    pub fn create() -> RuntimeResult<Self> {
        // Safety: plain syscall
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(last_os_error());
        }
        Ok(Self { fd })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Reset the counter after a wakeup
    fn drain(&self) {
        let mut buf = 0u64;
        // Safety: reading 8 bytes into a u64
        unsafe {
            libc::read(self.fd, &mut buf as *mut u64 as *mut libc::c_void, 8);
        }
    }
}

impl Notify for EventFdNotifier {
    fn notify(&self) -> RuntimeResult<()> {
        let one = 1u64;
        // Safety: writing 8 bytes from a u64
        let n = unsafe { libc::write(self.fd, &one as *const u64 as *const libc::c_void, 8) };
        if n < 0 {
            let errno = Errno::last();
            // Counter saturated: a wakeup is already pending
            if errno != Errno::EAGAIN {
                return Err(RuntimeError::Os(errno as i32));
            }
        }
        Ok(())
    }
}

impl Drop for EventFdNotifier {
    fn drop(&mut self) {
        // Safety: we own the descriptor
        unsafe { libc::close(self.fd) };
    }
}

pub struct EpollPoller {
    epfd: RawFd,
    notifier: Arc<EventFdNotifier>,
    registered: HashSet<Descriptor>,
    raw: Vec<libc::epoll_event>,
}

impl EpollPoller {
    /// Create an epoll instance reporting at most `max_events` per poll
    pub fn new(max_events: usize) -> RuntimeResult<Self> {
        // Safety: plain syscall
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(last_os_error());
        }

        let notifier = match EventFdNotifier::create() {
            Ok(n) => Arc::new(n),
            Err(e) => {
                unsafe { libc::close(epfd) };
                return Err(e);
            }
        };

        let mut ev = libc::epoll_event { events: libc::EPOLLIN as u32, u64: NOTIFY_TOKEN };
        // Safety: valid epfd and eventfd, ev outlives the call
        let rc = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, notifier.fd(), &mut ev) };
        if rc < 0 {
            let err = last_os_error();
            unsafe { libc::close(epfd) };
            return Err(err);
        }

        Ok(Self {
            epfd,
            notifier,
            registered: HashSet::new(),
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }
}

impl Poller for EpollPoller {
    fn register_interest(&mut self, fd: Descriptor, interest: Interest) -> RuntimeResult<()> {
        if interest.is_empty() {
            return self.deregister(fd);
        }

        let mut events = 0u32;
        if interest.readable {
            events |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        }
        if interest.writable {
            events |= libc::EPOLLOUT as u32;
        }
        let mut ev = libc::epoll_event { events, u64: fd as u64 };

        let op = if self.registered.contains(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        // Safety: ev outlives the call
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(last_os_error());
        }
        self.registered.insert(fd);
        Ok(())
    }

    fn deregister(&mut self, fd: Descriptor) -> RuntimeResult<()> {
        if !self.registered.remove(&fd) {
            return Ok(());
        }
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        // Safety: ev is ignored by DEL but must be non-null on old kernels
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev) };
        if rc < 0 {
            let errno = Errno::last();
            // Closing a descriptor removes it from the epoll set already
            if errno != Errno::EBADF && errno != Errno::ENOENT {
                return Err(RuntimeError::Os(errno as i32));
            }
            kdebug!("fd {} already gone from epoll set", fd);
        }
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> RuntimeResult<usize> {
        // Safety: raw has raw.len() initialised slots
        let n = unsafe {
            libc::epoll_wait(self.epfd, self.raw.as_mut_ptr(), self.raw.len() as i32, timeout_ms(timeout))
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(0);
            }
            return Err(RuntimeError::Os(errno as i32));
        }

        let mut reported = 0;
        for ev in &self.raw[..n as usize] {
            let token = ev.u64;
            let bits = ev.events;
            if token == NOTIFY_TOKEN {
                self.notifier.drain();
                continue;
            }
            let failed = bits & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
            events.push(Event {
                fd: token as Descriptor,
                readable: failed || bits & (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 != 0,
                writable: failed || bits & libc::EPOLLOUT as u32 != 0,
            });
            reported += 1;
        }
        Ok(reported)
    }

    fn notifier(&self) -> Arc<dyn Notify> {
        self.notifier.clone()
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        // Safety: we own the epoll descriptor
        unsafe { libc::close(self.epfd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_readiness_reported() {
        let mut poller = EpollPoller::new(16).unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        poller.register_interest(fd, Interest::READABLE).unwrap();
        let mut events = Vec::new();
        assert_eq!(poller.poll(&mut events, Some(Duration::ZERO)).unwrap(), 0);

        b.write_all(b"x").unwrap();
        assert_eq!(poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap(), 1);
        assert_eq!(events[0].fd, fd);
        assert!(events[0].readable);

        poller.deregister(fd).unwrap();
        events.clear();
        assert_eq!(poller.poll(&mut events, Some(Duration::ZERO)).unwrap(), 0);
    }

    #[test]
    fn test_notify_interrupts_wait() {
        let mut poller = EpollPoller::new(4).unwrap();
        let notifier = poller.notifier();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            notifier.notify().unwrap();
            notifier.notify().unwrap();
        });

        let mut events = Vec::new();
        // Returns on the notification, well before the 10s timeout
        let start = std::time::Instant::now();
        assert_eq!(poller.poll(&mut events, Some(Duration::from_secs(10))).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();

        // Both notifications were coalesced and drained
        assert_eq!(poller.poll(&mut events, Some(Duration::ZERO)).unwrap(), 0);
        assert!(events.is_empty());
    }
}
