//! Portable `poll(2)` multiplexer
//!
//! Used on unix hosts without epoll, or on Linux with the `poll-fallback`
//! feature. The pollfd array is rebuilt on every call, which is fine for
//! the descriptor counts a single cooperative scheduler deals with.
//! Semantics match the epoll backend: level-triggered, with errors and
//! hang-ups reported as both readable and writable.

use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use strand_core::{Descriptor, Event, Interest, Notify, Poller, RuntimeError, RuntimeResult};

use super::timeout_ms;

fn last_os_error() -> RuntimeError {
    RuntimeError::Os(Errno::last() as i32)
}

fn set_flags(fd: RawFd) -> RuntimeResult<()> {
    // Safety: fcntl on a descriptor we just created
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
            return Err(last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(last_os_error());
        }
    }
    Ok(())
}

/// Self-pipe used to interrupt `poll`
pub struct PipeNotifier {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl PipeNotifier {
    pub fn create() -> RuntimeResult<Self> {
        let mut fds = [0 as RawFd; 2];
        // Safety: fds has room for two descriptors
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(last_os_error());
        }
        let notifier = Self { read_fd: fds[0], write_fd: fds[1] };
        set_flags(notifier.read_fd)?;
        set_flags(notifier.write_fd)?;
        Ok(notifier)
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // Safety: reading into a local buffer
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Notify for PipeNotifier {
    fn notify(&self) -> RuntimeResult<()> {
        let byte = 1u8;
        // Safety: writing one byte from a local
        let n = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1) };
        if n < 0 {
            let errno = Errno::last();
            // Pipe full: the poller has plenty of wakeups pending
            if errno != Errno::EAGAIN {
                return Err(RuntimeError::Os(errno as i32));
            }
        }
        Ok(())
    }
}

impl Drop for PipeNotifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

pub struct PollPoller {
    interests: BTreeMap<Descriptor, Interest>,
    notifier: Arc<PipeNotifier>,
    fds: Vec<libc::pollfd>,
    max_events: usize,
}

impl PollPoller {
    pub fn new(max_events: usize) -> RuntimeResult<Self> {
        Ok(Self {
            interests: BTreeMap::new(),
            notifier: Arc::new(PipeNotifier::create()?),
            fds: Vec::new(),
            max_events: max_events.max(1),
        })
    }
}

impl Poller for PollPoller {
    fn register_interest(&mut self, fd: Descriptor, interest: Interest) -> RuntimeResult<()> {
        if interest.is_empty() {
            self.interests.remove(&fd);
        } else {
            self.interests.insert(fd, interest);
        }
        Ok(())
    }

    fn deregister(&mut self, fd: Descriptor) -> RuntimeResult<()> {
        self.interests.remove(&fd);
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> RuntimeResult<usize> {
        self.fds.clear();
        self.fds.push(libc::pollfd { fd: self.notifier.read_fd, events: libc::POLLIN, revents: 0 });
        for (&fd, interest) in &self.interests {
            let mut mask = 0;
            if interest.readable {
                mask |= libc::POLLIN;
            }
            if interest.writable {
                mask |= libc::POLLOUT;
            }
            self.fds.push(libc::pollfd { fd, events: mask, revents: 0 });
        }

        // Safety: fds holds fds.len() initialised entries
        let n = unsafe {
            libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms(timeout))
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(0);
            }
            return Err(RuntimeError::Os(errno as i32));
        }

        if self.fds[0].revents != 0 {
            self.notifier.drain();
        }

        let mut reported = 0;
        for pfd in &self.fds[1..] {
            if reported == self.max_events {
                break;
            }
            let r = pfd.revents;
            if r == 0 {
                continue;
            }
            let failed = r & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
            events.push(Event {
                fd: pfd.fd,
                readable: failed || r & libc::POLLIN != 0,
                writable: failed || r & libc::POLLOUT != 0,
            });
            reported += 1;
        }
        Ok(reported)
    }

    fn notifier(&self) -> Arc<dyn Notify> {
        self.notifier.clone()
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_readable_and_writable() {
        let mut poller = PollPoller::new(8).unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let mut events = Vec::new();

        poller.register_interest(fd, Interest::READABLE).unwrap();
        assert_eq!(poller.poll(&mut events, Some(Duration::ZERO)).unwrap(), 0);

        b.write_all(b"ping").unwrap();
        assert_eq!(poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap(), 1);
        assert!(events[0].readable);

        events.clear();
        poller.register_interest(fd, Interest::WRITABLE).unwrap();
        assert_eq!(poller.poll(&mut events, Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(events[0], Event { fd, readable: false, writable: true });
    }

    #[test]
    fn test_hangup_wakes_reader() {
        let mut poller = PollPoller::new(8).unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        poller.register_interest(a.as_raw_fd(), Interest::READABLE).unwrap();
        drop(b);

        let mut events = Vec::new();
        assert_eq!(poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap(), 1);
        assert!(events[0].readable);
    }

    #[test]
    fn test_notify() {
        let mut poller = PollPoller::new(8).unwrap();
        poller.notifier().notify().unwrap();
        let mut events = Vec::new();
        assert_eq!(poller.poll(&mut events, Some(Duration::from_secs(5))).unwrap(), 0);
        // Drained: a zero-timeout poll finds nothing pending
        assert_eq!(poller.poll(&mut events, Some(Duration::ZERO)).unwrap(), 0);
    }
}
