//! Coroutine-blocking I/O on nonblocking descriptors
//!
//! Each call tries the syscall first. On `EAGAIN` it registers interest
//! with the event loop, parks the coroutine and retries once the
//! descriptor is reported ready. `EINTR` is retried in place. Other errors
//! come back as [`RuntimeError::Os`].
//!
//! Descriptors must already be in nonblocking mode; [`set_nonblocking`]
//! does that for raw fds, and the std socket types have their own
//! `set_nonblocking`.

use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use nix::errno::Errno;
use strand_core::{ktrace, Descriptor, RuntimeError, RuntimeResult};

use crate::scheduler::Handle;

fn os_error(errno: Errno) -> RuntimeError {
    RuntimeError::Os(errno as i32)
}

/// Put `fd` into nonblocking mode
pub fn set_nonblocking(fd: RawFd) -> RuntimeResult<()> {
    // Safety: fcntl does not touch memory
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(os_error(Errno::last()));
        }
        if flags & libc::O_NONBLOCK == 0 && libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(os_error(Errno::last()));
        }
    }
    Ok(())
}

/// Socket address as the kernel wants it
fn raw_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // Safety: all-zero is a valid sockaddr_storage
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            // Safety: sockaddr_storage is large and aligned enough for any sockaddr
            let sin = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr = libc::in6_addr { s6_addr: v6.ip().octets() };
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

impl Handle {
    /// Read into `buf`, parking until data is available
    ///
    /// Returns 0 at end of stream.
    pub fn read(&self, fd: Descriptor, buf: &mut [u8]) -> RuntimeResult<usize> {
        loop {
            // Safety: buf is valid for buf.len() bytes
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => self.wait_readable(fd)?,
                e => return Err(os_error(e)),
            }
        }
    }

    /// Write some of `buf`, parking while the descriptor is full
    pub fn write(&self, fd: Descriptor, buf: &[u8]) -> RuntimeResult<usize> {
        loop {
            // Safety: buf is valid for buf.len() bytes
            let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => self.wait_writable(fd)?,
                e => return Err(os_error(e)),
            }
        }
    }

    /// Write all of `buf`
    pub fn write_all(&self, fd: Descriptor, mut buf: &[u8]) -> RuntimeResult<()> {
        while !buf.is_empty() {
            match self.write(fd, buf)? {
                0 => return Err(os_error(Errno::EPIPE)),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Accept a connection on a nonblocking listener
    ///
    /// The returned stream is already nonblocking.
    pub fn accept(&self, listener: &TcpListener) -> RuntimeResult<(TcpStream, SocketAddr)> {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).map_err(|e| RuntimeError::from_io(&e))?;
                    ktrace!("accepted {}", peer);
                    return Ok((stream, peer));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait_readable(listener.as_raw_fd())?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RuntimeError::from_io(&e)),
            }
        }
    }

    /// Connect a nonblocking TCP socket to `addr`
    pub fn connect(&self, addr: SocketAddr) -> RuntimeResult<TcpStream> {
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        // Safety: plain syscall
        let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(os_error(Errno::last()));
        }
        // Safety: fd is a fresh socket we own; the stream closes it on error paths
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        stream.set_nonblocking(true).map_err(|e| RuntimeError::from_io(&e))?;

        let (storage, len) = raw_sockaddr(&addr);
        // Safety: storage holds a valid sockaddr of length len
        let rc = unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len) };
        if rc == 0 {
            return Ok(stream);
        }
        match Errno::last() {
            Errno::EINPROGRESS | Errno::EINTR => {}
            e => return Err(os_error(e)),
        }

        self.wait_writable(fd)?;
        match stream.take_error() {
            Ok(None) => Ok(stream),
            Ok(Some(e)) | Err(e) => Err(RuntimeError::from_io(&e)),
        }
    }
}
