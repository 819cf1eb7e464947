//! TCP echo server on strand coroutines
//!
//! One coroutine accepts, one coroutine per connection echoes. All I/O is
//! nonblocking; coroutines park in the event loop on `EAGAIN`.
//!
//! Usage:
//!
//! - `echo [addr]` - serve forever (default `127.0.0.1:7878`)
//! - `echo [addr] selftest [clients]` - also spawn clients on the same
//!   scheduler, verify every reply, then shut down
//!
//! # Environment Variables
//!
//! - `STRAND_LOG_LEVEL=debug` - Log accepts and disconnects
//! - `STRAND_POLL_EVENTS` - Events fetched per poll

use std::cell::Cell;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::time::Instant;

use strand::{kdebug, kerror, kinfo, Handle, RuntimeConfig, RuntimeError, RuntimeResult, Scheduler};

const MESSAGES_PER_CLIENT: usize = 100;

fn serve_connection(h: &Handle, stream: std::net::TcpStream, peer: SocketAddr) {
    let fd = stream.as_raw_fd();
    let mut buf = [0u8; 4096];
    loop {
        match h.read(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = h.write_all(fd, &buf[..n]) {
                    kdebug!("{} write failed: {}", peer, e);
                    break;
                }
            }
            Err(e) => {
                kdebug!("{} read failed: {}", peer, e);
                break;
            }
        }
    }
    kdebug!("{} disconnected", peer);
}

fn run_client(h: &Handle, addr: SocketAddr, id: usize) -> Result<(), String> {
    let stream = h.connect(addr).map_err(|e| e.to_string())?;
    let fd = stream.as_raw_fd();
    let mut buf = [0u8; 64];
    for i in 0..MESSAGES_PER_CLIENT {
        let msg = format!("client {} message {}\n", id, i);
        h.write_all(fd, msg.as_bytes()).map_err(|e| e.to_string())?;

        let mut got = 0;
        while got < msg.len() {
            match h.read(fd, &mut buf[got..msg.len()]).map_err(|e| e.to_string())? {
                0 => return Err("server closed the connection".to_string()),
                n => got += n,
            }
        }
        if &buf[..got] != msg.as_bytes() {
            return Err(format!("corrupted echo for message {}", i));
        }
    }
    Ok(())
}

fn main() -> RuntimeResult<()> {
    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 7878)));
    let selftest = args.next().as_deref() == Some("selftest");
    let clients: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(50);

    let listener = TcpListener::bind(addr).map_err(|e| RuntimeError::from_io(&e))?;
    listener.set_nonblocking(true).map_err(|e| RuntimeError::from_io(&e))?;
    let addr = listener.local_addr().map_err(|e| RuntimeError::from_io(&e))?;
    let listen_fd = listener.as_raw_fd();

    let mut sched = Scheduler::new(RuntimeConfig::from_env())?;
    println!("=== strand Echo Server on {} ===", addr);

    let shutting_down = Rc::new(Cell::new(false));
    let stopping = Rc::clone(&shutting_down);
    sched.spawn(move |h| loop {
        if let Err(e) = h.wait_readable(listen_fd) {
            kerror!("waiting on listener: {}", e);
            break;
        }
        if stopping.get() {
            kinfo!("acceptor stopping");
            break;
        }
        match h.accept(&listener) {
            Ok((stream, peer)) => {
                kdebug!("accepted {}", peer);
                if let Err(e) = h.spawn(move |h| serve_connection(h, stream, peer)) {
                    kerror!("cannot spawn connection handler: {}", e);
                }
            }
            Err(e) => kerror!("accept failed: {}", e),
        }
    })?;

    if selftest {
        let done = sched.handle().channel::<bool>(clients);
        for id in 0..clients {
            let done = done.clone();
            sched.spawn(move |h| {
                let ok = match run_client(h, addr, id) {
                    Ok(()) => true,
                    Err(e) => {
                        kerror!("client {} failed: {}", id, e);
                        false
                    }
                };
                let _ = done.send(ok);
            })?;
        }

        let start = Instant::now();
        sched.spawn(move |h| {
            let passed = (0..clients).filter(|_| done.recv() == Some(true)).count();
            println!(
                "{}/{} clients echoed {} messages each in {:?}",
                passed,
                clients,
                MESSAGES_PER_CLIENT,
                start.elapsed()
            );
            shutting_down.set(true);
            // Wakes the acceptor parked on the listener
            if let Err(e) = h.deregister(listen_fd) {
                kerror!("deregister listener: {}", e);
            }
        })?;
    }

    sched.run()?;
    println!("stats: {:?}", sched.stats());
    Ok(())
}
