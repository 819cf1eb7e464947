//! Basic strand example
//!
//! Spawns a few coroutines that interleave through `yield_now`, one that
//! sleeps, and drives a standalone coroutine by hand.
//!
//! # Environment Variables
//!
//! - `STRAND_FLUSH_EPRINT=1` - Flush log output immediately (useful for crash debugging)
//! - `STRAND_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use strand::{kdebug, kinfo, Coroutine, CoroutineState, RuntimeConfig, RuntimeResult, Scheduler};

// STRAND_LOG_LEVEL=debug STRAND_FLUSH_EPRINT=1 cargo run -p strand-basic
fn main() -> RuntimeResult<()> {
    println!("=== strand Basic Example ===\n");

    let config = RuntimeConfig::from_env();
    config.print();
    let mut sched = Scheduler::new(config)?;

    let completed = Rc::new(Cell::new(0));

    kinfo!("Spawning coroutines...");
    for i in 1..=3 {
        let c = Rc::clone(&completed);
        let id = sched.spawn(move |h| {
            kdebug!("[worker {}] started", i);
            for j in 0..3 {
                println!("  worker {} step {}", i, j);
                h.yield_now();
            }
            c.set(c.get() + 1);
        })?;
        println!("Spawned worker {} ({})", i, id);
    }

    let c = Rc::clone(&completed);
    sched.spawn(move |h| {
        let start = Instant::now();
        h.sleep(Duration::from_millis(50));
        println!("  sleeper woke after {:?}", start.elapsed());
        c.set(c.get() + 1);
    })?;

    let start = Instant::now();
    sched.run()?;
    let stats = sched.stats();

    println!("\n=== Scheduler ===");
    println!("Completed:        {}/4", completed.get());
    println!("Context switches: {}", stats.context_switches);
    println!("Polls:            {}", stats.polls);
    println!("Elapsed:          {:?}", start.elapsed());

    // A coroutine outside any scheduler: resume until it finishes
    println!("\n=== Standalone coroutine ===");
    let fib = Coroutine::with_stack_size(64 * 1024, |s| {
        let (mut a, mut b) = (0u64, 1u64);
        for _ in 0..10 {
            print!("{} ", a);
            (a, b) = (b, a + b);
            s.suspend();
        }
        println!();
    })?;
    let mut resumes = 0;
    while fib.resume()? != CoroutineState::Terminated {
        resumes += 1;
    }
    println!("{} resumed {} times", fib.id(), resumes + 1);

    Ok(())
}
