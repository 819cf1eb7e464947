//! Stress test - many coroutines, one shared channel
//!
//! N clients each do M request/reply round trips through a single
//! unbuffered request channel served by one echo coroutine, then the
//! checksum of every echoed value is compared against the expected sum.
//!
//! Usage: `stress [clients] [round_trips]` (defaults 1000 x 1000)

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use strand::{Channel, RuntimeConfig, RuntimeResult, Scheduler};

fn main() -> RuntimeResult<()> {
    println!("=== strand Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let clients: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1000);
    let round_trips: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1000);

    let config = RuntimeConfig::from_env().stack_size(32 * 1024);
    let mut sched = Scheduler::new(config)?;
    let handle = sched.handle();

    let requests: Channel<(u64, Channel<u64>)> = handle.channel(0);
    let checksum = Rc::new(Cell::new(0u64));
    let remaining = Rc::new(Cell::new(clients));

    let server = requests.clone();
    sched.spawn(move |_| {
        for (value, reply) in &server {
            if reply.send(value).is_err() {
                break;
            }
        }
    })?;

    println!("Spawning {} clients x {} round trips...", clients, round_trips);
    let start = Instant::now();
    for client in 0..clients {
        let (requests, checksum, remaining) = (requests.clone(), Rc::clone(&checksum), Rc::clone(&remaining));
        sched.spawn(move |h| {
            let reply = h.channel::<u64>(0);
            for i in 0..round_trips {
                let value = client * round_trips + i;
                if requests.send((value, reply.clone())).is_err() {
                    return;
                }
                if let Some(v) = reply.recv() {
                    checksum.set(checksum.get() + v);
                }
            }
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                requests.close();
            }
        })?;
    }
    let spawn_time = start.elapsed();

    sched.run()?;
    let total_time = start.elapsed();

    let n = clients * round_trips;
    let expected = if n == 0 { 0 } else { n * (n - 1) / 2 };
    let stats = sched.stats();

    println!("\n=== Results ===");
    println!("Round trips:      {}", n);
    println!("Checksum:         {} (expected {})", checksum.get(), expected);
    println!("Spawn time:       {:?}", spawn_time);
    println!("Total time:       {:?}", total_time);
    println!("Context switches: {}", stats.context_switches);
    if total_time.as_secs_f64() > 0.0 {
        println!("Round trips/sec:  {:.0}", n as f64 / total_time.as_secs_f64());
    }

    if checksum.get() != expected || handle.coroutine_count() != 0 {
        eprintln!("FAILED: lost values or stuck coroutines");
        std::process::exit(1);
    }
    println!("\nOK");
    Ok(())
}
