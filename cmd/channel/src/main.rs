//! Channel example
//!
//! A producer/consumer pipeline over an unbuffered and a buffered channel,
//! fan-in through `select`, and a non-blocking `select` with a default.

use std::cell::RefCell;
use std::rc::Rc;

use strand::{kinfo, RuntimeConfig, RuntimeResult, Scheduler};

fn main() -> RuntimeResult<()> {
    println!("=== strand Channel Example ===\n");

    let mut sched = Scheduler::new(RuntimeConfig::from_env())?;
    let handle = sched.handle();

    // Stage 1 -> stage 2 unbuffered, stage 2 -> sink buffered
    let numbers = handle.channel::<u32>(0);
    let squares = handle.channel::<u32>(4);

    let tx = numbers.clone();
    sched.spawn(move |_| {
        for i in 1..=10 {
            tx.send(i).unwrap();
        }
        tx.close();
        kinfo!("producer done");
    })?;

    let (rx, tx) = (numbers.clone(), squares.clone());
    sched.spawn(move |_| {
        for n in &rx {
            tx.send(n * n).unwrap();
        }
        tx.close();
    })?;

    let sum = Rc::new(RefCell::new(0u32));
    let s = Rc::clone(&sum);
    let rx = squares.clone();
    sched.spawn(move |_| {
        for sq in &rx {
            print!("{} ", sq);
            *s.borrow_mut() += sq;
        }
        println!();
    })?;

    sched.run()?;
    println!("Sum of squares 1..=10: {}\n", sum.borrow());

    // Fan-in: two producers, one consumer selecting between them
    let fast = handle.channel::<String>(0);
    let slow = handle.channel::<String>(0);

    for (ch, name, delay_ms) in [(fast.clone(), "fast", 5u64), (slow.clone(), "slow", 12)] {
        sched.spawn(move |h| {
            for i in 0..3 {
                h.sleep(std::time::Duration::from_millis(delay_ms));
                ch.send(format!("{} #{}", name, i)).unwrap();
            }
            ch.close();
        })?;
    }

    sched.spawn(move |h| {
        let (mut fast_open, mut slow_open) = (true, true);
        while fast_open || slow_open {
            let mut sel = h.select();
            if fast_open {
                sel = sel.recv(&fast, |m| m.ok_or("fast"));
            }
            if slow_open {
                sel = sel.recv(&slow, |m| m.ok_or("slow"));
            }
            match sel.wait() {
                Ok(msg) => println!("  received {}", msg),
                Err("fast") => fast_open = false,
                Err(_) => slow_open = false,
            }
        }

        let idle = h.channel::<u8>(0);
        let r = h.select().recv(&idle, |_| "value").default(|| "nothing ready").wait();
        println!("  non-blocking select: {}", r);
    })?;

    sched.run()?;
    Ok(())
}
