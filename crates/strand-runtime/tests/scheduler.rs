//! Scheduler-level scenarios: stress, cross-thread injection, failure paths

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use strand_core::RuntimeError;
use strand_runtime::{Channel, ReadyQueueKind, RuntimeConfig, Scheduler, StackAllocatorKind};

const CLIENTS: usize = 1000;
const ROUND_TRIPS: u64 = 1000;

#[test]
fn stress_round_trips_through_shared_channel() {
    let config = RuntimeConfig::new().stack_size(32 * 1024).stack_cache(CLIENTS);
    let mut sched = Scheduler::new(config).unwrap();
    let handle = sched.handle();

    // Every request carries the channel its reply goes back on
    let requests: Channel<(u64, Channel<u64>)> = handle.channel(0);
    let checksum = Rc::new(Cell::new(0u64));
    let remaining = Rc::new(Cell::new(CLIENTS));

    let server = requests.clone();
    sched
        .spawn(move |_| {
            for (value, reply) in &server {
                reply.send(value).unwrap();
            }
        })
        .unwrap();

    for client in 0..CLIENTS as u64 {
        let (requests, checksum, remaining) = (requests.clone(), Rc::clone(&checksum), Rc::clone(&remaining));
        sched
            .spawn(move |h| {
                let reply = h.channel::<u64>(0);
                for i in 0..ROUND_TRIPS {
                    let value = client * ROUND_TRIPS + i;
                    requests.send((value, reply.clone())).unwrap();
                    let echoed = reply.recv().unwrap();
                    assert_eq!(echoed, value);
                    checksum.set(checksum.get() + echoed);
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    requests.close();
                }
            })
            .unwrap();
    }

    sched.run().unwrap();

    let n = CLIENTS as u64 * ROUND_TRIPS;
    assert_eq!(checksum.get(), n * (n - 1) / 2);
    assert_eq!(handle.coroutine_count(), 0);
    assert_eq!(handle.parked_len(), 0);

    let stats = sched.stats();
    assert_eq!(stats.spawned, CLIENTS as u64 + 1);
    assert_eq!(stats.completed, stats.spawned);
}

#[test]
fn ring_ready_queue_runs_same_workload() {
    let config = RuntimeConfig::new()
        .stack_size(32 * 1024)
        .ready_queue(ReadyQueueKind::Ring)
        .ready_queue_capacity(16);
    let mut sched = Scheduler::new(config).unwrap();
    let ch = sched.handle().channel::<u32>(8);
    let sum = Rc::new(Cell::new(0u32));

    for i in 0..100 {
        let tx = ch.clone();
        sched
            .spawn(move |h| {
                h.yield_now();
                tx.send(i).unwrap();
            })
            .unwrap();
    }
    let s = Rc::clone(&sum);
    sched
        .spawn(move |_| {
            for _ in 0..100 {
                s.set(s.get() + ch.recv().unwrap());
            }
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(sum.get(), (0..100).sum());
}

#[test]
fn remote_spawns_from_other_threads() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let runner = thread::spawn(move || {
        let mut sched = Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap();
        tx.send(sched.remote()).unwrap();
        sched.run_forever().unwrap();
        sched.stats()
    });

    let remote = rx.recv().unwrap();
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let (remote, hits) = (remote.clone(), Arc::clone(&hits));
            thread::spawn(move || {
                for _ in 0..25 {
                    let hits = Arc::clone(&hits);
                    remote
                        .spawn(move |h| {
                            h.yield_now();
                            hits.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while hits.load(Ordering::SeqCst) < 100 {
        assert!(Instant::now() < deadline, "injected work never ran");
        thread::sleep(Duration::from_millis(1));
    }
    remote.stop().unwrap();

    let stats = runner.join().unwrap();
    assert_eq!(stats.injected, 100);
    assert_eq!(stats.completed, 100);

    // The scheduler is gone
    assert!(remote.is_closed());
    assert_eq!(remote.spawn(|_| {}), Err(RuntimeError::Stopped));
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let mut sched = Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    for ms in [40u64, 10, 30, 20] {
        let o = Rc::clone(&order);
        sched
            .spawn(move |h| {
                h.sleep(Duration::from_millis(ms));
                o.borrow_mut().push(ms);
            })
            .unwrap();
    }
    let start = Instant::now();
    sched.run().unwrap();

    assert_eq!(*order.borrow(), vec![10, 20, 30, 40]);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn panic_surfaces_from_run_and_scheduler_stays_usable() {
    let mut sched = Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap();
    let after = Rc::new(Cell::new(false));

    sched
        .spawn(|h| {
            h.yield_now();
            panic!("boom");
        })
        .unwrap();
    let err = panic::catch_unwind(AssertUnwindSafe(|| sched.run())).unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"boom"));

    let a = Rc::clone(&after);
    sched.spawn(move |_| a.set(true)).unwrap();
    sched.run().unwrap();
    assert!(after.get());
}

#[test]
fn idle_with_unreachable_parked_coroutine() {
    let mut sched = Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap();
    let handle = sched.handle();
    let ch = handle.channel::<u8>(0);

    // Nobody ever sends: run returns instead of hanging
    sched
        .spawn(move |_| {
            ch.recv();
        })
        .unwrap();
    sched.run().unwrap();
    assert_eq!(handle.parked_len(), 1);
    assert_eq!(handle.coroutine_count(), 1);
}

#[test]
fn heap_stacks() {
    let config = RuntimeConfig::new()
        .stack_size(64 * 1024)
        .stack_allocator(StackAllocatorKind::Heap);
    let mut sched = Scheduler::new(config).unwrap();
    let total = Rc::new(Cell::new(0));

    fn recurse(n: u32) -> u32 {
        let frame = std::hint::black_box([n; 32]);
        if n == 0 {
            return 0;
        }
        frame[31] + recurse(n - 1)
    }

    let t = Rc::clone(&total);
    sched
        .spawn(move |h| {
            h.yield_now();
            t.set(recurse(100));
        })
        .unwrap();
    sched.run().unwrap();
    assert_eq!(total.get(), 5050);
}
