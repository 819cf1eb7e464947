//! Channel and select behaviour across coroutines

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand_runtime::{RuntimeConfig, Scheduler};

fn scheduler() -> Scheduler {
    Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap()
}

#[test]
fn unbuffered_preserves_send_order() {
    let mut sched = scheduler();
    let ch = sched.handle().channel::<u32>(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let tx = ch.clone();
    sched
        .spawn(move |_| {
            for i in 1..=100 {
                tx.send(i).unwrap();
            }
        })
        .unwrap();
    let s = Rc::clone(&seen);
    sched
        .spawn(move |_| {
            for _ in 0..100 {
                s.borrow_mut().push(ch.recv().unwrap());
            }
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(*seen.borrow(), (1..=100).collect::<Vec<_>>());
}

#[test]
fn fifth_send_parks_on_capacity_four() {
    let mut sched = scheduler();
    let handle = sched.handle();
    let ch = handle.channel::<u32>(4);
    let sent = Rc::new(Cell::new(0));

    let (tx, s) = (ch.clone(), Rc::clone(&sent));
    sched
        .spawn(move |_| {
            for i in 0..5 {
                tx.send(i).unwrap();
                s.set(s.get() + 1);
            }
        })
        .unwrap();

    let (rx, s, h) = (ch.clone(), Rc::clone(&sent), handle.clone());
    sched
        .spawn(move |_| {
            // Sender ran first: four went straight into the buffer
            assert_eq!(s.get(), 4);
            assert_eq!(rx.len(), 4);
            assert_eq!(h.parked_len(), 1);

            assert_eq!(rx.recv(), Some(0));
            // Recv moved the parked value in and woke the sender
            assert_eq!(rx.len(), 4);
            assert_eq!(h.parked_len(), 0);
            assert_eq!(s.get(), 4);
            h.yield_now();
            assert_eq!(s.get(), 5);

            let rest: Vec<_> = (0..4).map(|_| rx.recv().unwrap()).collect();
            assert_eq!(rest, vec![1, 2, 3, 4]);
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(sent.get(), 5);
}

#[test]
fn close_wakes_every_parked_receiver() {
    const N: usize = 8;
    let mut sched = scheduler();
    let handle = sched.handle();
    let ch = handle.channel::<u32>(2);
    let results = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..N {
        let (rx, r) = (ch.clone(), Rc::clone(&results));
        sched.spawn(move |_| r.borrow_mut().push(rx.recv())).unwrap();
    }
    let (closer, h) = (ch.clone(), handle.clone());
    sched
        .spawn(move |_| {
            assert_eq!(h.parked_len(), N);
            closer.close();
            // Does not park: closed and empty
            assert_eq!(closer.recv(), None);
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(*results.borrow(), vec![None; N]);
    assert_eq!(handle.parked_len(), 0);
    assert_eq!(ch.recv(), None);
}

#[test]
fn buffered_values_survive_close() {
    let mut sched = scheduler();
    let ch = sched.handle().channel::<&str>(3);
    let drained = Rc::new(RefCell::new(Vec::new()));

    let tx = ch.clone();
    sched
        .spawn(move |_| {
            tx.send("a").unwrap();
            tx.send("b").unwrap();
            tx.close();
            assert_eq!(tx.send("c").unwrap_err().into_inner(), "c");
        })
        .unwrap();
    let d = Rc::clone(&drained);
    sched.spawn(move |_| d.borrow_mut().extend(&ch)).unwrap();

    sched.run().unwrap();
    assert_eq!(*drained.borrow(), vec!["a", "b"]);
}

#[test]
fn select_prefers_first_listed_ready_case() {
    let mut sched = scheduler();
    let handle = sched.handle();
    let picks = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..10 {
        let first = handle.channel::<u8>(1);
        let second = handle.channel::<u8>(1);
        first.try_send(1).unwrap();
        second.try_send(2).unwrap();

        let p = Rc::clone(&picks);
        sched
            .spawn(move |h| {
                let v = h.select().recv(&second, |v| v).recv(&first, |v| v).wait();
                p.borrow_mut().push(v);
            })
            .unwrap();
    }
    sched.run().unwrap();
    assert_eq!(*picks.borrow(), vec![Some(2); 10]);
}

#[test]
fn select_default_runs_without_parking() {
    let mut sched = scheduler();
    let handle = sched.handle();
    let empty = handle.channel::<u8>(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    sched
        .spawn(move |h| {
            let r = h.select().recv(&empty, |_| "recv").default(|| "default").wait();
            o.borrow_mut().push(r);
        })
        .unwrap();
    let o = Rc::clone(&order);
    sched.spawn(move |_| o.borrow_mut().push("second")).unwrap();

    sched.run().unwrap();
    assert_eq!(*order.borrow(), vec!["default", "second"]);
}

#[test]
fn select_over_many_producers() {
    let mut sched = scheduler();
    let handle = sched.handle();
    let evens = handle.channel::<u32>(0);
    let odds = handle.channel::<u32>(0);
    let total = Rc::new(Cell::new(0u32));

    for (ch, start) in [(evens.clone(), 0u32), (odds.clone(), 1)] {
        sched
            .spawn(move |_| {
                for i in (start..20).step_by(2) {
                    ch.send(i).unwrap();
                }
                ch.close();
            })
            .unwrap();
    }

    let t = Rc::clone(&total);
    sched
        .spawn(move |h| {
            let (mut evens_open, mut odds_open) = (true, true);
            while evens_open || odds_open {
                let mut sel = h.select();
                if evens_open {
                    sel = sel.recv(&evens, |v| (0, v));
                }
                if odds_open {
                    sel = sel.recv(&odds, |v| (1, v));
                }
                match sel.wait() {
                    (_, Some(v)) => t.set(t.get() + v),
                    (0, None) => evens_open = false,
                    (_, None) => odds_open = false,
                }
            }
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(total.get(), (0..20).sum());
}
