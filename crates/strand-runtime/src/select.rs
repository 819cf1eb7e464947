//! Wait on several channel operations at once
//!
//! ```rust,ignore
//! let picked = h.select()
//!     .recv(&jobs, |job| format!("job {:?}", job))
//!     .send(&acks, 7, |res| format!("ack sent: {}", res.is_ok()))
//!     .default(|| "nothing ready".to_string())
//!     .wait();
//! ```
//!
//! `wait` first scans the cases in the order they were added and runs the
//! handler of the first one that can complete without parking. A closed
//! channel counts as ready. Ties go to the earliest case. If none is
//! ready and a default was given, the default runs; otherwise the
//! coroutine registers a waiter on every channel and parks until one of
//! them fires, then withdraws the rest. Exactly one handler runs.

use std::rc::Rc;

use strand_core::{CoroutineId, RuntimeError, SendError, TryRecvError, TrySendError};

use crate::channel::{Channel, Selection, Slot, SlotStatus, Waiter};
use crate::scheduler::Handle;

/// One arm of a select
trait Case<R> {
    /// Complete now if possible
    fn attempt(&mut self) -> Option<R>;

    fn register(&mut self, id: CoroutineId, selection: &Rc<Selection>, index: usize);

    fn withdraw(&mut self, selection: &Rc<Selection>);

    /// Run the handler after this case fired while parked
    fn finish(&mut self) -> R;
}

struct RecvCase<'a, T, F> {
    channel: &'a Channel<T>,
    handler: Option<F>,
    slot: Option<Rc<Slot<T>>>,
}

impl<T, F, R> Case<R> for RecvCase<'_, T, F>
where
    F: FnOnce(Option<T>) -> R,
{
    fn attempt(&mut self) -> Option<R> {
        let value = match self.channel.try_recv() {
            Ok(v) => Some(v),
            Err(TryRecvError::Closed) => None,
            Err(TryRecvError::Empty) => return None,
        };
        self.handler.take().map(|f| f(value))
    }

    fn register(&mut self, id: CoroutineId, selection: &Rc<Selection>, index: usize) {
        let slot = Slot::empty();
        self.channel.push_receiver(Waiter::for_select(id, Rc::clone(&slot), selection, index));
        self.slot = Some(slot);
    }

    fn withdraw(&mut self, selection: &Rc<Selection>) {
        self.channel.forget(selection);
    }

    fn finish(&mut self) -> R {
        let value = match &self.slot {
            Some(slot) if slot.status() == SlotStatus::Completed => slot.take(),
            _ => None,
        };
        match self.handler.take() {
            Some(f) => f(value),
            None => unreachable!("select case finished twice"),
        }
    }
}

struct SendCase<'a, T, F> {
    channel: &'a Channel<T>,
    value: Option<T>,
    handler: Option<F>,
    slot: Option<Rc<Slot<T>>>,
}

impl<T, F, R> Case<R> for SendCase<'_, T, F>
where
    F: FnOnce(Result<(), SendError<T>>) -> R,
{
    fn attempt(&mut self) -> Option<R> {
        let value = self.value.take()?;
        let result = match self.channel.try_send(value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(v)) => Err(SendError(v)),
            Err(TrySendError::Full(v)) => {
                self.value = Some(v);
                return None;
            }
        };
        self.handler.take().map(|f| f(result))
    }

    fn register(&mut self, id: CoroutineId, selection: &Rc<Selection>, index: usize) {
        let Some(value) = self.value.take() else {
            return;
        };
        let slot = Slot::holding(value);
        self.channel.push_sender(Waiter::for_select(id, Rc::clone(&slot), selection, index));
        self.slot = Some(slot);
    }

    fn withdraw(&mut self, selection: &Rc<Selection>) {
        self.channel.forget(selection);
    }

    fn finish(&mut self) -> R {
        let result = match &self.slot {
            Some(slot) if slot.status() == SlotStatus::Completed => Ok(()),
            Some(slot) => match slot.take() {
                Some(v) => Err(SendError(v)),
                None => unreachable!("closed select sender lost its value"),
            },
            None => unreachable!("select send case fired without registering"),
        };
        match self.handler.take() {
            Some(f) => f(result),
            None => unreachable!("select case finished twice"),
        }
    }
}

/// Builder for a select over channel operations; every handler returns `R`
#[must_use = "a select does nothing until `wait` is called"]
pub struct Select<'a, R> {
    handle: &'a Handle,
    cases: Vec<Box<dyn Case<R> + 'a>>,
    default: Option<Box<dyn FnOnce() -> R + 'a>>,
}

impl<'a, R> Select<'a, R> {
    pub fn new(handle: &'a Handle) -> Self {
        Select { handle, cases: Vec::new(), default: None }
    }

    /// Receive from `channel`; the handler gets `None` if it is closed
    pub fn recv<T, F>(mut self, channel: &'a Channel<T>, handler: F) -> Self
    where
        T: 'a,
        F: FnOnce(Option<T>) -> R + 'a,
    {
        self.cases.push(Box::new(RecvCase { channel, handler: Some(handler), slot: None }));
        self
    }

    /// Send `value` on `channel`; a closed channel hands it back in the error
    pub fn send<T, F>(mut self, channel: &'a Channel<T>, value: T, handler: F) -> Self
    where
        T: 'a,
        F: FnOnce(Result<(), SendError<T>>) -> R + 'a,
    {
        self.cases.push(Box::new(SendCase { channel, value: Some(value), handler: Some(handler), slot: None }));
        self
    }

    /// Run instead of parking when no case is ready
    pub fn default<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        self.default = Some(Box::new(handler));
        self
    }

    /// Run exactly one case, parking if none is ready and there is no default
    ///
    /// # Panics
    ///
    /// When it would park outside a coroutine. A select with no cases and
    /// no default parks forever.
    pub fn wait(mut self) -> R {
        for case in self.cases.iter_mut() {
            if let Some(r) = case.attempt() {
                return r;
            }
        }
        if let Some(default) = self.default.take() {
            return default();
        }

        let Some(id) = self.handle.current_id() else {
            panic!("{}", RuntimeError::NotInCoroutine("Select::wait"));
        };

        let selection = Selection::new();
        for (i, case) in self.cases.iter_mut().enumerate() {
            case.register(id, &selection, i);
        }

        let fired = loop {
            self.handle.park("Select::wait");
            if let Some(i) = selection.fired() {
                break i;
            }
        };

        for (i, case) in self.cases.iter_mut().enumerate() {
            if i != fired {
                case.withdraw(&selection);
            }
        }
        self.cases[fired].finish()
    }
}

impl Handle {
    /// Start building a select on this scheduler
    pub fn select<R>(&self) -> Select<'_, R> {
        Select::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::config::RuntimeConfig;
    use crate::scheduler::Scheduler;

    fn scheduler() -> Scheduler {
        Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap()
    }

    #[test]
    fn test_first_ready_case_wins() {
        let mut sched = scheduler();
        let handle = sched.handle();
        let a = handle.channel::<u32>(1);
        let b = handle.channel::<u32>(1);
        a.try_send(1).unwrap();
        b.try_send(2).unwrap();

        let out = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&out);
        sched
            .spawn(move |h| {
                let picked = h.select().recv(&a, |v| ("a", v)).recv(&b, |v| ("b", v)).wait();
                o.borrow_mut().push(picked);
                // b is untouched
                assert_eq!(b.len(), 1);
            })
            .unwrap();
        sched.run().unwrap();
        assert_eq!(*out.borrow(), vec![("a", Some(1))]);
    }

    #[test]
    fn test_default_when_nothing_ready() {
        let sched = scheduler();
        let handle = sched.handle();
        let a = handle.channel::<u32>(0);
        let b = handle.channel::<u32>(0);

        // Never parks, so it works from the root context too
        let r = handle.select().recv(&a, |_| 1).send(&b, 5, |_| 2).default(|| 3).wait();
        assert_eq!(r, 3);
        assert_eq!(b.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_closed_channel_is_ready() {
        let sched = scheduler();
        let handle = sched.handle();
        let a = handle.channel::<u32>(0);
        let b = handle.channel::<u32>(0);
        b.close();

        let r = handle
            .select()
            .recv(&a, |v| v.map(|_| "a"))
            .recv(&b, |v| Some(v.map_or("b closed", |_| "b")))
            .wait();
        assert_eq!(r, Some("b closed"));

        let back = handle.select().send(&b, 9, |res| res.unwrap_err().into_inner()).wait();
        assert_eq!(back, 9);
    }

    #[test]
    fn test_parked_select_fires_once_and_withdraws() {
        let mut sched = scheduler();
        let handle = sched.handle();
        let a = handle.channel::<u32>(0);
        let b = handle.channel::<u32>(0);
        let out = Rc::new(RefCell::new(Vec::new()));

        let (a2, b2, o) = (a.clone(), b.clone(), Rc::clone(&out));
        sched
            .spawn(move |h| {
                let got = h.select().recv(&a2, |v| ("a", v)).recv(&b2, |v| ("b", v)).wait();
                o.borrow_mut().push(got);
            })
            .unwrap();
        let (b3, o) = (b.clone(), Rc::clone(&out));
        sched
            .spawn(move |_| {
                b3.send(42).unwrap();
                o.borrow_mut().push(("sent", None));
            })
            .unwrap();
        sched.run().unwrap();

        assert_eq!(*out.borrow(), vec![("sent", None), ("b", Some(42))]);
        // Nothing left behind on the channel that did not fire
        assert_eq!(a.try_send(1), Err(TrySendError::Full(1)));
        assert_eq!(a.waiting(), (0, 0));
    }

    #[test]
    fn test_parked_select_send() {
        let mut sched = scheduler();
        let handle = sched.handle();
        let out = handle.channel::<&str>(0);
        let got = Rc::new(RefCell::new(None));

        let tx = out.clone();
        sched
            .spawn(move |h| {
                let ok = h.select().send(&tx, "payload", |res| res.is_ok()).wait();
                assert!(ok);
            })
            .unwrap();
        let g = Rc::clone(&got);
        sched.spawn(move |_| *g.borrow_mut() = out.recv()).unwrap();
        sched.run().unwrap();
        assert_eq!(*got.borrow(), Some("payload"));
    }

    #[test]
    fn test_close_wakes_parked_select() {
        let mut sched = scheduler();
        let handle = sched.handle();
        let a = handle.channel::<u32>(0);
        let got = Rc::new(RefCell::new(None));

        let (rx, g) = (a.clone(), Rc::clone(&got));
        sched
            .spawn(move |h| {
                *g.borrow_mut() = Some(h.select().recv(&rx, |v| v).wait());
            })
            .unwrap();
        sched.spawn(move |_| a.close()).unwrap();
        sched.run().unwrap();
        assert_eq!(*got.borrow(), Some(None));
    }
}
