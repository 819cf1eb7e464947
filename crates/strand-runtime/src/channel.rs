//! Typed channels between coroutines of one scheduler
//!
//! `capacity == 0` gives a rendezvous channel: `send` parks until a
//! receiver takes the value. A positive capacity gives a bounded FIFO
//! buffer: `send` parks only while the buffer is full, `recv` only while
//! it is empty.
//!
//! Parked senders and receivers wait in FIFO order. Waking one hands it
//! its result through a shared [`Slot`] and moves it to the tail of the
//! scheduler's ready queue, so there are no spurious wakeups.
//!
//! Closing is idempotent. After close, `send` fails returning the value,
//! `recv` drains what is buffered and then yields `None`, and every
//! parked sender and receiver is woken with that outcome.
//!
//! Channels are `!Send`: they belong to the scheduler thread that made
//! them. Cross-thread traffic goes through [`Remote`](crate::Remote).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use strand_core::{CoroutineId, RuntimeError, SendError, TryRecvError, TrySendError};

use crate::scheduler::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    Waiting,
    Completed,
    Closed,
}

/// Where a parked operation receives its outcome
pub(crate) struct Slot<T> {
    value: RefCell<Option<T>>,
    status: Cell<SlotStatus>,
}

impl<T> Slot<T> {
    pub(crate) fn empty() -> Rc<Self> {
        Rc::new(Slot { value: RefCell::new(None), status: Cell::new(SlotStatus::Waiting) })
    }

    pub(crate) fn holding(value: T) -> Rc<Self> {
        Rc::new(Slot { value: RefCell::new(Some(value)), status: Cell::new(SlotStatus::Waiting) })
    }

    #[inline]
    pub(crate) fn status(&self) -> SlotStatus {
        self.status.get()
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.value.borrow_mut().take()
    }

    fn complete_with(&self, value: Option<T>) {
        if value.is_some() {
            *self.value.borrow_mut() = value;
        }
        self.status.set(SlotStatus::Completed);
    }
}

/// Shared by all the waiters one `select` registers; the first channel to
/// claim it decides which case fired
#[derive(Debug, Default)]
pub(crate) struct Selection {
    fired: Cell<Option<usize>>,
}

impl Selection {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Selection::default())
    }

    #[inline]
    pub(crate) fn fired(&self) -> Option<usize> {
        self.fired.get()
    }

    fn try_fire(&self, case: usize) -> bool {
        if self.fired.get().is_some() {
            return false;
        }
        self.fired.set(Some(case));
        true
    }
}

pub(crate) struct Waiter<T> {
    coroutine: CoroutineId,
    slot: Rc<Slot<T>>,
    selection: Option<(Rc<Selection>, usize)>,
}

impl<T> Waiter<T> {
    pub(crate) fn new(coroutine: CoroutineId, slot: Rc<Slot<T>>) -> Self {
        Waiter { coroutine, slot, selection: None }
    }

    pub(crate) fn for_select(coroutine: CoroutineId, slot: Rc<Slot<T>>, selection: &Rc<Selection>, case: usize) -> Self {
        Waiter { coroutine, slot, selection: Some((Rc::clone(selection), case)) }
    }

    /// False for a select waiter whose select already fired elsewhere
    fn claim(&self) -> bool {
        match &self.selection {
            None => true,
            Some((selection, case)) => selection.try_fire(*case),
        }
    }

    fn belongs_to(&self, selection: &Rc<Selection>) -> bool {
        matches!(&self.selection, Some((s, _)) if Rc::ptr_eq(s, selection))
    }
}

struct State<T> {
    buffer: VecDeque<T>,
    senders: VecDeque<Waiter<T>>,
    receivers: VecDeque<Waiter<T>>,
    closed: bool,
}

impl<T> State<T> {
    /// Pop the oldest waiter that can still accept an outcome
    fn claim_next(queue: &mut VecDeque<Waiter<T>>) -> Option<Waiter<T>> {
        while let Some(w) = queue.pop_front() {
            if w.claim() {
                return Some(w);
            }
        }
        None
    }
}

struct Shared<T> {
    handle: Handle,
    capacity: usize,
    state: RefCell<State<T>>,
}

/// Bounded or rendezvous channel
///
/// Cloning yields another reference to the same channel; any clone can
/// send, receive or close.
pub struct Channel<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel { shared: Rc::clone(&self.shared) }
    }
}

impl<T> Channel<T> {
    /// New channel on `handle`'s scheduler; `capacity == 0` is unbuffered
    ///
    /// The buffer grows as values arrive, so `capacity` is only a bound.
    pub fn new(handle: &Handle, capacity: usize) -> Self {
        Channel {
            shared: Rc::new(Shared {
                handle: handle.clone(),
                capacity,
                state: RefCell::new(State {
                    buffer: VecDeque::new(),
                    senders: VecDeque::new(),
                    receivers: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Values currently buffered
    pub fn len(&self) -> usize {
        self.shared.state.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.borrow().closed
    }

    /// Send without parking
    ///
    /// On an unbuffered channel this only succeeds when a receiver is
    /// already parked.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let woken = {
            let mut st = self.shared.state.borrow_mut();
            if st.closed {
                return Err(TrySendError::Closed(value));
            }
            if let Some(w) = State::claim_next(&mut st.receivers) {
                w.slot.complete_with(Some(value));
                w.coroutine
            } else if st.buffer.len() < self.shared.capacity {
                st.buffer.push_back(value);
                return Ok(());
            } else {
                return Err(TrySendError::Full(value));
            }
        };
        self.shared.handle.wake(woken);
        Ok(())
    }

    /// Receive without parking
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let (value, woken) = {
            let mut st = self.shared.state.borrow_mut();
            if let Some(value) = st.buffer.pop_front() {
                // A slot opened up: move the oldest parked sender's value in
                let woken = State::claim_next(&mut st.senders).map(|w| {
                    if let Some(v) = w.slot.take() {
                        st.buffer.push_back(v);
                    }
                    w.slot.complete_with(None);
                    w.coroutine
                });
                (value, woken)
            } else if let Some(w) = State::claim_next(&mut st.senders) {
                let Some(value) = w.slot.take() else {
                    unreachable!("parked sender without a value");
                };
                w.slot.complete_with(None);
                (value, Some(w.coroutine))
            } else if st.closed {
                return Err(TryRecvError::Closed);
            } else {
                return Err(TryRecvError::Empty);
            }
        };
        if let Some(id) = woken {
            self.shared.handle.wake(id);
        }
        Ok(value)
    }

    /// Send, parking the calling coroutine while the channel cannot take
    /// the value
    ///
    /// # Panics
    ///
    /// When it would park outside a coroutine.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let value = match self.try_send(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(v)) => return Err(SendError(v)),
            Err(TrySendError::Full(v)) => v,
        };

        let id = self.current("Channel::send");
        let slot = Slot::holding(value);
        self.shared.state.borrow_mut().senders.push_back(Waiter::new(id, Rc::clone(&slot)));

        match self.wait(&slot, "Channel::send") {
            SlotStatus::Completed => Ok(()),
            _ => match slot.take() {
                Some(v) => Err(SendError(v)),
                None => unreachable!("closed sender lost its value"),
            },
        }
    }

    /// Receive, parking while the channel is empty
    ///
    /// Returns `None` once the channel is closed and drained.
    ///
    /// # Panics
    ///
    /// When it would park outside a coroutine.
    pub fn recv(&self) -> Option<T> {
        match self.try_recv() {
            Ok(v) => return Some(v),
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {}
        }

        let id = self.current("Channel::recv");
        let slot = Slot::empty();
        self.shared.state.borrow_mut().receivers.push_back(Waiter::new(id, Rc::clone(&slot)));

        match self.wait(&slot, "Channel::recv") {
            SlotStatus::Completed => slot.take(),
            _ => None,
        }
    }

    /// Close the channel and wake everyone parked on it
    pub fn close(&self) {
        let (senders, receivers) = {
            let mut st = self.shared.state.borrow_mut();
            if st.closed {
                return;
            }
            st.closed = true;
            (std::mem::take(&mut st.senders), std::mem::take(&mut st.receivers))
        };

        for w in senders.into_iter().chain(receivers) {
            if w.claim() {
                w.slot.status.set(SlotStatus::Closed);
                self.shared.handle.wake(w.coroutine);
            }
        }
    }

    /// Iterate with `recv` until the channel is closed and drained
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { channel: self }
    }

    fn current(&self, op: &'static str) -> CoroutineId {
        match self.shared.handle.current_id() {
            Some(id) => id,
            None => panic!("{}", RuntimeError::NotInCoroutine(op)),
        }
    }

    fn wait(&self, slot: &Slot<T>, op: &'static str) -> SlotStatus {
        loop {
            self.shared.handle.park(op);
            match slot.status() {
                SlotStatus::Waiting => continue,
                done => return done,
            }
        }
    }

    /// Queue a select receive case
    pub(crate) fn push_receiver(&self, waiter: Waiter<T>) {
        self.shared.state.borrow_mut().receivers.push_back(waiter);
    }

    /// Queue a select send case; the slot holds the value
    pub(crate) fn push_sender(&self, waiter: Waiter<T>) {
        self.shared.state.borrow_mut().senders.push_back(waiter);
    }

    /// Drop every waiter `selection` left here
    pub(crate) fn forget(&self, selection: &Rc<Selection>) {
        let mut st = self.shared.state.borrow_mut();
        st.senders.retain(|w| !w.belongs_to(selection));
        st.receivers.retain(|w| !w.belongs_to(selection));
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self) -> (usize, usize) {
        let st = self.shared.state.borrow();
        (st.senders.len(), st.receivers.len())
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.borrow();
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .field("buffered", &st.buffer.len())
            .field("senders", &st.senders.len())
            .field("receivers", &st.receivers.len())
            .field("closed", &st.closed)
            .finish()
    }
}

pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.recv()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl Handle {
    /// New channel on this scheduler; `capacity == 0` is unbuffered
    pub fn channel<T>(&self, capacity: usize) -> Channel<T> {
        Channel::new(self, capacity)
    }
}
