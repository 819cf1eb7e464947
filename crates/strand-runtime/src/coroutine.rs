//! Stackful coroutine
//!
//! A [`Coroutine`] pairs a [`Stack`] with two saved execution contexts:
//! its own, and the one of whoever last resumed it. `resume` switches from
//! the caller into the coroutine; `Suspender::suspend` (or the scheduler's
//! park path) switches back. The entry closure runs on the coroutine stack
//! under `catch_unwind`, so a panic never unwinds across the context
//! switch; it is stored and re-raised on the resumer's side.
//!
//! ```rust,ignore
//! let co = Coroutine::with_stack_size(64 * 1024, |s| {
//!     for _ in 0..3 {
//!         s.suspend();
//!     }
//! })?;
//! while co.resume()? != CoroutineState::Terminated {}
//! ```
//!
//! Dropping a coroutine that has not terminated frees its stack without
//! unwinding it; destructors of values living on that stack do not run.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use strand_core::kprint::{current_coroutine_id, set_coroutine_id};
use strand_core::{ktrace, CoroutineId, CoroutineState, RuntimeError, RuntimeResult};

use crate::arch::{init_context, switch_context, ExecutionContext};
use crate::memory::{MmapStackAllocator, Stack, StackAllocator};

type Entry = Box<dyn FnOnce(&Suspender)>;
type PanicPayload = Box<dyn Any + Send + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out a process-wide unique coroutine id
pub(crate) fn next_id() -> CoroutineId {
    CoroutineId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

struct ControlBlock {
    id: CoroutineId,
    state: Cell<CoroutineState>,
    context: UnsafeCell<ExecutionContext>,
    caller: UnsafeCell<ExecutionContext>,
    entry: Cell<Option<Entry>>,
    panic: Cell<Option<PanicPayload>>,
    stack: Stack,
}

/// A suspendable computation with its own stack
pub struct Coroutine {
    // Boxed so the address handed to the trampoline stays put
    inner: Box<ControlBlock>,
}

impl Coroutine {
    /// Create a coroutine that will run `entry` on `stack`
    ///
    /// Nothing runs until the first [`resume`](Self::resume).
    pub fn new<F>(stack: Stack, entry: F) -> Self
    where
        F: FnOnce(&Suspender) + 'static,
    {
        Self::with_id(next_id(), stack, Box::new(entry))
    }

    /// Create a coroutine on a freshly mapped, guarded stack of `size` bytes
    pub fn with_stack_size<F>(size: usize, entry: F) -> RuntimeResult<Self>
    where
        F: FnOnce(&Suspender) + 'static,
    {
        let stack = MmapStackAllocator::new(true).allocate(size)?;
        Ok(Self::new(stack, entry))
    }

    pub(crate) fn with_id(id: CoroutineId, stack: Stack, entry: Entry) -> Self {
        let inner = Box::new(ControlBlock {
            id,
            state: Cell::new(CoroutineState::Ready),
            context: UnsafeCell::new(ExecutionContext::default()),
            caller: UnsafeCell::new(ExecutionContext::default()),
            entry: Cell::new(Some(entry)),
            panic: Cell::new(None),
            stack,
        });

        let arg = &*inner as *const ControlBlock as usize;
        // Safety: the stack is owned by the control block and outlives the
        // context; coroutine_main never returns.
        unsafe { init_context(&mut *inner.context.get(), inner.stack.top(), coroutine_main, arg) };

        Coroutine { inner }
    }

    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.inner.id
    }

    #[inline]
    pub fn state(&self) -> CoroutineState {
        self.inner.state.get()
    }

    /// Usable bytes of the coroutine's stack
    #[inline]
    pub fn stack_size(&self) -> usize {
        self.inner.stack.size()
    }

    /// Run the coroutine until it suspends or finishes
    ///
    /// Returns the state it stopped in. Resuming anything but a `Ready`
    /// coroutine is an error. If the body panicked, the panic continues on
    /// the caller's stack.
    pub fn resume(&self) -> RuntimeResult<CoroutineState> {
        let state = self.switch_in()?;
        if let Some(payload) = self.take_panic() {
            panic::resume_unwind(payload);
        }
        Ok(state)
    }

    /// Like `resume`, but leaves a captured panic for `take_panic`
    pub(crate) fn switch_in(&self) -> RuntimeResult<CoroutineState> {
        let cb = &*self.inner;
        let state = cb.state.get();
        if state != CoroutineState::Ready {
            return Err(RuntimeError::InvalidState { id: cb.id, state });
        }
        cb.state.set(CoroutineState::Running);

        let outer = current_coroutine_id();
        set_coroutine_id(cb.id);
        ktrace!("switch in");
        // Safety: both contexts live in the boxed control block; the
        // coroutine context is either fresh or was saved by suspend_with.
        unsafe { switch_context(cb.caller.get(), cb.context.get()) };
        set_coroutine_id(outer);

        Ok(cb.state.get())
    }

    /// Panic payload captured when the body unwound
    pub(crate) fn take_panic(&self) -> Option<PanicPayload> {
        self.inner.panic.take()
    }

    /// Switch back to the resumer, leaving the coroutine in `state`
    ///
    /// Must be called from code running on this coroutine's stack.
    pub(crate) fn suspend_with(&self, state: CoroutineState) {
        self.inner.suspend_with(state);
    }

    /// Mark a parked coroutine runnable again; returns false otherwise
    pub(crate) fn wake(&self) -> bool {
        if self.inner.state.get() == CoroutineState::Parked {
            self.inner.state.set(CoroutineState::Ready);
            true
        } else {
            false
        }
    }

    /// Recover the stack of a finished coroutine for reuse
    pub(crate) fn into_stack(self) -> Option<Stack> {
        if self.state() != CoroutineState::Terminated {
            return None;
        }
        let cb = *self.inner;
        Some(cb.stack)
    }
}

impl ControlBlock {
    fn suspend_with(&self, state: CoroutineState) {
        debug_assert_eq!(self.state.get(), CoroutineState::Running);
        self.state.set(state);
        // Safety: called on this coroutine's stack; the caller context was
        // filled in by the switch_in that started the current run.
        unsafe { switch_context(self.context.get(), self.caller.get()) };
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("stack", &self.inner.stack)
            .finish()
    }
}

/// Passed to a standalone coroutine's body to yield control
pub struct Suspender {
    cb: NonNull<ControlBlock>,
}

impl Suspender {
    /// Return to the resumer; the coroutine stays `Ready`
    pub fn suspend(&self) {
        // Safety: a Suspender only exists on its coroutine's stack while the
        // control block is alive
        unsafe { self.cb.as_ref().suspend_with(CoroutineState::Ready) }
    }

    pub fn id(&self) -> CoroutineId {
        unsafe { self.cb.as_ref().id }
    }
}

unsafe extern "C" fn coroutine_main(arg: usize) -> ! {
    let cb = &*(arg as *const ControlBlock);

    if let Some(entry) = cb.entry.take() {
        let suspender = Suspender { cb: NonNull::from(cb) };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || entry(&suspender))) {
            cb.panic.set(Some(payload));
        }
    }

    cb.state.set(CoroutineState::Terminated);
    switch_context(cb.context.get(), cb.caller.get());

    // resume refuses terminated coroutines
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::memory::HeapStackAllocator;

    fn heap_stack() -> Stack {
        HeapStackAllocator.allocate(64 * 1024).unwrap()
    }

    #[test]
    fn test_yield_and_finish() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let co = Coroutine::new(heap_stack(), move |s| {
            for i in 0..3 {
                l.borrow_mut().push(i);
                s.suspend();
            }
        });

        assert_eq!(co.state(), CoroutineState::Ready);
        for expected in 1..=3 {
            assert_eq!(co.resume().unwrap(), CoroutineState::Ready);
            assert_eq!(log.borrow().len(), expected);
        }
        assert_eq!(co.resume().unwrap(), CoroutineState::Terminated);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_resume_terminated_is_error() {
        let co = Coroutine::new(heap_stack(), |_| {});
        assert_eq!(co.resume().unwrap(), CoroutineState::Terminated);
        let err = co.resume().unwrap_err();
        assert_eq!(
            err,
            RuntimeError::InvalidState { id: co.id(), state: CoroutineState::Terminated }
        );
    }

    #[test]
    fn test_captures_dropped_on_completion() {
        let marker = Rc::new(());
        let m = Rc::clone(&marker);
        let co = Coroutine::new(heap_stack(), move |_| {
            let _keep = m;
        });
        assert_eq!(Rc::strong_count(&marker), 2);
        co.resume().unwrap();
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_unstarted_coroutine_drops_entry() {
        let marker = Rc::new(());
        let m = Rc::clone(&marker);
        let co = Coroutine::new(heap_stack(), move |_| drop(m));
        drop(co);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_panic_reraised_on_resumer() {
        let co = Coroutine::new(heap_stack(), |_| panic!("boom"));
        let caught = panic::catch_unwind(AssertUnwindSafe(|| co.resume()));
        let payload = caught.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
        assert_eq!(co.state(), CoroutineState::Terminated);
    }

    #[test]
    fn test_nested_coroutines() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&order);
        let outer = Coroutine::new(heap_stack(), move |s| {
            let o2 = Rc::clone(&o);
            let inner = Coroutine::new(heap_stack(), move |s2| {
                o2.borrow_mut().push("inner-1");
                s2.suspend();
                o2.borrow_mut().push("inner-2");
            });
            inner.resume().unwrap();
            o.borrow_mut().push("outer-1");
            s.suspend();
            inner.resume().unwrap();
            o.borrow_mut().push("outer-2");
        });

        outer.resume().unwrap();
        outer.resume().unwrap();
        assert_eq!(outer.state(), CoroutineState::Terminated);
        assert_eq!(*order.borrow(), vec!["inner-1", "outer-1", "inner-2", "outer-2"]);
    }

    #[test]
    fn test_runs_on_own_stack() {
        let seen = Rc::new(Cell::new(0usize));
        let s2 = Rc::clone(&seen);
        let co = Coroutine::with_stack_size(32 * 1024, move |_| {
            let local = 0u8;
            s2.set(&local as *const u8 as usize);
        })
        .unwrap();
        co.resume().unwrap();
        assert!(co.inner.stack.contains(seen.get()));
    }

    #[test]
    fn test_deep_recursion() {
        fn depth(n: u64) -> u64 {
            let pad = [n; 8];
            if n == 0 { pad[0] } else { depth(n - 1) + std::hint::black_box(pad)[7] }
        }
        let out = Rc::new(Cell::new(0));
        let o = Rc::clone(&out);
        let co = Coroutine::with_stack_size(256 * 1024, move |_| o.set(depth(500))).unwrap();
        co.resume().unwrap();
        assert_eq!(out.get(), (1..=500).sum::<u64>());
    }

    #[test]
    fn test_ids_unique() {
        let a = Coroutine::new(heap_stack(), |_| {});
        let b = Coroutine::new(heap_stack(), |_| {});
        assert_ne!(a.id(), b.id());
        assert!(a.id().is_some());
    }

    #[test]
    fn test_into_stack_only_after_termination() {
        let co = Coroutine::new(heap_stack(), |s| s.suspend());
        co.resume().unwrap();
        assert!(co.into_stack().is_none());

        let co = Coroutine::new(heap_stack(), |_| {});
        co.resume().unwrap();
        let stack = co.into_stack().unwrap();
        assert_eq!(stack.size(), 64 * 1024);
    }
}
