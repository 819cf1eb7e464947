//! Single-threaded cooperative scheduler
//!
//! One [`Scheduler`] owns every coroutine it spawns, a FIFO ready queue
//! and an event loop. `run` pops the head of the ready queue, switches
//! into it and looks at the state it comes back in:
//!
//! - `Ready` (it yielded): pushed to the tail of the ready queue
//! - `Parked`: left alone; whatever it waits on will wake it
//! - `Terminated`: removed, its stack goes back to the cache
//!
//! When nothing is runnable the event loop blocks in the multiplexer until
//! a descriptor becomes ready, a timer expires or another thread injects
//! work through a [`Remote`].
//!
//! Coroutine code reaches the scheduler only through the [`Handle`] passed
//! to its entry closure; there is no ambient "current scheduler". A handle
//! holds a weak reference, so coroutines parked forever never keep a
//! dropped scheduler alive.
//!
//! Scheduling is strictly FIFO without preemption. A coroutine that never
//! yields or blocks starves every other coroutine on the same scheduler.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_core::kprint::{log_level, set_log_level, LogLevel};
use strand_core::{
    kdebug, kerror, ktrace, kwarn, CoroutineId, CoroutineState, Descriptor, Interest, MpmcQueue, Notify,
    Poller, RuntimeError, RuntimeResult,
};

use crate::config::RuntimeConfig;
use crate::coroutine::{next_id, Coroutine, Suspender};
use crate::event_loop::{EventLoop, Registration};
use crate::memory::{allocator_for, Stack, StackAllocator, StackCache};
use crate::ready_queue::{new_ready_queue, ReadyQueue};

/// Closure shipped from another thread to be run as a coroutine
type Task = Box<dyn FnOnce(&Handle) + Send + 'static>;

/// Counters since the scheduler was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub spawned: u64,
    pub completed: u64,
    pub context_switches: u64,
    pub polls: u64,
    pub injected: u64,
}

/// State shared between a scheduler thread and its remotes
struct Injector {
    queue: MpmcQueue<Task>,
    notifier: Arc<dyn Notify>,
    stop: AtomicBool,
    closed: AtomicBool,
}

impl Injector {
    fn discard(&self) {
        while self.queue.pop().is_some() {}
    }
}

pub(crate) struct Core {
    config: RuntimeConfig,
    coroutines: RefCell<HashMap<CoroutineId, Rc<Coroutine>>>,
    ready: RefCell<Box<dyn ReadyQueue>>,
    current: Cell<Option<CoroutineId>>,
    parked: Cell<usize>,
    allocator: Box<dyn StackAllocator>,
    stacks: RefCell<StackCache>,
    event_loop: RefCell<EventLoop>,
    woken: RefCell<Vec<CoroutineId>>,
    injector: Arc<Injector>,
    stopped: Cell<bool>,
    stats: Cell<SchedulerStats>,
}

impl Core {
    fn bump(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }

    fn take_stack(&self, size: usize) -> RuntimeResult<Stack> {
        if let Some(stack) = self.stacks.borrow_mut().take(size) {
            return Ok(stack);
        }
        self.allocator.allocate(size)
    }

    fn spawn_boxed(&self, handle: Handle, stack_size: usize, f: Box<dyn FnOnce(&Handle)>) -> RuntimeResult<CoroutineId> {
        let stack = self.take_stack(stack_size)?;
        let id = next_id();
        let co = Coroutine::with_id(id, stack, Box::new(move |_: &Suspender| f(&handle)));

        self.coroutines.borrow_mut().insert(id, Rc::new(co));
        self.ready.borrow_mut().push(id);
        self.bump(|s| s.spawned += 1);
        kdebug!("spawned {}", id);
        Ok(id)
    }

    fn current_or_panic(&self, op: &'static str) -> CoroutineId {
        match self.current.get() {
            Some(id) => id,
            None => panic!("{}", RuntimeError::NotInCoroutine(op)),
        }
    }

    /// Switch the running coroutine out in `state`
    fn suspend_current(&self, op: &'static str, state: CoroutineState) {
        let id = self.current_or_panic(op);
        // Raw pointer: no reference count may live on a coroutine stack
        // across a switch. The run loop holds its own Rc while we run.
        let co = self.coroutines.borrow().get(&id).map(Rc::as_ptr);
        let Some(co) = co else {
            unreachable!("running coroutine {} missing from table", id);
        };
        if state == CoroutineState::Parked {
            self.parked.set(self.parked.get() + 1);
        }
        ktrace!("{} via {}", state, op);
        // Safety: see above
        unsafe { (*co).suspend_with(state) };
    }

    /// Move a parked coroutine to the tail of the ready queue
    fn make_ready(&self, id: CoroutineId) -> bool {
        let co = self.coroutines.borrow().get(&id).cloned();
        match co {
            Some(co) if co.wake() => {
                self.parked.set(self.parked.get() - 1);
                self.ready.borrow_mut().push(id);
                true
            }
            _ => false,
        }
    }

    fn release(&self, id: CoroutineId) {
        let co = self.coroutines.borrow_mut().remove(&id);
        self.bump(|s| s.completed += 1);
        kdebug!("{} terminated", id);

        let stack = co.and_then(|co| Rc::try_unwrap(co).ok()).and_then(Coroutine::into_stack);
        if let Some(stack) = stack {
            self.stacks.borrow_mut().put(stack);
        }
    }

    fn run_one(&self, id: CoroutineId) {
        let co = self.coroutines.borrow().get(&id).cloned();
        let Some(co) = co else {
            return;
        };

        self.current.set(Some(id));
        let result = co.switch_in();
        self.current.set(None);
        self.bump(|s| s.context_switches += 1);

        match result {
            Ok(CoroutineState::Ready) => self.ready.borrow_mut().push(id),
            Ok(CoroutineState::Parked) => {}
            Ok(CoroutineState::Terminated) => {
                let payload = co.take_panic();
                drop(co);
                self.release(id);
                if let Some(payload) = payload {
                    kerror!("{} panicked", id);
                    panic::resume_unwind(payload);
                }
            }
            Ok(CoroutineState::Running) => unreachable!("{} switched out while running", id),
            Err(e) => kwarn!("skipping ready entry: {}", e),
        }
    }

    fn drain_injected(&self, handle: &Handle) {
        if self.injector.stop.swap(false, Ordering::AcqRel) {
            self.stopped.set(true);
        }
        while let Some(task) = self.injector.queue.pop() {
            self.bump(|s| s.injected += 1);
            if let Err(e) = self.spawn_boxed(handle.clone(), self.config.stack_size, task) {
                kerror!("dropping injected task: {}", e);
            }
        }
    }

    fn poll(&self, timeout: Option<Duration>) -> RuntimeResult<()> {
        let mut woken = self.woken.take();
        let result = self.event_loop.borrow_mut().poll(timeout, &mut woken);
        self.bump(|s| s.polls += 1);
        for id in woken.drain(..) {
            self.make_ready(id);
        }
        self.woken.replace(woken);
        result.map(|_| ())
    }

    /// A stop requested while no `run` is active is kept and ends the next
    /// `run` before any coroutine is resumed.
    fn run(&self, handle: &Handle, forever: bool) -> RuntimeResult<()> {
        loop {
            self.drain_injected(handle);

            // One round over what is runnable now, so coroutines that keep
            // yielding cannot keep the poller from running.
            let round = self.ready.borrow().len();
            for _ in 0..round {
                if self.stopped.get() {
                    break;
                }
                let next = self.ready.borrow_mut().pop();
                match next {
                    Some(id) => self.run_one(id),
                    None => break,
                }
            }
            if self.stopped.replace(false) {
                kdebug!("stop requested");
                return Ok(());
            }

            let has_ready = !self.ready.borrow().is_empty();
            let waiting = self.event_loop.borrow().has_waiters();
            let injected = !self.injector.queue.is_empty();

            if has_ready {
                if waiting {
                    self.poll(Some(Duration::ZERO))?;
                }
                continue;
            }
            if injected {
                continue;
            }
            if !waiting && !forever {
                let parked = self.parked.get();
                if parked > 0 {
                    kwarn!("idle with {} parked coroutines and nothing left to wake them", parked);
                }
                return Ok(());
            }
            self.poll(None)?;
        }
    }
}

/// Per-coroutine view of the scheduler
///
/// Cheap to clone; confined to the scheduler's thread. Operations that
/// suspend (`yield_now`, `sleep`, `wait_readable`, blocking channel ops)
/// panic when called outside a coroutine.
#[derive(Clone)]
pub struct Handle {
    core: Weak<Core>,
}

impl Handle {
    /// The scheduler, if it still exists
    #[inline]
    pub(crate) fn try_core(&self) -> Option<&Core> {
        if self.core.strong_count() == 0 {
            return None;
        }
        // Safety: a live strong count means the owning Scheduler still
        // holds the Core, and nothing reachable from Core drops it.
        Some(unsafe { &*self.core.as_ptr() })
    }

    #[inline]
    fn core(&self) -> &Core {
        match self.try_core() {
            Some(core) => core,
            None => panic!("strand scheduler has been dropped"),
        }
    }

    /// Spawn a coroutine with the configured stack size
    pub fn spawn<F>(&self, f: F) -> RuntimeResult<CoroutineId>
    where
        F: FnOnce(&Handle) + 'static,
    {
        let core = self.core();
        core.spawn_boxed(self.clone(), core.config.stack_size, Box::new(f))
    }

    pub fn spawn_with_stack_size<F>(&self, stack_size: usize, f: F) -> RuntimeResult<CoroutineId>
    where
        F: FnOnce(&Handle) + 'static,
    {
        self.core().spawn_boxed(self.clone(), stack_size, Box::new(f))
    }

    /// Let every other ready coroutine run once before continuing
    pub fn yield_now(&self) {
        self.core().suspend_current("yield_now", CoroutineState::Ready);
    }

    /// Park the calling coroutine for at least `duration`
    ///
    /// A duration past the clock's range (e.g. `Duration::MAX`) parks
    /// without a timer: the coroutine never wakes on its own and does not
    /// keep the scheduler running.
    pub fn sleep(&self, duration: Duration) {
        let core = self.core();
        let id = core.current_or_panic("sleep");
        if duration.is_zero() {
            core.suspend_current("sleep", CoroutineState::Ready);
            return;
        }
        match Instant::now().checked_add(duration) {
            Some(deadline) => core.event_loop.borrow_mut().add_timer(deadline, id),
            None => kdebug!("{} sleeping forever", id),
        }
        self.park("sleep");
    }

    /// Park until `fd` is readable (or in error)
    pub fn wait_readable(&self, fd: Descriptor) -> RuntimeResult<()> {
        self.wait_for(fd, Interest::READABLE, "wait_readable")
    }

    /// Park until `fd` is writable (or in error)
    pub fn wait_writable(&self, fd: Descriptor) -> RuntimeResult<()> {
        self.wait_for(fd, Interest::WRITABLE, "wait_writable")
    }

    fn wait_for(&self, fd: Descriptor, interest: Interest, op: &'static str) -> RuntimeResult<()> {
        let core = self.core();
        let coroutine = core.current_or_panic(op);
        core.event_loop
            .borrow_mut()
            .register(Registration { fd, interest, coroutine })?;
        self.park(op);
        Ok(())
    }

    /// Stop watching `fd`, waking any coroutine still waiting on it
    ///
    /// Call before closing a descriptor other coroutines may be blocked on;
    /// they resume and see the failure on their next I/O call.
    pub fn deregister(&self, fd: Descriptor) -> RuntimeResult<()> {
        let core = self.core();
        let orphans = core.event_loop.borrow_mut().deregister(fd)?;
        for id in orphans {
            core.make_ready(id);
        }
        Ok(())
    }

    /// Park the current coroutine until some structure calls `wake`
    pub(crate) fn park(&self, op: &'static str) {
        self.core().suspend_current(op, CoroutineState::Parked);
    }

    /// Make a parked coroutine runnable; false if it was not parked or the
    /// scheduler is gone
    pub(crate) fn wake(&self, id: CoroutineId) -> bool {
        self.try_core().map(|core| core.make_ready(id)).unwrap_or(false)
    }

    /// Id of the coroutine calling this, `None` from the root context
    pub fn current_id(&self) -> Option<CoroutineId> {
        self.try_core().and_then(|core| core.current.get())
    }

    #[inline]
    pub fn in_coroutine(&self) -> bool {
        self.current_id().is_some()
    }

    /// Return from the current `run` once the caller switches out
    ///
    /// Called while no `run` is active, it ends the next `run` before that
    /// resumes anything.
    pub fn stop(&self) {
        if let Some(core) = self.try_core() {
            core.stopped.set(true);
        }
    }

    /// Thread-safe handle for injecting work from other threads
    pub fn remote(&self) -> Remote {
        Remote { injector: Arc::clone(&self.core().injector) }
    }

    pub fn ready_len(&self) -> usize {
        self.core().ready.borrow().len()
    }

    pub fn parked_len(&self) -> usize {
        self.core().parked.get()
    }

    /// Coroutines alive: ready, running or parked
    pub fn coroutine_count(&self) -> usize {
        self.core().coroutines.borrow().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core().stats.get()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core().config
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("alive", &(self.core.strong_count() > 0))
            .field("current", &self.current_id())
            .finish()
    }
}

/// Cross-thread handle to a scheduler
///
/// The only way to reach a scheduler from another OS thread. Closures go
/// through a lock-free MPMC queue and the poller is woken so a scheduler
/// blocked in `poll` picks them up promptly.
#[derive(Clone)]
pub struct Remote {
    injector: Arc<Injector>,
}

impl Remote {
    /// Run `f` as a new coroutine on the scheduler's thread
    ///
    /// `Ok` means the task was queued. Tasks still queued when the
    /// scheduler is dropped are discarded without running.
    pub fn spawn<F>(&self, f: F) -> RuntimeResult<()>
    where
        F: FnOnce(&Handle) + Send + 'static,
    {
        if self.injector.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Stopped);
        }
        self.injector
            .queue
            .push(Box::new(f))
            .map_err(|_| RuntimeError::InjectQueueFull)?;
        // Closed between the check and the push: the scheduler's final
        // drain may already be over, so nothing would ever pop this task.
        if self.injector.closed.load(Ordering::SeqCst) {
            self.injector.discard();
            return Err(RuntimeError::Stopped);
        }
        self.injector.notifier.notify()
    }

    /// Ask the scheduler to return from `run_forever`
    pub fn stop(&self) -> RuntimeResult<()> {
        self.injector.stop.store(true, Ordering::Release);
        self.injector.notifier.notify()
    }

    /// Interrupt a blocking poll without queueing anything
    pub fn wake(&self) -> RuntimeResult<()> {
        self.injector.notifier.notify()
    }

    pub fn is_closed(&self) -> bool {
        self.injector.closed.load(Ordering::SeqCst)
    }
}

/// Owner of a set of coroutines on one OS thread
pub struct Scheduler {
    core: Rc<Core>,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let event_loop = EventLoop::with_default_poller(config.poll_events)?;
        Ok(Self::build(config, event_loop))
    }

    /// Defaults plus `STRAND_*` environment overrides
    pub fn from_env() -> RuntimeResult<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    /// Use a caller-supplied readiness multiplexer
    pub fn with_poller(config: RuntimeConfig, poller: Box<dyn Poller>) -> RuntimeResult<Self> {
        config.validate()?;
        Ok(Self::build(config, EventLoop::new(poller)))
    }

    fn build(config: RuntimeConfig, event_loop: EventLoop) -> Self {
        if config.debug_logging && log_level() < LogLevel::Debug {
            set_log_level(LogLevel::Debug);
        }
        kdebug!(
            "scheduler: {} ready queue, {} poller, {} byte stacks",
            if config.ready_queue == crate::config::ReadyQueueKind::Ring { "ring" } else { "fifo" },
            event_loop.poller_name(),
            config.stack_size
        );

        let injector = Arc::new(Injector {
            queue: MpmcQueue::new(config.inject_capacity),
            notifier: event_loop.notifier(),
            stop: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let core = Core {
            allocator: allocator_for(&config),
            stacks: RefCell::new(StackCache::new(config.stack_cache)),
            ready: RefCell::new(new_ready_queue(&config)),
            coroutines: RefCell::new(HashMap::new()),
            current: Cell::new(None),
            parked: Cell::new(0),
            event_loop: RefCell::new(event_loop),
            woken: RefCell::new(Vec::new()),
            injector,
            stopped: Cell::new(false),
            stats: Cell::new(SchedulerStats::default()),
            config,
        };
        Scheduler { core: Rc::new(core) }
    }

    pub fn handle(&self) -> Handle {
        Handle { core: Rc::downgrade(&self.core) }
    }

    pub fn spawn<F>(&self, f: F) -> RuntimeResult<CoroutineId>
    where
        F: FnOnce(&Handle) + 'static,
    {
        self.handle().spawn(f)
    }

    pub fn spawn_with_stack_size<F>(&self, stack_size: usize, f: F) -> RuntimeResult<CoroutineId>
    where
        F: FnOnce(&Handle) + 'static,
    {
        self.handle().spawn_with_stack_size(stack_size, f)
    }

    /// Run until no coroutine is runnable and nothing is left to wait for
    pub fn run(&mut self) -> RuntimeResult<()> {
        self.run_until_idle()
    }

    pub fn run_until_idle(&mut self) -> RuntimeResult<()> {
        let handle = self.handle();
        self.core.run(&handle, false)
    }

    /// Keep running, blocking in the poller when idle, until `stop`
    pub fn run_forever(&mut self) -> RuntimeResult<()> {
        let handle = self.handle();
        self.core.run(&handle, true)
    }

    pub fn remote(&self) -> Remote {
        Remote { injector: Arc::clone(&self.core.injector) }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core.stats.get()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.config
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.core.injector.closed.store(true, Ordering::SeqCst);
        self.core.injector.discard();

        let coroutines = self.core.coroutines.take();
        if !coroutines.is_empty() {
            kdebug!("dropping scheduler with {} unfinished coroutines", coroutines.len());
        }
        drop(coroutines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadyQueueKind;

    fn scheduler() -> Scheduler {
        Scheduler::new(RuntimeConfig::new().stack_size(64 * 1024)).unwrap()
    }

    #[test]
    fn test_fifo_round_robin() {
        let mut sched = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            sched
                .spawn(move |h| {
                    for i in 0..2 {
                        log.borrow_mut().push(format!("{}{}", name, i));
                        h.yield_now();
                    }
                })
                .unwrap();
        }
        sched.run().unwrap();

        assert_eq!(*log.borrow(), vec!["a0", "b0", "c0", "a1", "b1", "c1"]);
        let stats = sched.stats();
        assert_eq!(stats.spawned, 3);
        assert_eq!(stats.completed, 3);
        assert_eq!(sched.handle().coroutine_count(), 0);
    }

    #[test]
    fn test_spawn_from_coroutine() {
        let mut sched = scheduler();
        let hits = Rc::new(Cell::new(0));
        let h2 = Rc::clone(&hits);
        sched
            .spawn(move |h| {
                for _ in 0..10 {
                    let hits = Rc::clone(&h2);
                    h.spawn(move |_| hits.set(hits.get() + 1)).unwrap();
                }
            })
            .unwrap();
        sched.run().unwrap();
        assert_eq!(hits.get(), 10);
    }

    #[test]
    fn test_current_id() {
        let mut sched = scheduler();
        let handle = sched.handle();
        assert_eq!(handle.current_id(), None);

        let seen = Rc::new(Cell::new(None));
        let s = Rc::clone(&seen);
        let id = sched.spawn(move |h| s.set(h.current_id())).unwrap();
        sched.run().unwrap();
        assert_eq!(seen.get(), Some(id));
    }

    #[test]
    #[should_panic(expected = "yield_now must be called from inside a coroutine")]
    fn test_yield_outside_coroutine_panics() {
        let sched = scheduler();
        sched.handle().yield_now();
    }

    #[test]
    fn test_sleep_orders_by_deadline() {
        let mut sched = scheduler();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (tag, ms) in [("slow", 30u64), ("fast", 5), ("mid", 15)] {
            let order = Rc::clone(&order);
            sched
                .spawn(move |h| {
                    h.sleep(Duration::from_millis(ms));
                    order.borrow_mut().push(tag);
                })
                .unwrap();
        }
        let start = Instant::now();
        sched.run().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(*order.borrow(), vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn test_stop_from_coroutine() {
        let mut sched = scheduler();
        let rounds = Rc::new(Cell::new(0));
        let r = Rc::clone(&rounds);
        sched
            .spawn(move |h| loop {
                r.set(r.get() + 1);
                if r.get() == 5 {
                    h.stop();
                }
                h.yield_now();
            })
            .unwrap();
        sched.run_forever().unwrap();
        assert_eq!(rounds.get(), 5);

        // Runs again from where it stopped; dropping the scheduler frees it
        assert_eq!(sched.handle().coroutine_count(), 1);
    }

    #[test]
    fn test_stop_before_run_is_kept() {
        let mut sched = scheduler();
        let ran = Rc::new(Cell::new(0));
        let r = Rc::clone(&ran);
        sched.spawn(move |_| r.set(r.get() + 1)).unwrap();

        sched.handle().stop();
        sched.run().unwrap();
        assert_eq!(ran.get(), 0);
        assert_eq!(sched.handle().ready_len(), 1);

        // Consumed by the first run
        sched.run().unwrap();
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_remote_stop_resumes_nothing() {
        let mut sched = scheduler();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        sched.spawn(move |_| r.set(true)).unwrap();

        sched.remote().stop().unwrap();
        sched.run_forever().unwrap();
        assert!(!ran.get());

        sched.run().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_remote_spawn_after_drop_is_rejected() {
        let sched = scheduler();
        let remote = sched.remote();
        drop(sched);
        assert!(remote.is_closed());
        assert!(matches!(remote.spawn(|_| {}), Err(RuntimeError::Stopped)));
    }

    #[test]
    fn test_sleep_past_clock_range_parks() {
        let mut sched = scheduler();
        let woke = Rc::new(Cell::new(false));
        let w = Rc::clone(&woke);
        sched
            .spawn(move |h| {
                h.sleep(Duration::MAX);
                w.set(true);
            })
            .unwrap();
        sched.spawn(|h| h.sleep(Duration::from_millis(1))).unwrap();

        sched.run().unwrap();
        let handle = sched.handle();
        assert!(!woke.get());
        assert_eq!(handle.parked_len(), 1);
        assert!(!sched.core.event_loop.borrow().has_waiters());
    }

    #[test]
    fn test_oversized_stack_spawn_fails() {
        let sched = scheduler();
        let result = sched.spawn_with_stack_size(usize::MAX - 100, |_| {});
        assert!(matches!(
            result,
            Err(RuntimeError::Memory(strand_core::MemoryError::AllocationFailed { .. }))
        ));
        assert_eq!(sched.handle().coroutine_count(), 0);
        assert_eq!(sched.stats().spawned, 0);
    }

    #[test]
    fn test_oversized_inject_queue_is_rejected() {
        let config = RuntimeConfig::new().stack_size(64 * 1024).inject_capacity(usize::MAX);
        assert!(matches!(Scheduler::new(config), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_panic_propagates_and_releases() {
        let mut sched = scheduler();
        sched.spawn(|_| panic!("coroutine failure")).unwrap();
        let err = panic::catch_unwind(panic::AssertUnwindSafe(|| sched.run())).unwrap_err();
        assert_eq!(err.downcast_ref::<&str>(), Some(&"coroutine failure"));
        assert_eq!(sched.handle().coroutine_count(), 0);
        assert_eq!(sched.stats().completed, 1);
    }

    #[test]
    fn test_ring_ready_queue_and_stack_reuse() {
        let config = RuntimeConfig::new()
            .stack_size(32 * 1024)
            .ready_queue(ReadyQueueKind::Ring)
            .ready_queue_capacity(4)
            .stack_cache(8);
        let mut sched = Scheduler::new(config).unwrap();
        let total = Rc::new(Cell::new(0u32));
        for i in 0..50u32 {
            let total = Rc::clone(&total);
            sched
                .spawn(move |h| {
                    h.yield_now();
                    total.set(total.get() + i);
                })
                .unwrap();
        }
        sched.run().unwrap();
        assert_eq!(total.get(), (0..50).sum());

        // Second wave draws from the cache
        for _ in 0..8 {
            sched.spawn(|_| {}).unwrap();
        }
        assert_eq!(sched.core.stacks.borrow().len(), 0);
        sched.run().unwrap();
    }

    #[test]
    fn test_drop_frees_unstarted_coroutines() {
        let marker = Rc::new(());
        {
            let mut sched = scheduler();
            let m = Rc::clone(&marker);
            sched
                .spawn(move |h| {
                    let _m = m;
                    h.park("test");
                })
                .unwrap();
            let m = Rc::clone(&marker);
            // Never started: its closure is dropped normally
            sched.spawn(move |_| drop(m)).unwrap();
            let handle = sched.handle();
            // Only run the first coroutine
            let first = sched.core.ready.borrow_mut().pop().unwrap();
            sched.core.run_one(first);
            assert_eq!(handle.parked_len(), 1);
        }
        // The parked coroutine's stack is freed without unwinding, so its
        // clone leaks; the unstarted one was released.
        assert_eq!(Rc::strong_count(&marker), 2);
    }

    #[test]
    fn test_handle_after_drop() {
        let sched = scheduler();
        let handle = sched.handle();
        drop(sched);
        assert_eq!(handle.current_id(), None);
        assert!(!handle.wake(CoroutineId::new(1)));
        handle.stop();
    }
}
