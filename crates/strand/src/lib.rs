//! # strand - cooperative coroutines for Rust
//!
//! Stackful coroutines scheduled cooperatively on a single OS thread, with
//! Go-style channels, `select`, and an event loop that parks coroutines on
//! descriptor readiness instead of blocking the thread.
//!
//! ## Features
//!
//! - **Stackful**: each coroutine has its own mmap'd stack with a guard page
//! - **Fast switch**: callee-saved registers only, hand-written assembly
//! - **FIFO scheduling**: no priorities, no preemption, no spurious wakeups
//! - **Channels**: unbuffered (rendezvous) and bounded, closable, with select
//! - **I/O**: `read`/`write`/`accept`/`connect` park on `EAGAIN` (epoll on
//!   Linux, `poll(2)` elsewhere)
//! - **Cross-thread**: a lock-free MPMC injection queue behind [`Remote`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use strand::{RuntimeConfig, Scheduler};
//!
//! fn main() -> strand::RuntimeResult<()> {
//!     let mut sched = Scheduler::new(RuntimeConfig::from_env())?;
//!     let ch = sched.handle().channel::<u32>(0);
//!
//!     let tx = ch.clone();
//!     sched.spawn(move |_| {
//!         for i in 0..5 {
//!             tx.send(i).unwrap();
//!         }
//!         tx.close();
//!     })?;
//!
//!     sched.spawn(move |h| {
//!         for v in &ch {
//!             println!("got {} on {:?}", v, h.current_id());
//!         }
//!     })?;
//!
//!     sched.run()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │     spawn, yield_now, sleep, Channel, select, read/write    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  &Handle
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │     FIFO ready queue, coroutine table, stack cache          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌────────────┐
//!    │ Coroutine │      │ EventLoop │      │  Injector  │
//!    │ + context │      │ epoll/poll│      │ MPMC queue │
//!    │  switch   │      │ + timers  │      │ (Remote)   │
//!    └───────────┘      └───────────┘      └────────────┘
//! ```

// Re-export core types
pub use strand_core::{
    CoroutineId,
    CoroutineState,
    RuntimeError,
    RuntimeResult,
    MemoryError,
    ConfigError,
    SendError,
    TrySendError,
    TryRecvError,
    MpmcQueue,
    SpscQueue,
    Producer,
    Consumer,
    Descriptor,
    Event,
    Interest,
    Notify,
    Poller,
};

// Re-export kprint macros for debug logging
pub use strand_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use strand_core::kprint::{LogLevel, init as init_logging, log_level, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use strand_core::{env_get, env_get_bool, env_get_opt, env_get_size, env_get_str, env_is_set};

// Re-export runtime types
pub use strand_runtime::{
    RuntimeConfig,
    StackAllocatorKind,
    ReadyQueueKind,
    Scheduler,
    SchedulerStats,
    Handle,
    Remote,
    Channel,
    Select,
    Coroutine,
    Suspender,
    Stack,
    StackAllocator,
    set_nonblocking,
};

/// Lower-level pieces for custom setups
pub mod runtime {
    pub use strand_runtime::{arch, event_loop, memory, ready_queue};
}

/// Build a scheduler from `STRAND_*` environment settings, run `f` as the
/// first coroutine and drive everything it spawns to completion
///
/// # Example
///
/// ```ignore
/// strand::block_on(|h| {
///     h.spawn(|h| {
///         h.sleep(std::time::Duration::from_millis(10));
///     })
///     .unwrap();
/// })?;
/// ```
pub fn block_on<F>(f: F) -> RuntimeResult<()>
where
    F: FnOnce(&Handle) + 'static,
{
    let mut sched = Scheduler::from_env()?;
    sched.spawn(f)?;
    sched.run()
}
