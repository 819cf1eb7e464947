//! # strand-runtime
//!
//! Platform-specific half of the strand coroutine runtime.
//!
//! This crate provides:
//! - Context switching (hand-written x86_64 and aarch64 assembly)
//! - Coroutine stacks (mmap with guard pages, or heap) and a stack cache
//! - Standalone stackful coroutines
//! - A single-threaded FIFO scheduler with cross-thread injection
//! - Channels (unbuffered and bounded) and select
//! - An event loop bridging epoll/poll readiness and timers to coroutines
//!
//! Everything except [`Remote`] is confined to the thread that created the
//! scheduler.

pub mod config;
pub mod memory;
pub mod arch;
pub mod coroutine;
pub mod ready_queue;
pub mod event_loop;
pub mod scheduler;
pub mod channel;
pub mod select;
pub mod io;

// Re-exports
pub use config::{ReadyQueueKind, RuntimeConfig, StackAllocatorKind};
pub use coroutine::{Coroutine, Suspender};
pub use memory::{HeapStackAllocator, MmapStackAllocator, Stack, StackAllocator, StackCache};
pub use scheduler::{Handle, Remote, Scheduler, SchedulerStats};
pub use channel::{Channel, Iter};
pub use select::Select;
pub use event_loop::{default_poller, EventLoop, Registration};
pub use io::set_nonblocking;

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub use arch::aarch64 as current_arch;
    }
}
