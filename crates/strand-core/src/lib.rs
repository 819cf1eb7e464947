//! # strand-core
//!
//! Core types for the strand cooperative coroutine runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks, the scheduler, channels and the event loop
//! live in `strand-runtime`.
//!
//! ## Modules
//!
//! - `id` - Coroutine identifier type
//! - `state` - Coroutine lifecycle state
//! - `queue` - Lock-free SPSC and MPMC ring buffers
//! - `error` - Error types
//! - `traits` - Host collaborator traits (readiness multiplexer, notifier)
//! - `kprint` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod queue;
pub mod error;
pub mod traits;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::CoroutineId;
pub use state::CoroutineState;
pub use queue::{MpmcQueue, SpscQueue, Producer, Consumer};
pub use error::{
    RuntimeError, RuntimeResult, MemoryError, ConfigError,
    SendError, TrySendError, TryRecvError,
};
pub use traits::{Descriptor, Event, Interest, Notify, Poller};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_size, env_get_str, env_is_set};

/// Constants for memory layout
pub mod constants {
    /// Smallest stack a coroutine may be created with (16 KB)
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Default coroutine stack size (256 KB, committed lazily)
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Guard page size used when the platform page size is unknown
    pub const GUARD_SIZE: usize = 4096;

    /// Largest ring a scheduler queue may be configured with (1M slots)
    pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

    /// Largest number of events fetched per poll
    pub const MAX_POLL_EVENTS: usize = 1 << 16;
}
