//! Runtime configuration
//!
//! Three layers, highest wins:
//!
//! 1. Builder calls on [`RuntimeConfig`]
//! 2. `STRAND_*` environment variables (read by [`RuntimeConfig::from_env`])
//! 3. Compile-time defaults in [`defaults`]
//!
//! ```rust,ignore
//! use strand_runtime::config::{RuntimeConfig, ReadyQueueKind};
//!
//! let config = RuntimeConfig::from_env()
//!     .stack_size(64 * 1024)
//!     .ready_queue(ReadyQueueKind::Ring);
//! ```

pub mod defaults;

use strand_core::constants::{MAX_POLL_EVENTS, MAX_QUEUE_CAPACITY, MIN_STACK_SIZE};
use strand_core::env::{env_get, env_get_bool, env_get_size, env_get_str};
use strand_core::kprintln;
use strand_core::{ConfigError, RuntimeResult};

/// Which allocator backs coroutine stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAllocatorKind {
    /// Anonymous mappings with an optional guard page
    Mmap,
    /// Global allocator, no guard page
    Heap,
}

/// Ready queue implementation used by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyQueueKind {
    /// Unbounded `VecDeque`
    Fifo,
    /// Bounded SPSC ring with an overflow list
    Ring,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Usable stack bytes per coroutine
    pub stack_size: usize,
    /// Install a PROT_NONE page below each mapped stack
    pub guard_pages: bool,
    /// Released stacks kept for reuse (0 disables the cache)
    pub stack_cache: usize,
    pub stack_allocator: StackAllocatorKind,
    pub ready_queue: ReadyQueueKind,
    /// Ring size for `ReadyQueueKind::Ring`
    pub ready_queue_capacity: usize,
    /// Maximum readiness events collected per poll
    pub poll_events: usize,
    /// Slots in the cross-thread spawn queue
    pub inject_capacity: usize,
    /// Log scheduler decisions at debug level
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    /// Compile-time defaults only, ignoring the environment
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            guard_pages: defaults::GUARD_PAGES,
            stack_cache: defaults::STACK_CACHE,
            stack_allocator: if defaults::HEAP_STACKS {
                StackAllocatorKind::Heap
            } else {
                StackAllocatorKind::Mmap
            },
            ready_queue: if defaults::USE_RING_QUEUE {
                ReadyQueueKind::Ring
            } else {
                ReadyQueueKind::Fifo
            },
            ready_queue_capacity: defaults::READY_QUEUE_CAPACITY,
            poll_events: defaults::POLL_EVENTS,
            inject_capacity: defaults::INJECT_CAPACITY,
            debug_logging: defaults::DEBUG_LOGGING || cfg!(feature = "debug-logging"),
        }
    }

    /// Defaults with environment overrides
    ///
    /// - `STRAND_STACK_SIZE` - bytes, `K`/`M` suffixes accepted
    /// - `STRAND_GUARD_PAGES` - 0/1
    /// - `STRAND_STACK_CACHE` - number of cached stacks
    /// - `STRAND_STACK_ALLOCATOR` - `mmap` or `heap`
    /// - `STRAND_READY_QUEUE` - `fifo` or `ring`
    /// - `STRAND_READY_QUEUE_CAPACITY`
    /// - `STRAND_POLL_EVENTS`
    /// - `STRAND_INJECT_CAPACITY`
    /// - `STRAND_DEBUG` - 0/1
    pub fn from_env() -> Self {
        let base = Self::new();

        let stack_allocator = match env_get_str("STRAND_STACK_ALLOCATOR", "").to_ascii_lowercase().as_str() {
            "heap" => StackAllocatorKind::Heap,
            "mmap" => StackAllocatorKind::Mmap,
            _ => base.stack_allocator,
        };
        let ready_queue = match env_get_str("STRAND_READY_QUEUE", "").to_ascii_lowercase().as_str() {
            "ring" => ReadyQueueKind::Ring,
            "fifo" => ReadyQueueKind::Fifo,
            _ => base.ready_queue,
        };

        Self {
            stack_size: env_get_size("STRAND_STACK_SIZE", base.stack_size),
            guard_pages: env_get_bool("STRAND_GUARD_PAGES", base.guard_pages),
            stack_cache: env_get("STRAND_STACK_CACHE", base.stack_cache),
            stack_allocator,
            ready_queue,
            ready_queue_capacity: env_get("STRAND_READY_QUEUE_CAPACITY", base.ready_queue_capacity),
            poll_events: env_get("STRAND_POLL_EVENTS", base.poll_events),
            inject_capacity: env_get("STRAND_INJECT_CAPACITY", base.inject_capacity),
            debug_logging: env_get_bool("STRAND_DEBUG", base.debug_logging),
        }
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn guard_pages(mut self, enable: bool) -> Self {
        self.guard_pages = enable;
        self
    }

    pub fn stack_cache(mut self, n: usize) -> Self {
        self.stack_cache = n;
        self
    }

    pub fn stack_allocator(mut self, kind: StackAllocatorKind) -> Self {
        self.stack_allocator = kind;
        self
    }

    pub fn ready_queue(mut self, kind: ReadyQueueKind) -> Self {
        self.ready_queue = kind;
        self
    }

    pub fn ready_queue_capacity(mut self, cap: usize) -> Self {
        self.ready_queue_capacity = cap;
        self
    }

    pub fn poll_events(mut self, n: usize) -> Self {
        self.poll_events = n;
        self
    }

    pub fn inject_capacity(mut self, cap: usize) -> Self {
        self.inject_capacity = cap;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 16KB").into());
        }
        if self.ready_queue == ReadyQueueKind::Ring && self.ready_queue_capacity < 2 {
            return Err(ConfigError::InvalidValue("ready_queue_capacity must be >= 2").into());
        }
        if self.ready_queue == ReadyQueueKind::Ring && self.ready_queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidValue("ready_queue_capacity must be <= 1M").into());
        }
        if self.poll_events == 0 || self.poll_events > MAX_POLL_EVENTS {
            return Err(ConfigError::InvalidValue("poll_events must be in 1..=65536").into());
        }
        if self.inject_capacity == 0 || self.inject_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidValue("inject_capacity must be in 1..=1M").into());
        }
        Ok(())
    }

    /// Dump the effective configuration to stderr
    pub fn print(&self) {
        kprintln!("strand configuration:");
        kprintln!("  stack_size:           {}", self.stack_size);
        kprintln!("  guard_pages:          {}", self.guard_pages);
        kprintln!("  stack_cache:          {}", self.stack_cache);
        kprintln!("  stack_allocator:      {:?}", self.stack_allocator);
        kprintln!("  ready_queue:          {:?}", self.ready_queue);
        kprintln!("  ready_queue_capacity: {}", self.ready_queue_capacity);
        kprintln!("  poll_events:          {}", self.poll_events);
        kprintln!("  inject_capacity:      {}", self.inject_capacity);
        kprintln!("  debug_logging:        {}", self.debug_logging);
    }
}
