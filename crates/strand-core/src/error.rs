//! Error types for the strand runtime

use core::fmt;
use thiserror::Error;

use crate::id::CoroutineId;
use crate::state::CoroutineState;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur in runtime operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Operation is not legal in the coroutine's current state
    #[error("{id} cannot be resumed while {state}")]
    InvalidState {
        id: CoroutineId,
        state: CoroutineState,
    },

    /// A suspending operation was invoked from the scheduler's root context
    #[error("{0} must be called from inside a coroutine")]
    NotInCoroutine(&'static str),

    /// Stack or buffer allocation failed
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Configuration rejected by validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Host call failed with an errno
    #[error("os error {0}")]
    Os(i32),

    /// Another coroutine already waits for the same readiness on this descriptor
    #[error("descriptor {fd} already has a waiter for this interest")]
    AlreadyRegistered { fd: i32 },

    /// Cross-thread injection queue is full
    #[error("injection queue full")]
    InjectQueueFull,

    /// The scheduler behind a remote handle has shut down
    #[error("scheduler stopped")]
    Stopped,
}

impl RuntimeError {
    /// Build an `Os` error from a `std::io::Error`
    pub fn from_io(err: &std::io::Error) -> Self {
        RuntimeError::Os(err.raw_os_error().unwrap_or(0))
    }
}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// mmap or the global allocator returned nothing
    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    /// mprotect failed while installing a guard page
    #[error("memory protection change failed")]
    ProtectionFailed,

    /// madvise failed
    #[error("memory advise failed")]
    AdviseFailed,

    /// Requested stack is smaller than the supported minimum
    #[error("stack size {size} is below the minimum of {min}")]
    InvalidSize { size: usize, min: usize },
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    InvalidValue(&'static str),
}

/// Error returned by `send` on a closed channel; hands the value back
#[derive(Clone, PartialEq, Eq, Error)]
#[error("send on closed channel")]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError { .. }")
    }
}

/// Error returned by `try_send`
#[derive(Clone, PartialEq, Eq, Error)]
pub enum TrySendError<T> {
    /// Buffer full and no receiver waiting
    #[error("channel full")]
    Full(T),

    /// Channel has been closed
    #[error("send on closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) | TrySendError::Closed(v) => v,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        matches!(self, TrySendError::Full(_))
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, TrySendError::Closed(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Error returned by `try_recv`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// Nothing buffered and no sender waiting
    #[error("channel empty")]
    Empty,

    /// Channel closed and fully drained
    #[error("channel closed")]
    Closed,
}
