//! Architecture-specific context switching
//!
//! Each backend provides the same three items:
//!
//! - `ExecutionContext` - saved callee-saved registers, stack pointer and
//!   resume address
//! - `init_context` - prime a context to start at an entry function
//! - `switch_context` - save the current context and jump to another

/// Function a fresh context starts in. It receives the `arg` given to
/// `init_context` and must never return.
pub type EntryFn = unsafe extern "C" fn(usize) -> !;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{ExecutionContext, init_context, switch_context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{ExecutionContext, init_context, switch_context};
    } else {
        compile_error!("strand supports x86_64 and aarch64 only");
    }
}
