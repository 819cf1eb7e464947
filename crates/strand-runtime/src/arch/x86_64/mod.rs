//! x86_64 context switch (System V AMD64)
//!
//! Only callee-saved state is stored: `rsp`, the resume address, `rbx`,
//! `rbp`, `r12`-`r15`, the SSE control/status word and the x87 control
//! word. Everything else is caller-saved and already spilled by the
//! compiler around the call to [`switch_context`].

use std::arch::naked_asm;

use super::EntryFn;

/// Saved register state of a suspended execution context
///
/// Field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    pub rsp: u64,   // 0x00
    pub rip: u64,   // 0x08
    pub rbx: u64,   // 0x10
    pub rbp: u64,   // 0x18
    pub r12: u64,   // 0x20
    pub r13: u64,   // 0x28
    pub r14: u64,   // 0x30
    pub r15: u64,   // 0x38
    pub mxcsr: u32, // 0x40
    pub fpucw: u16, // 0x44
    _pad: u16,
}

/// Power-on MXCSR: all exceptions masked, round to nearest
const DEFAULT_MXCSR: u32 = 0x1F80;
/// Power-on x87 control word: extended precision, all exceptions masked
const DEFAULT_FPUCW: u16 = 0x037F;

impl ExecutionContext {
    /// Stack pointer recorded at the last switch away from this context
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

/// Prepare `ctx` so the first switch into it calls `entry(arg)` on the
/// stack ending at `stack_top`
///
/// # Safety
///
/// `stack_top` must be the high end of a writable region large enough to
/// run `entry`. `entry` must never return.
pub unsafe fn init_context(ctx: &mut ExecutionContext, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // 16-byte aligned at the trampoline's `call`, with a zeroed slot above
    // it so unwinders see a terminated frame chain.
    let top = (stack_top as usize) & !0xF;
    let sp = top - 16;
    core::ptr::write_bytes(sp as *mut u8, 0, 16);

    *ctx = ExecutionContext::default();
    ctx.rsp = sp as u64;
    ctx.rip = entry_trampoline as usize as u64;
    ctx.r12 = entry as usize as u64;
    ctx.r13 = arg as u64;
    ctx.mxcsr = DEFAULT_MXCSR;
    ctx.fpucw = DEFAULT_FPUCW;
}

/// First code run on a fresh coroutine stack
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry functions never return
        "ud2",
    );
}

/// Save the current context into `from` and resume `to`
///
/// Returns when some other context switches back into `from`.
///
/// # Safety
///
/// `from` must be writable and `to` must hold a context produced by
/// [`init_context`] or by a previous `switch_context` whose stack is still
/// alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_from: *mut ExecutionContext, _to: *const ExecutionContext) {
    naked_asm!(
        // save into `from` (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr dword ptr [rdi + 0x40]",
        "fnstcw word ptr [rdi + 0x44]",
        // load from `to` (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr dword ptr [rsi + 0x40]",
        "fldcw word ptr [rsi + 0x44]",
        "jmp qword ptr [rsi + 0x08]",
        // resumed here by a later switch back into `from`
        "2:",
        "ret",
    );
}
