//! AArch64 context switch (AAPCS64)
//!
//! Saves `x19`-`x28`, the frame pointer, the link register, `sp`, the low
//! halves of `v8`-`v15` and `fpcr`.

use std::arch::naked_asm;

use super::EntryFn;

#[repr(C)]
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    pub x: [u64; 10], // x19..x28, 0x00
    pub fp: u64,      // x29, 0x50
    pub lr: u64,      // x30, 0x58
    pub sp: u64,      // 0x60
    pub d: [u64; 8],  // d8..d15, 0x68
    pub fpcr: u64,    // 0xA8
}

impl ExecutionContext {
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

/// # Safety
///
/// Same contract as the x86_64 version: a writable stack ending at
/// `stack_top` and an `entry` that never returns.
pub unsafe fn init_context(ctx: &mut ExecutionContext, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let sp = ((stack_top as usize) & !0xF) - 16;
    core::ptr::write_bytes(sp as *mut u8, 0, 16);

    *ctx = ExecutionContext::default();
    ctx.sp = sp as u64;
    ctx.lr = entry_trampoline as usize as u64;
    ctx.x[0] = entry as usize as u64; // x19
    ctx.x[1] = arg as u64; // x20
}

#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// # Safety
///
/// See the x86_64 `switch_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_from: *mut ExecutionContext, _to: *const ExecutionContext) {
    naked_asm!(
        // save into `from` (x0)
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "mrs x10, fpcr",
        "str x10, [x0, #0xa8]",
        // load from `to` (x1)
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ldr x10, [x1, #0xa8]",
        "msr fpcr, x10",
        "ret",
    );
}
