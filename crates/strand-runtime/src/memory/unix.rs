//! mmap-backed stacks

use std::ptr::{self, NonNull};

use nix::errno::Errno;
use strand_core::constants::GUARD_SIZE;
use strand_core::{kwarn, MemoryError, RuntimeResult};

use super::{check_size, Origin, Stack, StackAllocator};

/// Allocates each stack as a private anonymous mapping
///
/// With `guard_pages` enabled one page below the stack is left
/// `PROT_NONE`. Pages are committed on first touch.
#[derive(Debug, Clone, Copy)]
pub struct MmapStackAllocator {
    guard_pages: bool,
    page_size: usize,
}

impl MmapStackAllocator {
    pub fn new(guard_pages: bool) -> Self {
        Self { guard_pages, page_size: page_size() }
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl StackAllocator for MmapStackAllocator {
    fn allocate(&self, size: usize) -> RuntimeResult<Stack> {
        check_size(size)?;

        let guard = if self.guard_pages { self.page_size } else { 0 };
        let len = round_up(size, self.page_size)
            .and_then(|usable| usable.checked_add(guard))
            .ok_or(MemoryError::AllocationFailed { size })?;

        #[cfg(target_os = "linux")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_STACK;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

        // Safety: anonymous mapping, no existing memory touched
        let addr = unsafe {
            libc::mmap(ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, flags, -1, 0)
        };
        if addr == libc::MAP_FAILED {
            kwarn!("mmap of {} byte stack failed: {}", len, Errno::last());
            return Err(MemoryError::AllocationFailed { size: len }.into());
        }
        let base = NonNull::new(addr as *mut u8).ok_or(MemoryError::AllocationFailed { size: len })?;

        if guard > 0 {
            // Safety: first page of the mapping we just created
            let rc = unsafe { libc::mprotect(addr, guard, libc::PROT_NONE) };
            if rc != 0 {
                unmap(base, len);
                return Err(MemoryError::ProtectionFailed.into());
            }
        }

        Ok(Stack { base, len, guard, origin: Origin::Mapped })
    }

    fn name(&self) -> &'static str {
        "mmap"
    }
}

pub(super) fn unmap(base: NonNull<u8>, len: usize) {
    // Safety: caller owns the whole mapping
    let rc = unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, len) };
    if rc != 0 {
        kwarn!("munmap({:p}, {}) failed: {}", base, len, Errno::last());
    }
}

/// Drop the physical pages behind `[addr, addr + len)`
pub(super) fn discard(addr: *mut u8, len: usize) -> RuntimeResult<()> {
    // Safety: range is inside a live mapping owned by the caller
    let rc = unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_DONTNEED) };
    Errno::result(rc).map_err(|_| MemoryError::AdviseFailed)?;
    Ok(())
}

fn page_size() -> usize {
    // Safety: sysconf has no preconditions
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        GUARD_SIZE
    }
}

/// `None` when the rounded size does not fit in `usize`
#[inline]
fn round_up(n: usize, align: usize) -> Option<usize> {
    Some(n.checked_add(align - 1)? / align * align)
}
