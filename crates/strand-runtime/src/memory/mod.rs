//! Coroutine stacks
//!
//! A [`Stack`] owns one contiguous region; the coroutine runs from its top
//! downwards. Mapped stacks may carry a `PROT_NONE` guard region at the
//! low end so an overflow faults instead of silently corrupting the
//! neighbouring allocation.
//!
//! Allocation goes through a [`StackAllocator`]; a [`StackCache`] keeps
//! released stacks around for the next spawn.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::MmapStackAllocator;
    } else {
        compile_error!("strand requires a unix host");
    }
}

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use strand_core::constants::MIN_STACK_SIZE;
use strand_core::{kdebug, MemoryError, RuntimeResult};

use crate::config::{RuntimeConfig, StackAllocatorKind};

enum Origin {
    Mapped,
    Heap(Layout),
}

/// An owned coroutine stack
pub struct Stack {
    base: NonNull<u8>,
    len: usize,
    guard: usize,
    origin: Origin,
}

// Safety: the region is exclusively owned by this value
unsafe impl Send for Stack {}

impl Stack {
    /// Highest address of the stack (exclusive); execution starts below it
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: len is the size of the owned region
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Lowest usable address, just above the guard
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    /// Usable bytes, excluding the guard region
    #[inline]
    pub fn size(&self) -> usize {
        self.len - self.guard
    }

    #[inline]
    pub fn has_guard(&self) -> bool {
        self.guard > 0
    }

    /// Whether `addr` lies inside the usable part of this stack
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom() as usize && addr <= self.top() as usize
    }

    /// Hand the physical pages back to the kernel, keeping the mapping
    fn release_pages(&self) -> RuntimeResult<()> {
        match self.origin {
            Origin::Mapped => unix::discard(self.bottom(), self.size()),
            Origin::Heap(_) => Ok(()),
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        match self.origin {
            Origin::Mapped => unix::unmap(self.base, self.len),
            // Safety: allocated in HeapStackAllocator with this layout
            Origin::Heap(layout) => unsafe { alloc::dealloc(self.base.as_ptr(), layout) },
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("size", &self.size())
            .field("guard", &self.guard)
            .finish()
    }
}

/// Source of coroutine stacks
pub trait StackAllocator {
    /// Allocate a stack with at least `size` usable bytes
    fn allocate(&self, size: usize) -> RuntimeResult<Stack>;

    fn name(&self) -> &'static str;
}

/// Stacks from the global allocator
///
/// No guard region; useful where mmap is restricted or under tools that
/// track heap memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStackAllocator;

impl StackAllocator for HeapStackAllocator {
    fn allocate(&self, size: usize) -> RuntimeResult<Stack> {
        check_size(size)?;
        let layout = Layout::from_size_align(size, 16)
            .map_err(|_| MemoryError::AllocationFailed { size })?;
        // Safety: layout has non-zero size
        let ptr = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or(MemoryError::AllocationFailed { size })?;
        Ok(Stack { base, len: size, guard: 0, origin: Origin::Heap(layout) })
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}

fn check_size(size: usize) -> RuntimeResult<()> {
    if size < MIN_STACK_SIZE {
        return Err(MemoryError::InvalidSize { size, min: MIN_STACK_SIZE }.into());
    }
    Ok(())
}

/// Build the allocator selected by `config`
pub fn allocator_for(config: &RuntimeConfig) -> Box<dyn StackAllocator> {
    match config.stack_allocator {
        StackAllocatorKind::Mmap => Box::new(MmapStackAllocator::new(config.guard_pages)),
        StackAllocatorKind::Heap => Box::new(HeapStackAllocator),
    }
}

/// Bounded free list of released stacks
///
/// Only stacks close to the requested size are reused. Pages of
/// cached mapped stacks are discarded on the way in, so an idle cache costs
/// address space but not resident memory.
pub struct StackCache {
    stacks: Vec<Stack>,
    limit: usize,
}

impl StackCache {
    pub fn new(limit: usize) -> Self {
        Self { stacks: Vec::with_capacity(limit.min(64)), limit }
    }

    /// Take a cached stack with at least `size` usable bytes
    ///
    /// Allocators round sizes up to whole pages, so a stack is a match when
    /// it exceeds the request by less than the minimum stack size.
    pub fn take(&mut self, size: usize) -> Option<Stack> {
        let idx = self
            .stacks
            .iter()
            .rposition(|s| s.size() >= size && s.size() - size < MIN_STACK_SIZE)?;
        Some(self.stacks.swap_remove(idx))
    }

    /// Offer a stack back; it is dropped if the cache is full
    pub fn put(&mut self, stack: Stack) {
        if self.stacks.len() >= self.limit {
            return;
        }
        if let Err(e) = stack.release_pages() {
            kdebug!("dropping stack instead of caching it: {}", e);
            return;
        }
        self.stacks.push(stack);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}
