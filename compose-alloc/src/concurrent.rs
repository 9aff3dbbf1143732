//! The lock-free variant of the linear allocator.
//!
//! Layout and semantics match [`LinearAllocator`](crate::LinearAllocator),
//! with the consumed-bytes cursor held in an atomic. Every operation is a
//! compare-and-swap loop: a retry only happens when another thread moved the
//! cursor in between, so each loop either succeeds, observes exhaustion, or
//! observes that the block it wanted to rewind is no longer on top.
//!
//! The buffer must exist before the allocator is shared; the concurrent
//! variant never performs the lazy first-touch initialization of its
//! single-threaded sibling. With a provider whose buffer is still pending,
//! every allocation reports exhaustion.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc_contract::bits::is_pow2;
use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{round_to_alignment, Alloc, Block, DeallocateAll, Owns};

use crate::buffer::BufferProvider;
use crate::linear::align_shift;

/// A bump allocator whose cursor is safe to advance from many threads.
///
/// The ordering used is `SeqCst` throughout, enforcing a single global
/// sequence of cursor movements. Allocations are totally ordered by the
/// cursor's advance; a deallocation only takes effect when it still observes
/// its block as the topmost one.
///
/// ## Usage as a global allocator
///
/// The allocator is `const`-constructible and `Sync`, so it can back a
/// `static`:
///
/// ```rust
/// use alloc_contract::Alloc;
/// use compose_alloc::{buffer::StackBuffer, ConcurrentLinear};
///
/// static ARENA: ConcurrentLinear<StackBuffer<1024>> =
///     ConcurrentLinear::new(StackBuffer::uninit());
///
/// let block = ARENA.allocate(64);
/// assert!(!block.is_null());
/// ```
pub struct ConcurrentLinear<P, const ALIGN: usize = 8> {
    provider: P,
    used: AtomicUsize,
}

// SAFETY: the cursor is only moved through compare-and-swap, so at most one
// thread wins each range of the buffer, and the provider is never written
// after construction (no lazy initialization happens on this type).
unsafe impl<P: BufferProvider, const ALIGN: usize> Sync for ConcurrentLinear<P, ALIGN> {}

impl<P: BufferProvider, const ALIGN: usize> ConcurrentLinear<P, ALIGN> {
    const VALID_ALIGNMENT: () = assert!(is_pow2(ALIGN), "alignment must be a power of two");

    /// Wrap a buffer provider.
    ///
    /// The provider must supply its buffer without lazy initialization; a
    /// pending buffer makes every allocation fail.
    pub const fn new(provider: P) -> Self {
        let () = Self::VALID_ALIGNMENT;
        ConcurrentLinear {
            provider,
            used: AtomicUsize::new(0),
        }
    }

    /// Size of the backing buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.provider.capacity()
    }

    /// Bytes still available for allocation at this instant.
    ///
    /// Under contention the value may be stale by the time the caller acts
    /// on it.
    pub fn remaining(&self) -> usize {
        self.usable()
            .saturating_sub(self.used.load(Ordering::SeqCst))
    }

    fn begin(&self) -> *mut u8 {
        let base = self.provider.as_ptr();
        base.wrapping_add(align_shift(base, ALIGN))
    }

    fn usable(&self) -> usize {
        let base = self.provider.as_ptr();
        if base.is_null() {
            return 0;
        }
        self.provider
            .capacity()
            .saturating_sub(align_shift(base, ALIGN))
    }

    fn is_last_allocated(&self, block: &Block, used: usize) -> bool {
        block.ptr as usize + block.size == self.begin() as usize + used
    }
}

// SAFETY: compare-and-swap hands each winning thread an exclusive, disjoint
// cursor range; size floor and alignment follow from rounding to ALIGN.
unsafe impl<P: BufferProvider, const ALIGN: usize> Alloc for ConcurrentLinear<P, ALIGN> {
    const ALIGNMENT: usize = ALIGN;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::null();
        }
        let aligned_size = round_to_alignment(size, ALIGN);
        let usable = self.usable();

        let mut used = self.used.load(Ordering::SeqCst);
        while aligned_size <= usable.saturating_sub(used) {
            match self.used.compare_exchange(
                used,
                used + aligned_size,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Block::new(self.begin().wrapping_add(used), aligned_size),
                Err(observed) => used = observed,
            }
        }

        // Out of memory.
        Block::null()
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_null() {
            return;
        }
        let mut used = self.used.load(Ordering::SeqCst);
        while self.is_last_allocated(block, used) {
            let rewound = block.ptr as usize - self.begin() as usize;
            match self
                .used
                .compare_exchange(used, rewound, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => used = observed,
            }
        }
        // Another thread allocated on top in the meantime: the block is no
        // longer the last one and stays where it is.
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }

        let aligned_size = round_to_alignment(new_size, ALIGN);
        let offset = block.ptr as usize - self.begin() as usize;

        let mut used = self.used.load(Ordering::SeqCst);
        while self.is_last_allocated(block, used) {
            if aligned_size > self.usable() - offset {
                // Out of memory.
                return false;
            }
            match self.used.compare_exchange(
                used,
                offset + aligned_size,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    block.size = aligned_size;
                    return true;
                }
                Err(observed) => used = observed,
            }
        }

        if block.size >= aligned_size {
            // Same rule as the single-threaded variant: a buried shrink keeps
            // the recorded size so the block remains recognizable as topmost.
            return true;
        }

        reallocate_and_copy(self, self, block, new_size)
    }
}

impl<P: BufferProvider, const ALIGN: usize> Owns for ConcurrentLinear<P, ALIGN> {
    fn owns(&self, block: &Block) -> bool {
        if block.is_null() || self.provider.as_ptr().is_null() {
            return false;
        }
        let addr = block.ptr as usize;
        let begin = self.begin() as usize;
        begin <= addr && addr < begin + self.usable()
    }
}

impl<P: BufferProvider, const ALIGN: usize> DeallocateAll for ConcurrentLinear<P, ALIGN> {
    unsafe fn deallocate_all(&self) {
        self.used.store(0, Ordering::SeqCst);
    }
}

impl<P: BufferProvider + Default, const ALIGN: usize> Default for ConcurrentLinear<P, ALIGN> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

unsafe impl<P: BufferProvider, const ALIGN: usize> GlobalAlloc for ConcurrentLinear<P, ALIGN> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        self.allocate(layout.size()).ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Reconstruct the handle this allocator returned for the layout.
        let mut block = Block::new(ptr, round_to_alignment(layout.size(), ALIGN));
        self.deallocate(&mut block);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let mut block = Block::new(ptr, round_to_alignment(layout.size(), ALIGN));
        if self.reallocate(&mut block, new_size) {
            block.ptr
        } else {
            ptr::null_mut()
        }
    }
}
