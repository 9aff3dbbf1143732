//! Debug fills for fresh and freed memory.

use core::ptr::write_bytes;

use alloc_contract::{Alloc, Block, DeallocateAll, Owns};

/// Fills every allocated block with `ALLOC_PATTERN` and every block about to
/// be freed with `DEALLOC_PATTERN`.
///
/// Purely observational: routing, sizes and ownership are the inner
/// allocator's, untouched. Reads of `0xAA...` or `0xFF...` in a debugger
/// then point at uninitialized or dangling data respectively.
pub struct Stamp<A, const ALLOC_PATTERN: u8 = 0xAA, const DEALLOC_PATTERN: u8 = 0xFF> {
    parent: A,
}

impl<A: Alloc, const ALLOC_PATTERN: u8, const DEALLOC_PATTERN: u8>
    Stamp<A, ALLOC_PATTERN, DEALLOC_PATTERN>
{
    /// Wrap `parent` so its blocks are pattern-filled.
    pub const fn new(parent: A) -> Self {
        Stamp { parent }
    }

    /// The allocator doing the actual work.
    pub fn parent(&self) -> &A {
        &self.parent
    }
}

// SAFETY: all guarantees are the parent's; the fills stay within the
// parent-provided block sizes.
unsafe impl<A: Alloc, const ALLOC_PATTERN: u8, const DEALLOC_PATTERN: u8> Alloc
    for Stamp<A, ALLOC_PATTERN, DEALLOC_PATTERN>
{
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        let block = self.parent.allocate(size);
        if !block.is_null() {
            // SAFETY: the parent guarantees `block.size` writable bytes.
            unsafe { write_bytes(block.ptr, ALLOC_PATTERN, block.size) };
        }
        block
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if !block.is_null() {
            write_bytes(block.ptr, DEALLOC_PATTERN, block.size);
        }
        self.parent.deallocate(block);
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        self.parent.reallocate(block, new_size)
    }
}

impl<A: Alloc + Owns, const ALLOC_PATTERN: u8, const DEALLOC_PATTERN: u8> Owns
    for Stamp<A, ALLOC_PATTERN, DEALLOC_PATTERN>
{
    fn owns(&self, block: &Block) -> bool {
        self.parent.owns(block)
    }
}

impl<A: Alloc + DeallocateAll, const ALLOC_PATTERN: u8, const DEALLOC_PATTERN: u8> DeallocateAll
    for Stamp<A, ALLOC_PATTERN, DEALLOC_PATTERN>
{
    unsafe fn deallocate_all(&self) {
        self.parent.deallocate_all();
    }
}

impl<A: Alloc + Default, const ALLOC_PATTERN: u8, const DEALLOC_PATTERN: u8> Default
    for Stamp<A, ALLOC_PATTERN, DEALLOC_PATTERN>
{
    fn default() -> Self {
        Self::new(A::default())
    }
}
