//! The allocator that allocates nothing.

use alloc_contract::realloc::reallocate_common;
use alloc_contract::{Alloc, Block, DeallocateAll, Owns};

/// An allocator accepting only empty allocations.
///
/// Every request fails, only the null block is owned, and deallocating
/// anything else trips a debug assertion. Useful as the identity element of
/// a composition, e.g. as the small side of a segregator that should reject
/// small requests outright.
#[derive(Default)]
pub struct NullAllocator;

// SAFETY: no memory is ever handed out.
unsafe impl Alloc for NullAllocator {
    const ALIGNMENT: usize = 8;

    fn allocate(&self, _size: usize) -> Block {
        Block::null()
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        debug_assert!(
            block.is_null(),
            "a non-null block cannot have come from the null allocator"
        );
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        reallocate_common(self, block, new_size).unwrap_or(false)
    }
}

impl Owns for NullAllocator {
    fn owns(&self, block: &Block) -> bool {
        block.is_null()
    }
}

impl DeallocateAll for NullAllocator {
    unsafe fn deallocate_all(&self) {}
}
