//! The reallocation protocol shared by every allocator.
//!
//! Each `reallocate` implementation starts with [`reallocate_common`], which
//! settles the cases that do not depend on the allocator's strategy, and ends
//! with [`reallocate_and_copy`] as the generic move-and-copy fallback.

use crate::{round_to_alignment, Alloc, Block};

/// Handle the reallocation cases common to every allocator.
///
/// Returns `Some(result)` when the request was fully settled here:
///
/// * the rounded `new_size` already equals the block's size — nothing to do,
/// * `new_size` is zero — equivalent to deallocation, the handle is nulled,
/// * the handle is null — equivalent to a fresh allocation, succeeding iff
///   the allocation does.
///
/// Returns `None` when the caller must apply its own strategy.
///
/// # Safety
///
/// `block` must be a handle `allocator` returned (or the null block), per the
/// [`Alloc::deallocate`] requirements.
pub unsafe fn reallocate_common<A: Alloc>(
    allocator: &A,
    block: &mut Block,
    new_size: usize,
) -> Option<bool> {
    if block.size == round_to_alignment(new_size, A::ALIGNMENT) {
        return Some(true);
    }

    if new_size == 0 {
        allocator.deallocate(block);
        *block = Block::null();
        return Some(true);
    }

    if block.is_null() {
        *block = allocator.allocate(new_size);
        return Some(!block.is_null());
    }

    None
}

/// Move `block` into a fresh allocation from `to`, copying its contents.
///
/// On success the old block is returned to `from` and the handle is replaced.
/// On allocation failure the handle is left untouched and `false` is
/// returned.
///
/// # Safety
///
/// `block` must be a non-null handle that `from` returned and that is still
/// outstanding.
pub unsafe fn reallocate_and_copy<Src, Dst>(
    from: &Src,
    to: &Dst,
    block: &mut Block,
    new_size: usize,
) -> bool
where
    Src: Alloc,
    Dst: Alloc,
{
    let new_block = to.allocate(new_size);
    if new_block.is_null() {
        return false;
    }

    copy_block(&new_block, block);
    from.deallocate(block);
    *block = new_block;
    true
}

/// Copy as many bytes as both blocks can hold from `src` to `dst`.
///
/// # Safety
///
/// Both blocks must be live allocations; they must not overlap.
pub unsafe fn copy_block(dst: &Block, src: &Block) {
    core::ptr::copy_nonoverlapping(src.ptr as *const u8, dst.ptr, dst.size.min(src.size));
}
