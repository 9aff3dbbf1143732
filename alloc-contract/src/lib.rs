//! The uniform contract shared by every composable block allocator.
//!
//! An allocator hands out [`Block`] handles: a raw pointer paired with the
//! usable size of the allocation. The same handle must be returned to
//! [`deallocate`] or [`reallocate`] unchanged, which is what lets leaf
//! allocators skip per-allocation metadata entirely. Combinators wrap one or
//! more inner allocators and re-expose the same three methods, so a stack of
//! combinators is itself an allocator.
//!
//! The crate contains no allocator implementations, only the contract and the
//! pieces every implementation shares:
//!
//! * [`Block`] and the size/alignment arithmetic around it,
//! * the [`Alloc`], [`Owns`] and [`DeallocateAll`] traits,
//! * the universal reallocation protocol ([`reallocate_common`] and
//!   [`reallocate_and_copy`]),
//! * byte-size helpers ([`units`]) and power-of-two helpers ([`bits`]).
//!
//! [`deallocate`]: Alloc::deallocate
//! [`reallocate`]: Alloc::reallocate
//! [`reallocate_common`]: realloc::reallocate_common
//! [`reallocate_and_copy`]: realloc::reallocate_and_copy

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

pub mod bits;
mod block;
pub mod realloc;
pub mod units;

pub use block::{is_aligned, round_to_alignment, Block};

/// An allocator of raw memory blocks.
///
/// # Safety
///
/// Implementations promise that every non-null block returned from
/// [`allocate`] points to `block.size` bytes of memory that are valid for
/// reads and writes, exclusive to the caller until the block is passed back
/// to [`deallocate`], with `block.size` at least the requested size and
/// `block.ptr` aligned to [`ALIGNMENT`]. Wrappers rely on these guarantees
/// when they write bookkeeping data into blocks they obtained from an inner
/// allocator.
///
/// An implementation that sets [`SUPPORTS_TRUNCATED_DEALLOCATION`]
/// additionally promises that a block of `n * k` bytes may be carved into
/// `k` blocks of `n` bytes and each slice deallocated individually. Only
/// allocators that keep no per-block bookkeeping (bump allocators) can
/// honor this.
///
/// [`allocate`]: Self::allocate
/// [`deallocate`]: Self::deallocate
/// [`ALIGNMENT`]: Self::ALIGNMENT
/// [`SUPPORTS_TRUNCATED_DEALLOCATION`]: Self::SUPPORTS_TRUNCATED_DEALLOCATION
pub unsafe trait Alloc {
    /// Every block this allocator hands out has a pointer aligned to this
    /// value and a size rounded up to a multiple of it.
    const ALIGNMENT: usize;

    /// Whether a block may be deallocated in slices smaller than it was
    /// allocated. See the trait-level safety notes.
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = false;

    /// Allocate at least `size` bytes.
    ///
    /// Returns the [null block](Block::null) when the allocator is exhausted
    /// or when `size` is zero. Never panics on exhaustion.
    fn allocate(&self, size: usize) -> Block;

    /// Release a block previously returned by [`allocate`](Self::allocate).
    ///
    /// Passing the null block is a no-op. Allocators that cannot release
    /// individual blocks (bump allocators below their top) silently accept
    /// the call.
    ///
    /// # Safety
    ///
    /// `block` must be exactly a handle this allocator returned and not yet
    /// deallocated, or the null block. Routing combinators must check
    /// [`Owns::owns`] before forwarding a block to an inner allocator.
    unsafe fn deallocate(&self, block: &mut Block);

    /// Resize `block` to at least `new_size` bytes, in place when possible.
    ///
    /// On success the handle is updated (possibly with a new pointer) and
    /// `true` is returned. On failure the handle is untouched and `false` is
    /// returned. Resizing to zero deallocates and nulls the handle.
    ///
    /// # Safety
    ///
    /// Same requirements as [`deallocate`](Self::deallocate).
    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool;
}

/// Allocators that can tell whether a block came from them.
///
/// Routing combinators (fallback, cascading) require this of their inner
/// allocators to send each block back to the allocator actually holding it.
pub trait Owns: Alloc {
    /// Does `block` belong to this allocator?
    ///
    /// True for every non-null block this allocator returned and that has
    /// not been deallocated since.
    fn owns(&self, block: &Block) -> bool;
}

/// Allocators that can release all outstanding blocks at once.
pub trait DeallocateAll: Alloc {
    /// Release every outstanding block and return to the empty state.
    ///
    /// # Safety
    ///
    /// Every block previously returned by this allocator is invalidated,
    /// whether or not the caller still holds its handle.
    unsafe fn deallocate_all(&self);
}
