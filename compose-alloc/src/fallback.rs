//! A primary allocator with a safety net.

use alloc_contract::bits::const_max;
use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{Alloc, Block, DeallocateAll, Owns};

/// Tries `Primary` first and falls back to `Secondary` when it is exhausted.
///
/// The primary must implement [`Owns`] so that deallocations and
/// reallocations can be routed back to whichever side produced the block.
/// The classic composition is a fast fixed arena in front of the system
/// heap:
///
/// ```rust
/// use compose_alloc::{FallbackAllocator, Mallocator, StackLinear};
/// use alloc_contract::Alloc;
///
/// let arena: FallbackAllocator<StackLinear<128>, Mallocator> = Default::default();
///
/// let fast = arena.allocate(64);     // served by the stack buffer
/// let spilled = arena.allocate(512); // too big, served by the heap
/// # let (mut fast, mut spilled) = (fast, spilled);
/// # unsafe { arena.deallocate(&mut spilled) };
/// ```
pub struct FallbackAllocator<Primary, Secondary> {
    primary: Primary,
    secondary: Secondary,
}

impl<Primary, Secondary> FallbackAllocator<Primary, Secondary> {
    /// Compose the two allocators.
    pub const fn new(primary: Primary, secondary: Secondary) -> Self {
        FallbackAllocator { primary, secondary }
    }

    /// The allocator tried first.
    pub fn primary(&self) -> &Primary {
        &self.primary
    }

    /// The allocator used when the primary is exhausted.
    pub fn secondary(&self) -> &Secondary {
        &self.secondary
    }
}

// SAFETY: each block comes from exactly one side, and `Primary::owns`
// decides which one gets it back.
unsafe impl<Primary, Secondary> Alloc for FallbackAllocator<Primary, Secondary>
where
    Primary: Alloc + Owns,
    Secondary: Alloc,
{
    const ALIGNMENT: usize = const_max(Primary::ALIGNMENT, Secondary::ALIGNMENT);

    fn allocate(&self, size: usize) -> Block {
        let block = self.primary.allocate(size);
        if block.is_null() {
            return self.secondary.allocate(size);
        }
        block
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if self.primary.owns(block) {
            self.primary.deallocate(block)
        } else {
            self.secondary.deallocate(block)
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }

        if self.primary.owns(block) {
            if self.primary.reallocate(block, new_size) {
                return true;
            }
            // The primary is out of room: move the block into the composite,
            // which lands it in the primary again if possible and in the
            // secondary otherwise.
            return reallocate_and_copy(&self.primary, self, block, new_size);
        }

        self.secondary.reallocate(block, new_size)
    }
}

impl<Primary, Secondary> Owns for FallbackAllocator<Primary, Secondary>
where
    Primary: Alloc + Owns,
    Secondary: Alloc + Owns,
{
    fn owns(&self, block: &Block) -> bool {
        self.primary.owns(block) || self.secondary.owns(block)
    }
}

impl<Primary, Secondary> DeallocateAll for FallbackAllocator<Primary, Secondary>
where
    Primary: Alloc + Owns + DeallocateAll,
    Secondary: Alloc + DeallocateAll,
{
    unsafe fn deallocate_all(&self) {
        self.primary.deallocate_all();
        self.secondary.deallocate_all();
    }
}

impl<Primary, Secondary> Default for FallbackAllocator<Primary, Secondary>
where
    Primary: Default,
    Secondary: Default,
{
    fn default() -> Self {
        Self::new(Primary::default(), Secondary::default())
    }
}
