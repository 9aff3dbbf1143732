//! Splitting traffic at a size threshold.

use alloc_contract::bits::const_max;
use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{Alloc, Block, DeallocateAll, Owns};

/// Routes requests of up to `THRESHOLD` bytes to `Small` and everything
/// larger to `Large`.
///
/// Routing is by size, never by pointer: since every allocator preserves the
/// size recorded in the handle, the allocator picked at allocation time is
/// found again at deallocation time. A reallocation crossing the threshold
/// moves the block to the other side.
pub struct Segregator<const THRESHOLD: usize, Small, Large> {
    small: Small,
    large: Large,
}

impl<const THRESHOLD: usize, Small, Large> Segregator<THRESHOLD, Small, Large> {
    /// Compose the two sides.
    pub const fn new(small: Small, large: Large) -> Self {
        Segregator { small, large }
    }

    /// The allocator serving requests of up to `THRESHOLD` bytes.
    pub fn small(&self) -> &Small {
        &self.small
    }

    /// The allocator serving requests above `THRESHOLD` bytes.
    pub fn large(&self) -> &Large {
        &self.large
    }
}

// SAFETY: every block is produced by exactly one side and the size-based
// routing sends it back to that side.
unsafe impl<const THRESHOLD: usize, Small, Large> Alloc for Segregator<THRESHOLD, Small, Large>
where
    Small: Alloc,
    Large: Alloc,
{
    const ALIGNMENT: usize = const_max(Small::ALIGNMENT, Large::ALIGNMENT);

    fn allocate(&self, size: usize) -> Block {
        if size <= THRESHOLD {
            self.small.allocate(size)
        } else {
            self.large.allocate(size)
        }
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.size <= THRESHOLD {
            self.small.deallocate(block)
        } else {
            self.large.deallocate(block)
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }

        if block.size <= THRESHOLD {
            if new_size <= THRESHOLD {
                return self.small.reallocate(block, new_size);
            }
            // Growing across the threshold: move over to the large side.
            return reallocate_and_copy(&self.small, &self.large, block, new_size);
        }

        if new_size <= THRESHOLD {
            // Shrinking across the threshold: move over to the small side.
            return reallocate_and_copy(&self.large, &self.small, block, new_size);
        }

        self.large.reallocate(block, new_size)
    }
}

impl<const THRESHOLD: usize, Small, Large> Owns for Segregator<THRESHOLD, Small, Large>
where
    Small: Alloc + Owns,
    Large: Alloc + Owns,
{
    fn owns(&self, block: &Block) -> bool {
        if block.size <= THRESHOLD {
            self.small.owns(block)
        } else {
            self.large.owns(block)
        }
    }
}

impl<const THRESHOLD: usize, Small, Large> DeallocateAll for Segregator<THRESHOLD, Small, Large>
where
    Small: Alloc + DeallocateAll,
    Large: Alloc + DeallocateAll,
{
    unsafe fn deallocate_all(&self) {
        self.small.deallocate_all();
        self.large.deallocate_all();
    }
}

impl<const THRESHOLD: usize, Small, Large> Default for Segregator<THRESHOLD, Small, Large>
where
    Small: Default,
    Large: Default,
{
    fn default() -> Self {
        Self::new(Small::default(), Large::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::StackLinear;

    type Split = Segregator<64, StackLinear<128>, StackLinear<512>>;

    #[test]
    fn routes_by_size() {
        let split: Split = Default::default();

        let small = split.allocate(32);
        let large = split.allocate(200);
        assert!(split.small().owns(&small));
        assert!(split.large().owns(&large));
        assert!(split.owns(&small) && split.owns(&large));
    }

    #[test]
    fn deallocation_finds_its_side() {
        let split: Split = Default::default();

        let mut small = split.allocate(32);
        unsafe { split.deallocate(&mut small) };
        assert_eq!(split.small().remaining(), 128);
    }

    #[test]
    fn crossing_reallocation_moves_the_block() {
        let split: Split = Default::default();

        let mut block = split.allocate(32);
        unsafe { block.ptr.write(7) };

        assert!(unsafe { split.reallocate(&mut block, 200) });
        assert!(split.large().owns(&block));
        assert!(!split.small().owns(&block));
        assert_eq!(unsafe { block.ptr.read() }, 7);
        // The old region went back to the small side.
        assert_eq!(split.small().remaining(), 128);
    }

    #[test]
    fn threshold_is_inclusive() {
        let split: Split = Default::default();

        let edge = split.allocate(64);
        assert!(split.small().owns(&edge));
        let above = split.allocate(65);
        assert!(split.large().owns(&above));
    }
}
