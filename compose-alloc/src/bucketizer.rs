//! Fanning out over per-size-class allocators.

use core::marker::PhantomData;

use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{Alloc, Block, DeallocateAll, Owns};

use crate::range::RangeRaider;

/// `K` allocators, one per bucket of the range raider `R`.
///
/// Each request is routed to the bucket covering its size; requests outside
/// `[R::MIN, R::MAX]` fail outright. A reallocation landing in a different
/// bucket moves the block between the two bucket allocators.
///
/// `K` must equal `R::NUM_STEPS`; the constructor checks this. The buckets
/// are built by a factory receiving each bucket's inclusive size range,
/// which is how dynamically ranged freelists become size classes:
///
/// ```rust
/// use compose_alloc::{Bucketizer, Freelist, LinearRaider, Mallocator, DYNAMIC};
/// use alloc_contract::Alloc;
///
/// type Bucket = Freelist<Mallocator, DYNAMIC, DYNAMIC, 8, 4>;
/// type ByClass = Bucketizer<Bucket, LinearRaider<32, 96, 16>, 4>;
///
/// let classes = ByClass::new(|lo, hi| Freelist::with_limits(Mallocator, lo, hi));
/// let block = classes.allocate(40);
/// assert_eq!(block.size, 48);
/// # let mut block = block;
/// # unsafe { classes.deallocate(&mut block) };
/// ```
pub struct Bucketizer<A, R, const K: usize> {
    buckets: [A; K],
    raider: PhantomData<R>,
}

impl<A: Alloc, R: RangeRaider, const K: usize> Bucketizer<A, R, K> {
    /// Build the buckets. `make` is called once per bucket with the
    /// inclusive `[lo, hi]` sub-range that bucket covers, in ascending
    /// order.
    pub fn new(mut make: impl FnMut(usize, usize) -> A) -> Self {
        assert!(
            K == R::NUM_STEPS,
            "the bucket count must match the raider's step count"
        );
        let mut lower = R::MIN;
        let buckets = core::array::from_fn(|index| {
            let step = R::step_size(index);
            let lo = lower + usize::from(index > 0);
            let hi = lower + step;
            lower += step;
            make(lo, hi)
        });
        Bucketizer {
            buckets,
            raider: PhantomData,
        }
    }

    /// The bucket allocators, ascending by size class.
    pub fn buckets(&self) -> &[A; K] {
        &self.buckets
    }

    fn bucket_for(&self, size: usize) -> Option<&A> {
        R::step_index(size).map(|index| &self.buckets[index])
    }
}

// SAFETY: a block is produced by exactly one bucket, and the size recorded
// in the handle routes it back to that bucket.
unsafe impl<A: Alloc, R: RangeRaider, const K: usize> Alloc for Bucketizer<A, R, K> {
    const ALIGNMENT: usize = A::ALIGNMENT;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::null();
        }
        match self.bucket_for(size) {
            Some(bucket) => bucket.allocate(size),
            None => Block::null(),
        }
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_null() {
            return;
        }
        // A block whose size is out of range never came from a bucket and is
        // silently ignored.
        if let Some(bucket) = self.bucket_for(block.size) {
            bucket.deallocate(block);
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }

        let (old_index, new_index) = match (R::step_index(block.size), R::step_index(new_size)) {
            (Some(old_index), Some(new_index)) => (old_index, new_index),
            // Out of range on either end: nothing here can serve it.
            _ => return false,
        };

        if old_index == new_index {
            return self.buckets[new_index].reallocate(block, new_size);
        }

        reallocate_and_copy(
            &self.buckets[old_index],
            &self.buckets[new_index],
            block,
            new_size,
        )
    }
}

impl<A: Alloc + Owns, R: RangeRaider, const K: usize> Owns for Bucketizer<A, R, K> {
    fn owns(&self, block: &Block) -> bool {
        match self.bucket_for(block.size) {
            Some(bucket) => bucket.owns(block),
            None => false,
        }
    }
}

impl<A: Alloc + DeallocateAll, R: RangeRaider, const K: usize> DeallocateAll
    for Bucketizer<A, R, K>
{
    unsafe fn deallocate_all(&self) {
        for bucket in &self.buckets {
            bucket.deallocate_all();
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::freelist::Freelist;
    use crate::range::{LinearRaider, Pow2Raider};
    use crate::system::Mallocator;
    use crate::DYNAMIC;

    type Bucket = Freelist<Mallocator, DYNAMIC, DYNAMIC, 8, 2>;
    type ByClass = Bucketizer<Bucket, LinearRaider<32, 96, 16>, 4>;

    fn by_class() -> ByClass {
        ByClass::new(|lo, hi| Freelist::with_limits(Mallocator, lo, hi))
    }

    #[test]
    fn bucket_ranges_ascend() {
        let classes = by_class();
        let limits: [usize; 4] = core::array::from_fn(|i| classes.buckets()[i].max_size());
        assert_eq!(limits, [48, 64, 80, 96]);
    }

    #[test]
    fn routes_to_the_covering_bucket() {
        let classes = by_class();

        let mut a = classes.allocate(32);
        assert_eq!(a.size, 48);
        let mut b = classes.allocate(50);
        assert_eq!(b.size, 64);
        let mut c = classes.allocate(96);
        assert_eq!(c.size, 96);

        unsafe {
            classes.deallocate(&mut a);
            classes.deallocate(&mut b);
            classes.deallocate(&mut c);
        }
    }

    #[test]
    fn out_of_range_fails() {
        let classes = by_class();
        assert!(classes.allocate(31).is_null());
        assert!(classes.allocate(97).is_null());

        let mut block = classes.allocate(40);
        assert!(!unsafe { classes.reallocate(&mut block, 128) });
        assert_eq!(block.size, 48);
        unsafe { classes.deallocate(&mut block) };
    }

    #[test]
    fn cross_bucket_reallocation_moves() {
        let classes = by_class();

        let mut block = classes.allocate(40);
        unsafe { block.ptr.write(3) };

        assert!(unsafe { classes.reallocate(&mut block, 90) });
        assert_eq!(block.size, 96);
        assert_eq!(unsafe { block.ptr.read() }, 3);
        unsafe { classes.deallocate(&mut block) };
    }

    #[test]
    fn pow2_partition() {
        type Doubling = Bucketizer<Bucket, Pow2Raider<32, 128>, 2>;
        let classes = Doubling::new(|lo, hi| Freelist::with_limits(Mallocator, lo, hi));

        let limits: [usize; 2] = core::array::from_fn(|i| classes.buckets()[i].max_size());
        assert_eq!(limits, [64, 128]);

        let mut block = classes.allocate(32);
        assert_eq!(block.size, 64);
        unsafe { classes.deallocate(&mut block) };
    }
}
