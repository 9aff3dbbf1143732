//! A cache of freed blocks for one size class.

use core::cell::Cell;
use core::mem::{align_of, size_of};
use core::ptr;

use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{is_aligned, round_to_alignment, Alloc, Block, DeallocateAll, Owns};

use crate::DYNAMIC;

// Written into the first word of every cached block, forming an intrusive
// stack of freed memory.
struct FreeNode {
    next: *mut FreeNode,
}

/// Caches freed blocks whose size falls in `[MIN, MAX]`.
///
/// Requests inside the range are served from the cache when possible and are
/// always sized `MAX`, so any block the cache ever sees can satisfy any
/// in-range request again. Freed in-range blocks are pushed onto an
/// intrusive stack living inside the freed memory itself; the cache holds at
/// most `CAPACITY` blocks and refills `BATCH` at a time when empty.
/// Everything outside the range passes straight through to the parent.
///
/// When the parent supports truncated deallocation, a refill is one
/// `BATCH * MAX` allocation split into `MAX`-sized slices; otherwise it is
/// up to `BATCH` individual requests.
///
/// `MIN` and `MAX` may both be [`DYNAMIC`], in which case the range is given
/// at construction via [`with_limits`](Self::with_limits) — this is how the
/// bucketizer sizes its buckets.
pub struct Freelist<A: Alloc, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize>
{
    parent: A,
    head: Cell<*mut FreeNode>,
    count: Cell<usize>,
    min_size: usize,
    max_size: usize,
}

impl<A: Alloc, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize>
    Freelist<A, MIN, MAX, CAPACITY, BATCH>
{
    const VALID: () = {
        assert!(CAPACITY > 0, "pointless freelist: it can never hold a block");
        assert!(
            BATCH <= CAPACITY,
            "a refill cannot allocate more blocks than the freelist can hold"
        );
        assert!(
            MIN == DYNAMIC || MAX == DYNAMIC || MIN <= MAX,
            "invalid size range"
        );
        assert!(
            MAX == DYNAMIC || MAX >= size_of::<FreeNode>(),
            "the maximum block size must hold at least a pointer"
        );
    };

    /// A cache with the compile-time range `[MIN, MAX]`, starting empty.
    pub fn new(parent: A) -> Self {
        let () = Self::VALID;
        assert!(
            MIN != DYNAMIC && MAX != DYNAMIC,
            "a dynamically ranged freelist must be constructed with `with_limits`"
        );
        debug_assert!(is_aligned(MAX, A::ALIGNMENT));
        Freelist {
            parent,
            head: Cell::new(ptr::null_mut()),
            count: Cell::new(0),
            min_size: MIN,
            max_size: MAX,
        }
    }

    /// A cache with a runtime range; `MIN` and `MAX` must be [`DYNAMIC`].
    pub fn with_limits(parent: A, min_size: usize, max_size: usize) -> Self {
        let () = Self::VALID;
        assert!(
            MIN == DYNAMIC && MAX == DYNAMIC,
            "the size range is fixed at compile time, construct it with `new`"
        );
        assert!(min_size <= max_size, "invalid size range");
        assert!(
            max_size >= size_of::<FreeNode>(),
            "the maximum block size must hold at least a pointer"
        );
        debug_assert!(is_aligned(max_size, A::ALIGNMENT));
        Freelist {
            parent,
            head: Cell::new(ptr::null_mut()),
            count: Cell::new(0),
            min_size,
            max_size,
        }
    }

    /// The allocator the cache draws from.
    pub fn parent(&self) -> &A {
        &self.parent
    }

    /// Smallest request served from the cache.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Largest request served from the cache; also the size of every cached
    /// block.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn in_range(&self, size: usize) -> bool {
        self.min_size <= size && size <= self.max_size
    }

    fn is_full(&self) -> bool {
        self.count.get() == CAPACITY
    }

    /// # Safety
    ///
    /// `ptr` must point at `max_size` exclusively owned bytes.
    unsafe fn push(&self, ptr: *mut u8) {
        debug_assert!(!ptr.is_null());
        debug_assert!(ptr as usize % align_of::<FreeNode>() == 0);
        let node = ptr as *mut FreeNode;
        // The freed block becomes the new head and points at the old one.
        (*node).next = self.head.get();
        self.head.set(node);
        self.count.set(self.count.get() + 1);
    }

    fn pop(&self) -> Option<*mut u8> {
        let head = self.head.get();
        if head.is_null() {
            return None;
        }
        // SAFETY: every node in the list was installed by `push` into memory
        // the parent handed out and that is exclusively ours until popped.
        self.head.set(unsafe { (*head).next });
        self.count.set(self.count.get() - 1);
        Some(head as *mut u8)
    }

    fn try_populate(&self) {
        let block_size = self.max_size;
        let refill = BATCH.min(CAPACITY - self.count.get());
        if refill == 0 {
            return;
        }

        if A::SUPPORTS_TRUNCATED_DEALLOCATION {
            // One big allocation, split into cache-sized slices. Sound only
            // because the parent promised to take the slices back
            // individually.
            let batch = self.parent.allocate(refill * block_size);
            if !batch.is_null() {
                for i in 0..refill {
                    // SAFETY: the slices are disjoint parts of `batch`.
                    unsafe { self.push(batch.ptr.add(i * block_size)) };
                }
                return;
            }
            // Fall through to discrete requests.
        }

        for _ in 0..refill {
            let block = self.parent.allocate(block_size);
            if block.is_null() {
                break;
            }
            // SAFETY: a fresh parent block of exactly `block_size` bytes.
            unsafe { self.push(block.ptr) };
        }
    }
}

// SAFETY: cached blocks are parent blocks of `max_size` bytes handed out
// again unchanged; everything else is forwarded to the parent verbatim.
unsafe impl<A: Alloc, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize>
    Alloc for Freelist<A, MIN, MAX, CAPACITY, BATCH>
{
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::null();
        }
        let aligned_size = round_to_alignment(size, A::ALIGNMENT);

        if self.in_range(aligned_size) {
            if self.head.get().is_null() {
                self.try_populate();
            }
            if let Some(ptr) = self.pop() {
                return Block::new(ptr, self.max_size);
            }
        }

        // Outside the range, or the refill failed: go to the parent.
        self.parent.allocate(aligned_size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_null() {
            return;
        }
        if !self.is_full() && block.size == self.max_size {
            self.push(block.ptr);
        } else {
            self.parent.deallocate(block);
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }
        let aligned_size = round_to_alignment(new_size, A::ALIGNMENT);
        if self.in_range(aligned_size) && aligned_size <= block.size {
            // The block already covers every in-range size.
            return true;
        }
        reallocate_and_copy(self, self, block, new_size)
    }
}

impl<A, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize> Owns
    for Freelist<A, MIN, MAX, CAPACITY, BATCH>
where
    A: Alloc + Owns,
{
    fn owns(&self, block: &Block) -> bool {
        // Cached blocks live in parent memory, so the parent's answer covers
        // them too.
        self.parent.owns(block)
    }
}

impl<A, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize>
    DeallocateAll for Freelist<A, MIN, MAX, CAPACITY, BATCH>
where
    A: Alloc + DeallocateAll,
{
    unsafe fn deallocate_all(&self) {
        // The parent wipes the memory the cached nodes live in, so the list
        // must be forgotten first.
        self.head.set(ptr::null_mut());
        self.count.set(0);
        self.parent.deallocate_all();
    }
}

impl<A, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize> Default
    for Freelist<A, MIN, MAX, CAPACITY, BATCH>
where
    A: Alloc + Default,
{
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A, const MIN: usize, const MAX: usize, const CAPACITY: usize, const BATCH: usize> Drop
    for Freelist<A, MIN, MAX, CAPACITY, BATCH>
where
    A: Alloc,
{
    fn drop(&mut self) {
        // Hand every cached block back to the parent for real.
        while let Some(ptr) = self.pop() {
            let mut block = Block::new(ptr, self.max_size);
            // SAFETY: the block is a parent allocation of `max_size` bytes
            // that only the cache referenced.
            unsafe { self.parent.deallocate(&mut block) };
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::linear::StackLinear;
    use crate::system::Mallocator;

    // Counts the requests that actually reach the parent.
    struct Spy<A> {
        parent: A,
        allocations: Cell<usize>,
        deallocations: Cell<usize>,
    }

    impl<A> Spy<A> {
        fn new(parent: A) -> Self {
            Spy {
                parent,
                allocations: Cell::new(0),
                deallocations: Cell::new(0),
            }
        }
    }

    unsafe impl<A: Alloc> Alloc for Spy<A> {
        const ALIGNMENT: usize = A::ALIGNMENT;
        const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

        fn allocate(&self, size: usize) -> Block {
            self.allocations.set(self.allocations.get() + 1);
            self.parent.allocate(size)
        }

        unsafe fn deallocate(&self, block: &mut Block) {
            self.deallocations.set(self.deallocations.get() + 1);
            self.parent.deallocate(block)
        }

        unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
            self.parent.reallocate(block, new_size)
        }
    }

    #[test]
    fn absorbs_and_recycles() {
        let cache: Freelist<Spy<Mallocator>, 32, 32, 4, 4> = Freelist::new(Spy::new(Mallocator));

        let mut blocks = [Block::null(); 4];
        for slot in blocks.iter_mut() {
            *slot = cache.allocate(32);
            assert_eq!(slot.size, 32);
        }
        let after_warmup = cache.parent.allocations.get();

        for slot in blocks.iter_mut() {
            unsafe { cache.deallocate(slot) };
        }
        // All four were absorbed by the cache.
        assert_eq!(cache.parent.deallocations.get(), 0);

        // The next allocation reuses the most recently freed pointer without
        // a parent request.
        let recycled = cache.allocate(32);
        assert_eq!(recycled.ptr, blocks[3].ptr);
        assert_eq!(cache.parent.allocations.get(), after_warmup);
    }

    #[test]
    fn batch_refill_splits_one_allocation() {
        // The linear parent supports truncated deallocation, so one refill
        // is a single 4 * 32 byte request.
        let cache: Freelist<Spy<StackLinear<256>>, 32, 32, 4, 4> =
            Freelist::new(Spy::new(Default::default()));

        let block = cache.allocate(32);
        assert!(!block.is_null());
        assert_eq!(cache.parent.allocations.get(), 1);
        assert_eq!(cache.parent.parent.remaining(), 256 - 128);

        // Three more pops, still no parent traffic.
        for _ in 0..3 {
            assert!(!cache.allocate(32).is_null());
        }
        assert_eq!(cache.parent.allocations.get(), 1);
    }

    #[test]
    fn out_of_range_passes_through() {
        let cache: Freelist<Spy<Mallocator>, 32, 64, 4, 2> = Freelist::new(Spy::new(Mallocator));

        let mut big = cache.allocate(128);
        assert_eq!(big.size, 128);
        assert_eq!(cache.parent.allocations.get(), 1);

        unsafe { cache.deallocate(&mut big) };
        assert_eq!(cache.parent.deallocations.get(), 1);
    }

    #[test]
    fn in_range_requests_are_upsized() {
        let cache: Freelist<Mallocator, 32, 64, 4, 2> = Freelist::new(Mallocator);

        let mut block = cache.allocate(40);
        assert_eq!(block.size, 64);

        // Any in-range resize is already covered.
        assert!(unsafe { cache.reallocate(&mut block, 33) });
        assert_eq!(block.size, 64);

        unsafe { cache.deallocate(&mut block) };
    }

    #[test]
    fn dynamic_range() {
        let cache: Freelist<Mallocator, DYNAMIC, DYNAMIC, 8, 2> =
            Freelist::with_limits(Mallocator, 16, 48);
        assert_eq!(cache.min_size(), 16);
        assert_eq!(cache.max_size(), 48);

        let mut block = cache.allocate(24);
        assert_eq!(block.size, 48);
        unsafe { cache.deallocate(&mut block) };
    }
}
