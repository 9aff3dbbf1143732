//! Growing a chain of allocators on demand.

use core::cell::Cell;
use core::mem::size_of;
use core::ptr;

use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{Alloc, Block, DeallocateAll, Owns};

/// Replicates an inner allocator into a linked chain as demand grows.
///
/// Allocation walks the chain head-first and takes the first success; when
/// every link is exhausted a fresh allocator is created and prepended. Each
/// link's bookkeeping node is stored *inside the allocator it carries*: a
/// new allocator is constructed on the stack, asked for a node-sized block,
/// and then moved into that very block. The chain therefore costs no
/// external memory at all.
///
/// `A` must be constructible via `Default` and must keep its outstanding
/// blocks valid when the allocator value is moved, which is the case for the
/// heap-backed linear allocators (the buffer stays put, only the handle
/// moves). Stack-backed linear allocators carry their buffer inside the
/// value and cannot be chained.
///
/// ```rust
/// use compose_alloc::{Cascading, HeapLinear, Mallocator};
/// use alloc_contract::Alloc;
///
/// // Each link holds 256 bytes; the chain grows 256 bytes at a time.
/// let chain: Cascading<HeapLinear<Mallocator, 256>> = Cascading::new();
///
/// let a = chain.allocate(200);
/// let b = chain.allocate(200); // exhausts the first link, grows a second
/// assert!(!a.is_null() && !b.is_null());
/// ```
pub struct Cascading<A: Alloc + Owns + Default> {
    head: Cell<*mut Node<A>>,
    // Every node block must come out the same size; checked on growth.
    node_size: Cell<usize>,
}

struct Node<A> {
    allocator: A,
    next: *mut Node<A>,
}

impl<A: Alloc + Owns + Default> Cascading<A> {
    /// An empty chain; the first link appears on the first allocation.
    pub const fn new() -> Self {
        Cascading {
            head: Cell::new(ptr::null_mut()),
            node_size: Cell::new(0),
        }
    }

    /// Number of links currently in the chain.
    pub fn links(&self) -> usize {
        let mut count = 0;
        let mut node = self.head.get();
        while !node.is_null() {
            count += 1;
            // SAFETY: chain nodes are valid until erased.
            node = unsafe { (*node).next };
        }
        count
    }

    fn allocate_no_grow(&self, size: usize) -> Block {
        let mut node = self.head.get();
        while !node.is_null() {
            // SAFETY: chain nodes are valid until erased.
            let block = unsafe { (*node).allocator.allocate(size) };
            if !block.is_null() {
                return block;
            }
            node = unsafe { (*node).next };
        }
        Block::null()
    }

    /// Boot-strap a link: build the allocator on the stack, carve the node
    /// slot out of it, then move it into its own slot.
    fn create_node(&self) -> *mut Node<A> {
        let boot = A::default();
        let slot = boot.allocate(size_of::<Node<A>>());
        if slot.is_null() {
            // Most likely out of memory.
            return ptr::null_mut();
        }
        assert!(
            self.node_size.get() == 0 || self.node_size.get() == slot.size,
            "every link must allocate an identically sized node"
        );
        self.node_size.set(slot.size);

        debug_assert!(slot.ptr as usize % core::mem::align_of::<Node<A>>() == 0);
        let node = slot.ptr as *mut Node<A>;
        // SAFETY: the slot is a fresh exclusive allocation large enough for
        // a node; writing moves `boot` in without dropping it.
        unsafe {
            ptr::write(
                node,
                Node {
                    allocator: boot,
                    next: ptr::null_mut(),
                },
            );
        }
        node
    }

    fn prepend_node(&self) -> *mut Node<A> {
        let node = self.create_node();
        if node.is_null() {
            return node;
        }
        // SAFETY: freshly created node.
        unsafe { (*node).next = self.head.get() };
        self.head.set(node);
        node
    }

    fn find_owning_node(&self, block: &Block) -> *mut Node<A> {
        let mut node = self.head.get();
        while !node.is_null() {
            // SAFETY: chain nodes are valid until erased.
            if unsafe { (*node).allocator.owns(block) } {
                return node;
            }
            node = unsafe { (*node).next };
        }
        ptr::null_mut()
    }

    /// Erase `node` and everything behind it, tail first.
    ///
    /// # Safety
    ///
    /// `node` must be a chain node (or null) that nothing references
    /// afterwards.
    unsafe fn erase_chain(&self, node: *mut Node<A>) {
        if node.is_null() {
            return;
        }
        self.erase_chain((*node).next);

        // Move the node out so its allocator survives the release of the
        // slot it lived in, then let the drop free the backing memory.
        let rescued = ptr::read(node);
        let mut slot = Block::new(node as *mut u8, self.node_size.get());
        rescued.allocator.deallocate(&mut slot);
    }
}

// SAFETY: every block is produced by exactly one link's allocator, and
// `owns`-based routing returns it to that link.
unsafe impl<A: Alloc + Owns + Default> Alloc for Cascading<A> {
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::null();
        }

        let block = self.allocate_no_grow(size);
        if !block.is_null() {
            return block;
        }

        // Every link is exhausted: grow the chain and use the new link.
        let node = self.prepend_node();
        if node.is_null() {
            return Block::null();
        }
        // SAFETY: freshly prepended node.
        unsafe { (*node).allocator.allocate(size) }
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_null() {
            return;
        }
        let node = self.find_owning_node(block);
        if !node.is_null() {
            (*node).allocator.deallocate(block);
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }

        let node = self.find_owning_node(block);
        if node.is_null() {
            return false;
        }

        if (*node).allocator.reallocate(block, new_size) {
            return true;
        }

        // The owning link is out of room: move the block anywhere in the
        // chain, growing it if need be.
        reallocate_and_copy(&(*node).allocator, self, block, new_size)
    }
}

impl<A: Alloc + Owns + Default> Owns for Cascading<A> {
    fn owns(&self, block: &Block) -> bool {
        !self.find_owning_node(block).is_null()
    }
}

impl<A: Alloc + Owns + Default + DeallocateAll> DeallocateAll for Cascading<A> {
    unsafe fn deallocate_all(&self) {
        let head = self.head.get();
        if head.is_null() {
            return;
        }

        // Drop every link behind the head.
        self.erase_chain((*head).next);

        // Rescue the head node, wipe its allocator (which also reclaims the
        // slot the node lived in), then carve a fresh slot and move it back.
        let mut rescued = ptr::read(head);
        rescued.next = ptr::null_mut();
        rescued.allocator.deallocate_all();

        let slot = rescued.allocator.allocate(size_of::<Node<A>>());
        assert!(
            !slot.is_null(),
            "a wiped link must be able to hold its own node again"
        );
        debug_assert_eq!(slot.size, self.node_size.get());
        let node = slot.ptr as *mut Node<A>;
        ptr::write(node, rescued);
        self.head.set(node);
    }
}

impl<A: Alloc + Owns + Default> Default for Cascading<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Alloc + Owns + Default> Drop for Cascading<A> {
    fn drop(&mut self) {
        // SAFETY: outstanding blocks must not outlive the allocator, so the
        // chain is ours alone by now.
        unsafe { self.erase_chain(self.head.get()) };
        self.head.set(ptr::null_mut());
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::linear::HeapLinear;

    type Chain = Cascading<HeapLinear<crate::system::Mallocator, 256>>;

    #[test]
    fn grows_on_exhaustion() {
        let chain: Chain = Cascading::new();
        assert_eq!(chain.links(), 0);

        let a = chain.allocate(200);
        assert!(!a.is_null());
        assert_eq!(chain.links(), 1);

        // The first link has node + 200 bytes used; another 200 do not fit.
        let b = chain.allocate(200);
        assert!(!b.is_null());
        assert_eq!(chain.links(), 2);
    }

    #[test]
    fn routing_finds_the_owning_link() {
        let chain: Chain = Cascading::new();

        let mut a = chain.allocate(200);
        let b = chain.allocate(200);
        assert_eq!(chain.links(), 2);

        assert!(chain.owns(&a) && chain.owns(&b));

        // `a` lives in the older link; releasing it rewinds that link so the
        // next fitting request reuses it instead of growing the chain.
        unsafe { chain.deallocate(&mut a) };
        let c = chain.allocate(200);
        assert_eq!(c.ptr, a.ptr);
        assert_eq!(chain.links(), 2);
    }

    #[test]
    fn reallocation_can_cross_links() {
        let chain: Chain = Cascading::new();

        let mut small = chain.allocate(64);
        let _wall = chain.allocate(160);
        unsafe { small.ptr.write(5) };

        // Growing `small` cannot happen in its link (the wall is on top),
        // so the block moves, possibly into a new link.
        assert!(unsafe { chain.reallocate(&mut small, 200) });
        assert_eq!(unsafe { small.ptr.read() }, 5);
        assert!(chain.owns(&small));
    }

    #[test]
    fn deallocate_all_keeps_one_link() {
        let chain: Chain = Cascading::new();

        for _ in 0..4 {
            let _ = chain.allocate(200);
        }
        assert_eq!(chain.links(), 4);

        unsafe { chain.deallocate_all() };
        assert_eq!(chain.links(), 1);

        // The surviving link is empty again apart from its node.
        let a = chain.allocate(200);
        assert!(!a.is_null());
        assert_eq!(chain.links(), 1);
    }
}
