//! The shared reallocation protocol, exercised against a minimal allocator.

use core::cell::Cell;

use alloc_contract::realloc::{reallocate_and_copy, reallocate_common};
use alloc_contract::{round_to_alignment, Alloc, Block};

/// A bump allocator that never reclaims; just enough to drive the helpers.
struct TestArena {
    storage: Box<[Cell<u8>]>,
    used: Cell<usize>,
}

impl TestArena {
    fn new(capacity: usize) -> Self {
        TestArena {
            storage: vec![Cell::new(0); capacity].into_boxed_slice(),
            used: Cell::new(0),
        }
    }
}

unsafe impl Alloc for TestArena {
    const ALIGNMENT: usize = 8;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::null();
        }
        let aligned = round_to_alignment(size, Self::ALIGNMENT);
        if aligned > self.storage.len() - self.used.get() {
            return Block::null();
        }
        let ptr = self.storage[self.used.get()].as_ptr();
        self.used.set(self.used.get() + aligned);
        Block::new(ptr, aligned)
    }

    unsafe fn deallocate(&self, _block: &mut Block) {}

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if let Some(done) = reallocate_common(self, block, new_size) {
            return done;
        }
        reallocate_and_copy(self, self, block, new_size)
    }
}

#[test]
fn same_rounded_size_is_a_noop() {
    let arena = TestArena::new(64);
    let mut block = arena.allocate(10);
    assert_eq!(block.size, 16);

    let before = block;
    // 13 rounds to the block's current 16 bytes.
    assert!(unsafe { arena.reallocate(&mut block, 13) });
    assert_eq!(block, before);
}

#[test]
fn zero_size_deallocates_and_nulls() {
    let arena = TestArena::new(64);
    let mut block = arena.allocate(16);

    assert!(unsafe { arena.reallocate(&mut block, 0) });
    assert!(block.is_null());
}

#[test]
fn null_handle_allocates_fresh() {
    let arena = TestArena::new(64);

    let mut block = Block::null();
    assert!(unsafe { arena.reallocate(&mut block, 24) });
    assert!(!block.is_null());
    assert_eq!(block.size, 24);

    // And reports failure when the allocation cannot be served.
    let mut too_big = Block::null();
    assert!(!unsafe { arena.reallocate(&mut too_big, 1024) });
    assert!(too_big.is_null());
}

#[test]
fn move_and_copy_preserves_the_prefix() {
    let arena = TestArena::new(256);
    let mut block = arena.allocate(16);
    for offset in 0..16 {
        unsafe { block.ptr.add(offset).write(offset as u8) };
    }

    assert!(unsafe { arena.reallocate(&mut block, 64) });
    assert_eq!(block.size, 64);
    for offset in 0..16 {
        assert_eq!(unsafe { block.ptr.add(offset).read() }, offset as u8);
    }
}
