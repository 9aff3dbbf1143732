//! Buffer providers backing the linear allocators.
//!
//! A provider hands the allocator one contiguous byte buffer. The buffer can
//! live inline on the stack ([`StackBuffer`]) or be drawn from a parent
//! allocator ([`HeapBuffer`]), with its size fixed at compile time or chosen
//! at runtime, and obtained eagerly at construction or lazily on the first
//! allocation.

use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;

use alloc_contract::{Alloc, Block};

use crate::DYNAMIC;

/// A contiguous byte buffer for a linear allocator to carve up.
pub trait BufferProvider {
    /// Make sure the buffer exists, performing a deferred allocation when the
    /// provider is lazy. Returns `false` when no buffer can be obtained.
    fn try_init(&self) -> bool;

    /// Start of the buffer, or null while a lazy buffer is still pending.
    fn as_ptr(&self) -> *mut u8;

    /// Size of the buffer in bytes.
    fn capacity(&self) -> usize;
}

// Keeps the inline buffer aligned for any default-aligned allocation without
// threading the alignment through another const parameter.
#[repr(align(16))]
struct Storage<const N: usize>([u8; N]);

/// An inline byte buffer of `N` bytes.
///
/// The buffer lives inside the allocator value itself. Moving the allocator
/// therefore moves the buffer, so outstanding blocks must not survive a move.
/// The size is fixed at compile time and the buffer needs no initialization.
pub struct StackBuffer<const N: usize> {
    storage: UnsafeCell<MaybeUninit<Storage<N>>>,
}

impl<const N: usize> StackBuffer<N> {
    /// A buffer of uninitialized bytes.
    pub const fn uninit() -> Self {
        StackBuffer {
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// A buffer of zeroed bytes.
    pub fn zeroed() -> Self {
        StackBuffer {
            storage: UnsafeCell::new(MaybeUninit::zeroed()),
        }
    }
}

impl<const N: usize> BufferProvider for StackBuffer<N> {
    fn try_init(&self) -> bool {
        true
    }

    fn as_ptr(&self) -> *mut u8 {
        self.storage.get() as *mut u8
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for StackBuffer<N> {
    fn default() -> Self {
        Self::uninit()
    }
}

/// A byte buffer obtained from a parent allocator.
///
/// The size is `N` bytes, or chosen at runtime when `N` is [`DYNAMIC`]
/// (via [`with_capacity`] or [`set_capacity`]). With `EAGER` the buffer is
/// requested at construction; otherwise the request is deferred until the
/// first allocation. The buffer is returned to the parent on drop.
///
/// [`with_capacity`]: Self::with_capacity
/// [`set_capacity`]: Self::set_capacity
pub struct HeapBuffer<A: Alloc, const N: usize = DYNAMIC, const EAGER: bool = true> {
    parent: A,
    buffer: Cell<*mut u8>,
    len: Cell<usize>,
}

impl<A: Alloc, const N: usize, const EAGER: bool> HeapBuffer<A, N, EAGER> {
    /// A buffer of the compile-time size `N`, or an empty dynamic buffer
    /// awaiting [`set_capacity`](Self::set_capacity) when `N` is [`DYNAMIC`].
    pub fn new(parent: A) -> Self {
        let provider = HeapBuffer {
            parent,
            buffer: Cell::new(core::ptr::null_mut()),
            len: Cell::new(if N == DYNAMIC { 0 } else { N }),
        };
        if EAGER && N != DYNAMIC {
            provider.allocate_buffer();
        }
        provider
    }

    /// A dynamically sized buffer of `capacity` bytes.
    pub fn with_capacity(parent: A, capacity: usize) -> Self {
        assert!(
            N == DYNAMIC,
            "the buffer size is fixed at compile time, construct it with `new`"
        );
        let provider = HeapBuffer {
            parent,
            buffer: Cell::new(core::ptr::null_mut()),
            len: Cell::new(capacity),
        };
        if EAGER {
            provider.allocate_buffer();
        }
        provider
    }

    /// Size a dynamic buffer that has not been obtained yet.
    pub fn set_capacity(&self, capacity: usize) {
        assert!(N == DYNAMIC, "the buffer size is fixed at compile time");
        assert!(
            self.buffer.get().is_null(),
            "the buffer has already been obtained"
        );
        self.len.set(capacity);
        if EAGER {
            self.allocate_buffer();
        }
    }

    fn allocate_buffer(&self) {
        if self.len.get() == 0 {
            return;
        }
        let block = self.parent.allocate(self.len.get());
        self.buffer.set(block.ptr);
    }
}

impl<A: Alloc, const N: usize, const EAGER: bool> BufferProvider for HeapBuffer<A, N, EAGER> {
    fn try_init(&self) -> bool {
        if !self.buffer.get().is_null() {
            return true;
        }
        self.allocate_buffer();
        !self.buffer.get().is_null()
    }

    fn as_ptr(&self) -> *mut u8 {
        self.buffer.get()
    }

    fn capacity(&self) -> usize {
        self.len.get()
    }
}

impl<A: Alloc + Default, const N: usize, const EAGER: bool> Default for HeapBuffer<A, N, EAGER> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: Alloc, const N: usize, const EAGER: bool> Drop for HeapBuffer<A, N, EAGER> {
    fn drop(&mut self) {
        let buffer = self.buffer.get();
        if !buffer.is_null() {
            let mut block = Block::new(buffer, self.len.get());
            // SAFETY: the block is exactly what `allocate_buffer` obtained
            // from the parent, and nothing else releases it.
            unsafe { self.parent.deallocate(&mut block) };
            self.buffer.set(core::ptr::null_mut());
        }
    }
}
