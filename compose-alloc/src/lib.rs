//! Composable memory allocators.
//!
//! Small allocator primitives and the combinators to stack them: every type
//! here satisfies the same [`Alloc`] contract from `alloc-contract`, and the
//! combinators are generic over anything satisfying it, so allocation
//! policies are synthesized by nesting types at compile time. The whole
//! composite inlines into its leaves; there is no dynamic dispatch anywhere.
//!
//! ```rust
//! use compose_alloc::{FallbackAllocator, Freelist, Mallocator, StackLinear};
//! use alloc_contract::Alloc;
//!
//! // Small objects come from a cached stack arena, everything else from the
//! // heap, and the arena spills to the heap when it fills up.
//! type Fast = Freelist<StackLinear<4096>, 0, 64, 32, 8>;
//! type Policy = FallbackAllocator<Fast, Mallocator>;
//!
//! let policy = Policy::default();
//! let mut block = policy.allocate(48);
//! assert!(block.size >= 48);
//! unsafe { policy.deallocate(&mut block) };
//! ```
//!
//! The leaves are the linear (bump) allocators over a [`buffer`] provider,
//! the system heap adapters and the [`NullAllocator`]; the combinators are
//! fallback, segregator, bucketizer, freelist caching, cascading growth,
//! affix metadata and debug stamping. See each module for the exact routing
//! rules.

#![no_std]
#![deny(missing_docs)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

pub mod affix;
pub mod bucketizer;
pub mod buffer;
pub mod cascading;
pub mod concurrent;
pub mod fallback;
pub mod freelist;
pub mod linear;
pub mod null;
pub mod range;
pub mod segregator;
pub mod stamp;
#[cfg(feature = "alloc")]
pub mod system;

pub use affix::{AffixAllocator, NoAffix};
pub use bucketizer::Bucketizer;
pub use cascading::Cascading;
pub use concurrent::ConcurrentLinear;
pub use fallback::FallbackAllocator;
pub use freelist::Freelist;
#[cfg(feature = "alloc")]
pub use linear::HeapLinear;
pub use linear::{LinearAllocator, StackLinear};
pub use null::NullAllocator;
pub use range::{LinearRaider, Pow2Raider, RangeRaider};
pub use segregator::Segregator;
pub use stamp::Stamp;
#[cfg(feature = "alloc")]
pub use system::{AlignedMallocator, Mallocator};

/// Sentinel for a size parameter that is chosen at runtime instead of at
/// compile time. Used by [`buffer::HeapBuffer`] and [`Freelist`].
pub const DYNAMIC: usize = usize::MAX;

// Can't use the macro-call itself within the `doc` attribute. So force it to
// eval it as part of the macro invocation.
//
// The inspiration for the macro and implementation is from
// <https://github.com/GuillaumeGomez/doc-comment>
//
// MIT License
//
// Copyright (c) 2018 Guillaume Gomez
macro_rules! insert_as_doc {
    { $content:expr } => {
        #[doc = $content] extern { }
    }
}

// Provides the README as doc, to ensure the example works!
insert_as_doc!(include_str!("../Readme.md"));
