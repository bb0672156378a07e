//! This crate implements an explicit free-list dynamic memory allocator with
//! boundary-tag coalescing.
//!
//!  - **The arena is provided by an [`ArenaSource`].** It only ever grows,
//!    one contiguous extension at a time, like a program break moved by
//!    `sbrk(2)`. [`FixedArena`] carves the arena out of a memory pool
//!    supplied by the application; [`Sbrk`] uses the real program break.
//!
//!  - **Every block carries a header and a footer.** Both physical
//!    neighbors of a block can be found in constant time, so a freed block
//!    is merged with adjacent free blocks immediately.
//!
//!  - **Free blocks are kept on a single LIFO list** threaded through their
//!    payloads and searched first-fit.
//!
//!  - **The heap can audit itself.** [`TagHeap::check`] validates the block
//!    layout and the free list against each other and reports what it
//!    finds without touching anything.
//!
//!  - **This crate supports `#![no_std]`.**
//!
//! # Examples
//!
//! ```rust
//! use tagheap::{FixedArena, TagHeap};
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::uninit(); 65536];
//! let mut heap = TagHeap::new(FixedArena::new(&mut pool)).unwrap();
//!
//! unsafe {
//!     let ptr = heap.allocate(24).unwrap();
//!     ptr.as_ptr().write_bytes(0x5a, 24);
//!
//!     // Grow the block, keeping its contents
//!     let ptr = heap.resize(ptr.as_ptr(), 100).unwrap().unwrap();
//!     assert_eq!(*ptr.as_ptr().add(23), 0x5a);
//!
//!     heap.free(ptr.as_ptr());
//! }
//!
//! assert!(heap.check().is_ok());
//! ```
//!
//! # Details
//!
//! Allocation requests are rounded up to a multiple of [`ALIGNMENT`] bytes
//! plus 8 bytes for the header and footer, with a minimum of
//! [`MIN_BLOCK_SIZE`] bytes. When no free block fits, the arena is grown by
//! at least [`Config::chunk_size`] bytes (by default [`CHUNK_SIZE`]).
//!
//! Blocks are addressed by 32-bit offsets from the arena's base, which
//! limits an arena to 4 GiB.
//!
//! A [`TagHeap`] is not thread-safe. It can be moved between threads if its
//! source can, but every operation needs exclusive access.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod block;
mod check;
mod config;
mod error;
mod free_list;
mod heap;
mod init;
mod source;
mod utils;
pub use self::{
    block::{ALIGNMENT, MIN_BLOCK_SIZE},
    check::CheckReport,
    config::{CheckMode, Config, Placement, ResizeStrategy, CHUNK_SIZE},
    error::{AllocError, Violation},
    heap::{BlockInfo, Blocks, TagHeap},
    init::*,
    source::*,
};

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(test)]
mod tests;
