use thiserror::Error;

/// The error type for [`TagHeap`](crate::TagHeap) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A zero-sized allocation was requested. Nothing was allocated and the
    /// heap is unchanged.
    #[error("zero-sized allocation request")]
    ZeroSize,
    /// The arena source could not supply enough memory, or the request can
    /// never be satisfied by a block of this heap.
    #[error("arena exhausted while requesting {requested} bytes")]
    ArenaExhausted {
        /// The number of bytes that could not be obtained.
        requested: usize,
    },
    /// The pointer passed to [`TagHeap::resize`](crate::TagHeap::resize)
    /// does not denote an allocated block of this heap.
    #[error("{addr:#x} is not an allocated block of this heap")]
    InvalidPointer { addr: usize },
}

/// An inconsistency found by [`TagHeap::check`](crate::TagHeap::check).
///
/// Every variant identifies the offending block by the absolute address of
/// its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    /// A block's size is smaller than the minimum block size, or the block
    /// does not advance toward the epilogue.
    #[error("block at {addr:#x} has an invalid size ({size} bytes)")]
    BadBlock { addr: usize, size: usize },
    /// A block or free-list link points outside the arena.
    #[error("block at {addr:#x} reaches outside the arena")]
    OutOfBounds { addr: usize },
    /// A block's header and footer disagree.
    #[error("block at {addr:#x} has header {header:#x} but footer {footer:#x}")]
    TagMismatch { addr: usize, header: u32, footer: u32 },
    /// The arena walk did not end at a well-formed epilogue.
    #[error("arena walk ended at {addr:#x} instead of the epilogue")]
    BadEpilogue { addr: usize },
    /// An allocated block's footer has been overwritten, typically by a
    /// payload overrun.
    #[error("allocated block at {addr:#x} overlaps its successor")]
    Overlap { addr: usize },
    /// A block on the free list is marked as allocated.
    #[error("block at {addr:#x} is on the free list but marked as allocated")]
    AllocatedInFreeList { addr: usize },
    /// A free block has a free neighbor.
    #[error("free block at {addr:#x} escaped coalescing")]
    MissedCoalesce { addr: usize },
    /// A free block cannot be reached from the free list.
    #[error("free block at {addr:#x} is not on the free list")]
    NotInFreeList { addr: usize },
    /// A free-list member is not a free block of the arena.
    #[error("free-list member at {addr:#x} is not a free block")]
    StrayInFreeList { addr: usize },
    /// The free list's length disagrees with its recorded count.
    #[error("free list has {walked} reachable blocks but records {counted}")]
    FreeCountMismatch { walked: usize, counted: usize },
}
