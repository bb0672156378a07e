//! The explicit free list: an intrusive doubly-linked list threaded through
//! the payloads of free blocks.
use crate::block::{Arena, BlockRef};

/// The head of the free list and the number of blocks on it.
///
/// The links live in the arena (see [`Arena::link_prev`]), so every operation
/// takes the arena it indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    head: Option<BlockRef>,
    len: usize,
}

impl FreeList {
    /// An empty list.
    pub const INIT: Self = Self { head: None, len: 0 };

    #[inline]
    pub fn head(&self) -> Option<BlockRef> {
        self.head
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Push `block` at the head.
    ///
    /// `block` must be a free block that is not on the list.
    #[inline]
    pub fn insert(&mut self, arena: &mut Arena, block: BlockRef) {
        debug_assert!(!arena.header(block).is_allocated());
        debug_assert_ne!(self.head, Some(block));

        arena.set_link_prev(block, None);
        arena.set_link_next(block, self.head);
        if let Some(old_head) = self.head {
            arena.set_link_prev(old_head, Some(block));
        }
        self.head = Some(block);
        self.len += 1;
    }

    /// Unlink `block`.
    ///
    /// `block` must be on the list, and its links must be intact (i.e., its
    /// payload must not have been overwritten since it was inserted).
    #[inline]
    pub fn remove(&mut self, arena: &mut Arena, block: BlockRef) {
        debug_assert!(self.len > 0, "removing {:?} from an empty free list", block);

        let prev = arena.link_prev(block);
        let next = arena.link_next(block);

        if let Some(prev) = prev {
            arena.set_link_next(prev, next);
        } else {
            debug_assert_eq!(self.head, Some(block), "{:?} is not on the free list", block);
            self.head = next;
        }

        if let Some(next) = next {
            arena.set_link_prev(next, prev);
        }

        self.len -= 1;
        debug_assert_eq!(self.len == 0, self.head.is_none());
    }

    /// Iterate over the list from the head. The iteration stops after
    /// [`Self::len`] items even if the links say otherwise.
    #[inline]
    pub fn iter<'a>(&self, arena: &'a Arena) -> Iter<'a> {
        Iter {
            arena,
            next: self.head,
            remaining: self.len,
        }
    }
}

/// Iterator returned by [`FreeList::iter`].
pub(crate) struct Iter<'a> {
    arena: &'a Arena,
    next: Option<BlockRef>,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = BlockRef;

    #[inline]
    fn next(&mut self) -> Option<BlockRef> {
        if self.remaining == 0 {
            return None;
        }
        let block = self.next?;
        self.remaining -= 1;
        self.next = self.arena.link_next(block);
        Some(block)
    }
}
