//! The allocator engine
use core::{fmt, ptr::NonNull};

use crate::{
    block::{
        adjusted_size, Arena, BlockRef, Tag, DWORD, FIRST_BLOCK, INITIAL_ARENA_LEN,
        MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, PROLOGUE, WORD,
    },
    check::CheckReport,
    config::{CheckMode, Config, Placement, ResizeStrategy},
    free_list::FreeList,
    utils::checked_align_up,
    AllocError, ArenaSource, ALIGNMENT,
};

#[doc = svgbobdoc::transform!(
/// An explicit free-list allocator managing a single arena obtained from an
/// [`ArenaSource`].
///
/// # Arena Layout
///
/// <center>
/// ```svgbob
///        prologue                  blocks                       epilogue
///     ,-------------,  ,------------------------------------,  ,---,
///     |             |  |                                    |  |   |
///  +--+------+------+--+------+----------------------+------+--+---+
///  |0 | 8/1  | 8/1  |  | 24/1 |      payload         | 24/1 |..|0/1|
///  +--+------+------+--+------+----------------------+------+--+---+
///   ^  header footer    header ^                      footer    header
///   |                          |
///   padding                    8-byte aligned payload
///
///   free block:
///  +------+-----------+-----------+-------------------+------+
///  | n/0  | prev_free | next_free |       unused      | n/0  |
///  +------+-----------+-----------+-------------------+------+
/// ```
/// </center>
///
/// Every block carries a header and a footer word holding its size and
/// allocation bit, so both physical neighbors of a block can be found in
/// constant time. Free blocks are additionally threaded onto a LIFO
/// doubly-linked list whose links are arena offsets stored in the payload.
///
/// # Properties
///
/// Every payload is aligned to [`ALIGNMENT`] bytes. Every block is at least
/// [`MIN_BLOCK_SIZE`] bytes long, including an 8-byte header and footer.
/// No two physically adjacent blocks are free at the same time.
///
/// The arena never shrinks.
///
/// # Examples
///
/// ```rust
/// use std::mem::MaybeUninit;
/// use tagheap::{FixedArena, TagHeap};
///
/// let mut pool = [MaybeUninit::uninit(); 65536];
/// let mut heap = TagHeap::new(FixedArena::new(&mut pool)).unwrap();
///
/// unsafe {
///     let ptr1 = heap.allocate(8).unwrap().cast::<u64>();
///     let ptr2 = heap.allocate(8).unwrap().cast::<u64>();
///     *ptr1.as_ptr() = 42;
///     *ptr2.as_ptr() = 56;
///     assert_eq!(*ptr1.as_ptr(), 42);
///     assert_eq!(*ptr2.as_ptr(), 56);
///     heap.free(ptr1.as_ptr().cast());
///     heap.free(ptr2.as_ptr().cast());
/// }
///
/// assert!(heap.check().is_ok());
/// ```
)]
pub struct TagHeap<S> {
    source: S,
    arena: Arena,
    free: FreeList,
    config: Config,
}

impl<S> fmt::Debug for TagHeap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagHeap")
            .field("arena", &self.arena)
            .field("free", &self.free)
            .field("config", &self.config)
            .finish()
    }
}

// Safety: All memory referenced by a `TagHeap` is owned by it through `S`
unsafe impl<S: Send> Send for TagHeap<S> {}

/// A block as seen by [`TagHeap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The payload address.
    pub addr: NonNull<u8>,
    /// The size of the whole block, including the header and footer.
    pub size: usize,
    pub allocated: bool,
}

impl<S: ArenaSource> TagHeap<S> {
    /// Initialize a heap with the default [`Config`].
    #[inline]
    pub fn new(source: S) -> Result<Self, AllocError> {
        Self::with_config(source, Config::INIT)
    }

    /// Initialize a heap.
    ///
    /// This obtains the sentinel blocks and one minimal free block from
    /// `source`. Fails if `source` can't supply them or if the region it
    /// returns is not aligned to [`ALIGNMENT`] bytes.
    pub fn with_config(mut source: S, config: Config) -> Result<Self, AllocError> {
        let exhausted = AllocError::ArenaExhausted {
            requested: INITIAL_ARENA_LEN,
        };
        let base = source.sbrk(INITIAL_ARENA_LEN).ok_or(exhausted)?;
        if base.as_ptr() as usize % ALIGNMENT != 0 {
            log::error!("arena source returned a misaligned region at {:p}", base);
            return Err(exhausted);
        }

        // Safety: `ArenaSource` guarantees the returned range is ours
        let mut arena = unsafe { Arena::new(base, INITIAL_ARENA_LEN) };
        arena.set_word(0, 0);
        arena.set_word(PROLOGUE - WORD, Tag::new(DWORD, true).bits());
        arena.set_word(PROLOGUE, Tag::new(DWORD, true).bits());
        arena.set_epilogue(FIRST_BLOCK);

        let mut this = Self {
            source,
            arena,
            free: FreeList::INIT,
            config,
        };

        this.extend(MIN_BLOCK_SIZE / WORD)?;
        log::debug!("initialized heap at {:p} with {:?}", base, config);
        Ok(this)
    }

    /// Allocate a memory block of at least `size` bytes.
    ///
    /// Returns the starting address of the memory block, which is aligned to
    /// [`ALIGNMENT`] bytes. A zero-sized request fails with
    /// [`AllocError::ZeroSize`] and leaves the heap untouched.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in linear time (`O(free blocks)`).
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let block = self.allocate_block(size)?;
        let ptr = self.arena.ptr_of(block);
        log::trace!("allocate({}) = {:p}", size, ptr);
        Ok(ptr)
    }

    fn allocate_block(&mut self, size: usize) -> Result<BlockRef, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let asize = adjusted_size(size).ok_or(AllocError::ArenaExhausted { requested: size })?;

        let block = match self.config.placement {
            Placement::FirstFit => match self.find_fit(asize) {
                Some(block) => block,
                None => self.extend(asize.max(self.config.chunk_size) / WORD)?,
            },
            Placement::Bump => self.extend(asize / WORD)?,
        };

        self.place(block, asize);
        Ok(block)
    }

    /// Deallocate a previously allocated memory block. A null pointer is
    /// ignored.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time (plus the consistency
    /// check, if enabled).
    ///
    /// # Safety
    ///
    ///  - `ptr` must be null or denote a memory block previously allocated
    ///    via `self` that has not been deallocated since.
    ///
    /// A pointer that is recognizably not an allocated block of this heap
    /// (outside the arena, misaligned, or pointing at a free block) is
    /// logged and ignored.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let Some(block) = self.block_for_allocation(ptr) else {
            return;
        };
        log::trace!("free({:p})", ptr);

        if self.config.placement == Placement::Bump {
            // Blocks are never reused
            return;
        }

        let size = self.arena.header(block).size();
        self.arena.set_tags(block, size, false);
        self.coalesce(block);
    }

    /// Shrink or grow a previously allocated memory block.
    ///
    /// Returns the new starting address of the memory block on success. The
    /// first `min(new_size, old capacity)` bytes of the old contents are
    /// preserved. A `new_size` of zero deallocates the block and returns
    /// `Ok(None)`; a null `ptr` makes this equivalent to
    /// [`allocate`](Self::allocate).
    ///
    /// On failure, the original memory block is left intact.
    ///
    /// # Time Complexity
    ///
    /// Unlike other methods, this method may copy the payload and complete
    /// in `O(old_size)` time.
    ///
    /// # Safety
    ///
    ///  - `ptr` must be null or denote a memory block previously allocated
    ///    via `self` that has not been deallocated since.
    ///
    /// A pointer that is recognizably not an allocated block of this heap
    /// fails with [`AllocError::InvalidPointer`].
    pub unsafe fn resize(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        if new_size == 0 {
            self.free(ptr);
            return Ok(None);
        }
        let Some(ptr) = NonNull::new(ptr) else {
            return self.allocate(new_size).map(Some);
        };
        let block = self
            .block_for_allocation(ptr)
            .ok_or(AllocError::InvalidPointer {
                addr: ptr.as_ptr() as usize,
            })?;
        let asize = adjusted_size(new_size).ok_or(AllocError::ArenaExhausted {
            requested: new_size,
        })?;
        let old_size = self.arena.header(block).size();

        if asize <= old_size {
            log::trace!("resize({:p}, {}): fits", ptr, new_size);
            return Ok(Some(ptr));
        }

        if self.config.placement == Placement::FirstFit
            && self.config.resize == ResizeStrategy::InPlace
            && self.grow_in_place(block, asize)
        {
            log::trace!("resize({:p}, {}): grown in place", ptr, new_size);
            return Ok(Some(ptr));
        }

        // Relocate. The new block is allocated before the old one is released
        // so that a failure leaves the original untouched.
        let new_block = self.allocate_block(new_size)?;
        let new_ptr = self.arena.ptr_of(new_block);
        let len = (old_size - DWORD).min(new_size);
        self.arena.copy_payload(block, new_block, len);
        self.free(ptr.as_ptr());
        log::trace!("resize({:p}, {}) = {:p}", ptr, new_size, new_ptr);
        Ok(Some(new_ptr))
    }

    /// Get the number of bytes usable in the memory block at `ptr`. This is
    /// at least the size it was requested with, or zero if `ptr` is
    /// recognizably not an allocated block of this heap.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated via `self`
    ///    that has not been deallocated since.
    ///
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.block_for_allocation(ptr)
            .map_or(0, |block| self.arena.header(block).size() - DWORD)
    }

    /// Run the consistency checker.
    ///
    /// Violations are logged at the error level and collected in the returned
    /// report. The heap is not modified.
    #[inline]
    pub fn check(&self) -> CheckReport {
        CheckReport::run(&self.arena, &self.free)
    }

    /// Iterate over all blocks in address order, excluding the sentinels.
    ///
    /// The iteration stops early at the first block with a malformed size.
    #[inline]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: &self.arena,
            offset: FIRST_BLOCK,
        }
    }

    /// The number of blocks on the free list.
    #[inline]
    pub fn free_block_count(&self) -> usize {
        self.free.len()
    }

    /// The number of bytes obtained from the arena source so far.
    #[inline]
    pub fn arena_size(&self) -> usize {
        self.arena.len()
    }

    /// The address of the first byte of the arena.
    #[inline]
    pub fn arena_start(&self) -> NonNull<u8> {
        self.arena.base()
    }

    /// The address one past the last byte of the arena.
    #[inline]
    pub fn arena_end(&self) -> *mut u8 {
        self.arena.end()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Find the block for an allocation (any `NonNull<u8>` returned by our
    /// allocation functions). Returns `None` if `ptr` can't be one.
    #[inline]
    fn block_for_allocation(&self, ptr: NonNull<u8>) -> Option<BlockRef> {
        let block = self
            .arena
            .block_of(ptr)
            .filter(|&block| self.arena.header(block).is_allocated());
        if block.is_none() {
            log::error!("{:p} is not an allocated block of this heap", ptr);
        }
        block
    }

    /// First-fit search of the free list.
    #[inline]
    fn find_fit(&self, asize: usize) -> Option<BlockRef> {
        if self.free.is_empty() {
            return None;
        }
        self.free
            .iter(&self.arena)
            .find(|&block| self.arena.header(block).size() >= asize)
    }

    /// Mark `asize` bytes of the free block `block` as allocated, splitting
    /// off the remainder if it can form a block of its own.
    fn place(&mut self, block: BlockRef, asize: usize) {
        let csize = self.arena.header(block).size();
        debug_assert!(!self.arena.header(block).is_allocated());
        debug_assert!(csize >= asize);

        self.free.remove(&mut self.arena, block);

        if self.config.placement == Placement::FirstFit && csize - asize >= MIN_BLOCK_SIZE {
            self.arena.set_tags(block, asize, true);
            let rest = self.arena.next(block);
            self.arena.set_tags(rest, csize - asize, false);
            log::trace!("place: split {:?} into {} + {}", block, asize, csize - asize);
            self.coalesce(rest);
        } else {
            self.arena.set_tags(block, csize, true);
        }
    }

    /// Try to grow the allocated `block` to `asize` bytes by absorbing the
    /// following free block.
    fn grow_in_place(&mut self, block: BlockRef, asize: usize) -> bool {
        let old_size = self.arena.header(block).size();
        let next_tag = self.arena.next_header(block);
        if next_tag.is_allocated() || old_size + next_tag.size() < asize {
            return false;
        }

        let next = self.arena.next(block);
        self.free.remove(&mut self.arena, next);
        let merged = old_size + next_tag.size();

        if merged - asize >= MIN_BLOCK_SIZE {
            self.arena.set_tags(block, asize, true);
            let rest = self.arena.next(block);
            self.arena.set_tags(rest, merged - asize, false);
            self.coalesce(rest);
        } else {
            self.arena.set_tags(block, merged, true);
        }
        true
    }

    /// Grow the arena by `words` words (rounded up to an even number, at
    /// least [`MIN_BLOCK_SIZE`] bytes) and return the resulting free block,
    /// which is coalesced with a free block preceding it.
    fn extend(&mut self, words: usize) -> Result<BlockRef, AllocError> {
        // An even number of words preserves the alignment
        let size = words
            .checked_mul(WORD)
            .and_then(|size| checked_align_up(size, DWORD))
            .map(|size| size.max(MIN_BLOCK_SIZE))
            .filter(|&size| size <= MAX_BLOCK_SIZE)
            .ok_or(AllocError::ArenaExhausted {
                requested: words.saturating_mul(WORD),
            })?;
        let exhausted = AllocError::ArenaExhausted { requested: size };

        // Blocks are addressed by 32-bit offsets
        let new_len = self
            .arena
            .len()
            .checked_add(size)
            .filter(|&len| len <= u32::MAX as usize)
            .ok_or(exhausted)?;

        let ptr = self.source.sbrk(size).ok_or(exhausted)?;
        if ptr.as_ptr() != self.arena.end() {
            log::error!(
                "arena source returned {:p}, which is not contiguous with the arena end {:p}",
                ptr,
                self.arena.end()
            );
            return Err(exhausted);
        }

        // The new block's header replaces the old epilogue
        let block = BlockRef::new(self.arena.len()).ok_or(exhausted)?;
        // Safety: `ArenaSource` guarantees the appended range is ours
        unsafe { self.arena.grow(size) };
        debug_assert_eq!(self.arena.len(), new_len);
        self.arena.set_tags(block, size, false);
        self.arena.set_epilogue(new_len);
        log::debug!("extend: grew the arena by {} bytes to {}", size, new_len);

        Ok(self.coalesce(block))
    }

    /// Merge the free block `block` with its free neighbors and put the
    /// result on the free list. Returns the merged block, which starts at
    /// the lowest address among the merged blocks.
    ///
    /// `block` must not be on the free list.
    fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        let arena = &mut self.arena;
        debug_assert!(!arena.header(block).is_allocated());
        // The prologue and the epilogue are allocated, so the arena's edges
        // are never crossed.
        let prev_allocated = arena.prev_footer(block).is_allocated();
        let next_allocated = arena.next_header(block).is_allocated();
        let mut size = arena.header(block).size();

        let block = match (prev_allocated, next_allocated) {
            (true, true) => block,
            (true, false) => {
                let next = arena.next(block);
                self.free.remove(arena, next);
                size += arena.header(next).size();
                arena.set_tags(block, size, false);
                block
            }
            (false, true) => {
                let prev = arena.prev(block);
                debug_assert_ne!(prev.offset(), PROLOGUE);
                self.free.remove(arena, prev);
                size += arena.header(prev).size();
                arena.set_tags(prev, size, false);
                prev
            }
            (false, false) => {
                let prev = arena.prev(block);
                let next = arena.next(block);
                self.free.remove(arena, prev);
                self.free.remove(arena, next);
                size += arena.header(prev).size() + arena.header(next).size();
                arena.set_tags(prev, size, false);
                prev
            }
        };

        self.free.insert(arena, block);
        log::trace!("coalesce: {:?} ({} bytes)", block, size);

        if self.config.check == CheckMode::AfterCoalesce {
            let _ = self.check();
        }
        block
    }
}

/// Iterator returned by [`TagHeap::blocks`].
pub struct Blocks<'a> {
    arena: &'a Arena,
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let tag = Tag::from_bits(self.arena.try_word(self.offset - WORD)?);
        if tag.size() < MIN_BLOCK_SIZE || self.offset + tag.size() > self.arena.epilogue() {
            // The epilogue, or garbage
            return None;
        }
        let block = BlockRef::new(self.offset)?;
        self.offset += tag.size();
        Some(BlockInfo {
            addr: self.arena.ptr_of(block),
            size: tag.size(),
            allocated: tag.is_allocated(),
        })
    }
}
