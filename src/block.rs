//! Boundary-tag block layout and the raw arena view.
//!
//! Every other module interprets arena bytes exclusively through [`Arena`].
//! All accesses are bounds-checked against the arena's current length, so
//! a corrupted tag can make the engine misbehave logically but can never
//! make it touch memory outside the arena.
use core::{fmt, num::NonZeroU32, ptr::NonNull};

/// The size of a boundary tag (header or footer) in bytes.
pub(crate) const WORD: usize = 4;

/// Two words. Also the per-block overhead of a header plus a footer.
pub(crate) const DWORD: usize = 8;

/// The alignment of every payload returned by the allocator.
pub const ALIGNMENT: usize = 8;

/// The minimum size of a block, including its header and footer.
///
/// A free block must be able to hold its header, two free-list links and its
/// footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DWORD;

/// The bit of a tag indicating that the block is allocated.
const TAG_ALLOCATED: u32 = 1;
/// The bits of a tag holding the block size.
const TAG_SIZE_MASK: u32 = !(ALIGNMENT as u32 - 1);

/// The payload offset of the prologue block.
pub(crate) const PROLOGUE: usize = DWORD;

/// The payload offset of the first ordinary block.
pub(crate) const FIRST_BLOCK: usize = 2 * DWORD;

/// The initial arena: padding word, prologue header, prologue footer,
/// epilogue header.
pub(crate) const INITIAL_ARENA_LEN: usize = 4 * WORD;

/// The largest block size representable in a tag.
pub(crate) const MAX_BLOCK_SIZE: usize = TAG_SIZE_MASK as usize;

/// A boundary tag: a block size packed with the allocation bit.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(u32);

impl Tag {
    /// The tag of the epilogue (and of nothing else).
    pub const EPILOGUE: Self = Self(TAG_ALLOCATED);

    #[inline]
    pub fn new(size: usize, allocated: bool) -> Self {
        debug_assert_eq!(size % ALIGNMENT, 0);
        debug_assert!(size <= MAX_BLOCK_SIZE);
        Self(size as u32 | allocated as u32)
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & TAG_SIZE_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        (self.0 & TAG_ALLOCATED) != 0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tag({}, {})",
            self.size(),
            if self.is_allocated() { "used" } else { "free" }
        )
    }
}

/// Identifies a block by the arena offset of its payload.
///
/// Offset zero is the alignment padding word, which never starts a payload,
/// so `Option<BlockRef>` encodes "no block" as `0` in free-list links.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockRef(NonZeroU32);

impl BlockRef {
    #[inline]
    pub fn new(offset: usize) -> Option<Self> {
        u32::try_from(offset).ok().and_then(NonZeroU32::new).map(Self)
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0.get() as usize
    }

    /// Decode a free-list link word.
    #[inline]
    fn from_link(word: u32) -> Option<Self> {
        NonZeroU32::new(word).map(Self)
    }

    /// Encode a free-list link word.
    #[inline]
    fn to_link(this: Option<Self>) -> u32 {
        this.map_or(0, |b| b.0.get())
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.offset())
    }
}

/// Compute the block size needed to hold a payload of `size` bytes.
///
/// Returns `None` for a zero-sized request or when the resulting block would
/// not be representable in a tag.
#[inline]
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    let asize = if size <= DWORD {
        MIN_BLOCK_SIZE
    } else {
        crate::utils::checked_align_up(size, ALIGNMENT)?.checked_add(DWORD)?
    };
    Some(asize).filter(|&asize| asize <= MAX_BLOCK_SIZE)
}

/// A view of the arena's bytes.
///
/// `Arena` does not own the memory. It assumes `base..base + len` is
/// exclusively available to it, which [`crate::ArenaSource`] guarantees.
#[derive(Debug)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    len: usize,
}

impl Arena {
    /// Construct a view of `len` bytes at `base`.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes for as long as
    /// `self` is used, and `base` must be aligned to [`ALIGNMENT`].
    #[inline]
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);
        Self { base, len }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The address one past the last byte of the arena.
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.len)
    }

    /// Account for `additional` bytes appended by the source.
    ///
    /// # Safety
    ///
    /// The appended range must be valid under the same conditions as
    /// [`Self::new`].
    #[inline]
    pub unsafe fn grow(&mut self, additional: usize) {
        self.len += additional;
    }

    /// The payload offset of the epilogue.
    #[inline]
    pub fn epilogue(&self) -> usize {
        self.len
    }

    /// Read the word at `offset`, or `None` if it lies outside the arena.
    #[inline]
    pub fn try_word(&self, offset: usize) -> Option<u32> {
        if offset % WORD != 0 || offset.checked_add(WORD)? > self.len {
            return None;
        }
        // Safety: In bounds and aligned (`base` is aligned to `ALIGNMENT`)
        Some(unsafe { self.base.as_ptr().add(offset).cast::<u32>().read() })
    }

    #[inline]
    fn word(&self, offset: usize) -> u32 {
        match self.try_word(offset) {
            Some(word) => word,
            None => out_of_bounds(offset, self.len),
        }
    }

    #[inline]
    pub fn set_word(&mut self, offset: usize, value: u32) {
        if offset % WORD != 0 || offset.checked_add(WORD).map_or(true, |end| end > self.len) {
            out_of_bounds(offset, self.len);
        }
        // Safety: In bounds and aligned
        unsafe { self.base.as_ptr().add(offset).cast::<u32>().write(value) };
    }

    #[inline]
    pub fn header(&self, block: BlockRef) -> Tag {
        Tag(self.word(block.offset() - WORD))
    }

    #[inline]
    pub fn footer(&self, block: BlockRef) -> Tag {
        let size = self.header(block).size();
        Tag(self.word(block.offset() + size - DWORD))
    }

    /// Write a matching header and footer for a block of `size` bytes
    /// starting at `block`.
    #[inline]
    pub fn set_tags(&mut self, block: BlockRef, size: usize, allocated: bool) {
        debug_assert!(size >= MIN_BLOCK_SIZE);
        let tag = Tag::new(size, allocated);
        self.set_word(block.offset() - WORD, tag.0);
        self.set_word(block.offset() + size - DWORD, tag.0);
    }

    /// Write the epilogue header in front of `offset`.
    #[inline]
    pub fn set_epilogue(&mut self, offset: usize) {
        self.set_word(offset - WORD, Tag::EPILOGUE.0);
    }

    /// The footer of the block physically preceding `block`.
    #[inline]
    pub fn prev_footer(&self, block: BlockRef) -> Tag {
        Tag(self.word(block.offset() - DWORD))
    }

    /// The header of the block physically following `block`.
    #[inline]
    pub fn next_header(&self, block: BlockRef) -> Tag {
        Tag(self.word(self.next_offset(block) - WORD))
    }

    #[inline]
    fn next_offset(&self, block: BlockRef) -> usize {
        block.offset() + self.header(block).size()
    }

    /// The block physically following `block`. This may be the epilogue.
    #[inline]
    pub fn next(&self, block: BlockRef) -> BlockRef {
        match BlockRef::new(self.next_offset(block)) {
            Some(next) => next,
            None => out_of_bounds(self.next_offset(block), self.len),
        }
    }

    /// The block physically preceding `block`. This may be the prologue.
    #[inline]
    pub fn prev(&self, block: BlockRef) -> BlockRef {
        let offset = block.offset() - self.prev_footer(block).size();
        match BlockRef::new(offset) {
            Some(prev) => prev,
            None => out_of_bounds(offset, self.len),
        }
    }

    #[inline]
    pub fn link_prev(&self, block: BlockRef) -> Option<BlockRef> {
        BlockRef::from_link(self.word(block.offset()))
    }

    #[inline]
    pub fn link_next(&self, block: BlockRef) -> Option<BlockRef> {
        BlockRef::from_link(self.word(block.offset() + WORD))
    }

    /// Like [`Self::link_next`] but tolerates a link word outside the arena.
    #[inline]
    pub fn try_link_next(&self, block: BlockRef) -> Option<Option<BlockRef>> {
        self.try_word(block.offset() + WORD).map(BlockRef::from_link)
    }

    #[inline]
    pub fn set_link_prev(&mut self, block: BlockRef, prev: Option<BlockRef>) {
        self.set_word(block.offset(), BlockRef::to_link(prev));
    }

    #[inline]
    pub fn set_link_next(&mut self, block: BlockRef, next: Option<BlockRef>) {
        self.set_word(block.offset() + WORD, BlockRef::to_link(next));
    }

    /// The payload address of `block`.
    #[inline]
    pub fn ptr_of(&self, block: BlockRef) -> NonNull<u8> {
        debug_assert!(block.offset() <= self.len);
        // Safety: `block` is inside the arena, which does not wrap around
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(block.offset())) }
    }

    /// The absolute address of the payload at `offset`, for diagnostics.
    #[inline]
    pub fn addr_of(&self, offset: usize) -> usize {
        (self.base.as_ptr() as usize).wrapping_add(offset)
    }

    /// Find the block whose payload starts at `ptr`.
    ///
    /// Returns `None` if `ptr` cannot be the payload of an ordinary block.
    #[inline]
    pub fn block_of(&self, ptr: NonNull<u8>) -> Option<BlockRef> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;
        if offset < FIRST_BLOCK || offset >= self.len || offset % ALIGNMENT != 0 {
            return None;
        }
        BlockRef::new(offset)
    }

    /// Copy `len` payload bytes from `src` to `dst`.
    ///
    /// The ranges must lie inside the two blocks' payloads, which must not
    /// overlap.
    #[inline]
    pub fn copy_payload(&mut self, src: BlockRef, dst: BlockRef, len: usize) {
        debug_assert!(len <= self.header(src).size() - DWORD);
        debug_assert!(len <= self.header(dst).size() - DWORD);
        assert!(src.offset() + len <= self.len && dst.offset() + len <= self.len);
        // Safety: Both ranges are in bounds, and they belong to different
        //         blocks
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.ptr_of(src).as_ptr(),
                self.ptr_of(dst).as_ptr(),
                len,
            )
        };
    }
}

#[cold]
#[track_caller]
fn out_of_bounds(offset: usize, len: usize) -> ! {
    panic!("arena access at offset {:#x} is out of bounds (arena length {:#x})", offset, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Pool([u8; 64]);

    fn with_arena(f: impl FnOnce(&mut Arena)) {
        let mut pool = Pool([0; 64]);
        let mut arena = unsafe { Arena::new(NonNull::from(&mut pool.0).cast(), 64) };
        f(&mut arena);
    }

    #[test]
    fn tag_packing() {
        let tag = Tag::new(24, true);
        assert_eq!(tag.size(), 24);
        assert!(tag.is_allocated());
        assert_eq!(tag.bits(), 25);

        let tag = Tag::new(4096, false);
        assert_eq!(tag.size(), 4096);
        assert!(!tag.is_allocated());

        assert_eq!(Tag::EPILOGUE.size(), 0);
        assert!(Tag::EPILOGUE.is_allocated());
        assert_eq!(Tag::from_bits(0x17).size(), 0x10);
    }

    #[test]
    fn adjusted_sizes() {
        assert_eq!(adjusted_size(0), None);
        for size in 1..=8 {
            assert_eq!(adjusted_size(size), Some(MIN_BLOCK_SIZE));
        }
        assert_eq!(adjusted_size(9), Some(24));
        assert_eq!(adjusted_size(16), Some(24));
        assert_eq!(adjusted_size(17), Some(32));
        assert_eq!(adjusted_size(24), Some(32));
        assert_eq!(adjusted_size(100), Some(112));
        assert_eq!(adjusted_size(MAX_BLOCK_SIZE), None);
        assert_eq!(adjusted_size(usize::MAX), None);
    }

    #[test]
    fn block_ref_links() {
        assert_eq!(BlockRef::new(0), None);
        assert_eq!(BlockRef::new(16).map(BlockRef::offset), Some(16));
        assert_eq!(BlockRef::to_link(None), 0);
        assert_eq!(BlockRef::from_link(0), None);
    }

    #[test]
    fn neighbors() {
        with_arena(|arena| {
            arena.set_word(0, 0);
            arena.set_word(4, Tag::new(8, true).bits());
            arena.set_word(8, Tag::new(8, true).bits());
            let a = BlockRef::new(16).unwrap();
            arena.set_tags(a, 24, true);
            let b = arena.next(a);
            assert_eq!(b.offset(), 40);
            arena.set_tags(b, 16, false);
            arena.set_epilogue(arena.next(b).offset());

            assert_eq!(arena.header(a), Tag::new(24, true));
            assert_eq!(arena.footer(a), Tag::new(24, true));
            assert_eq!(arena.prev(b), a);
            assert_eq!(arena.prev(a).offset(), PROLOGUE);
            assert!(arena.prev_footer(a).is_allocated());
            assert!(!arena.next_header(a).is_allocated());
            assert_eq!(arena.next_header(b), Tag::EPILOGUE);

            arena.set_link_prev(b, None);
            arena.set_link_next(b, Some(a));
            assert_eq!(arena.link_prev(b), None);
            assert_eq!(arena.link_next(b), Some(a));
        });
    }

    #[test]
    fn block_of_rejects_foreign_pointers() {
        with_arena(|arena| {
            let base = arena.base().as_ptr();
            let at = |offset: usize| NonNull::new(base.wrapping_add(offset)).unwrap();
            assert_eq!(arena.block_of(at(16)).map(BlockRef::offset), Some(16));
            assert_eq!(arena.block_of(at(8)), None);
            assert_eq!(arena.block_of(at(20)), None);
            assert_eq!(arena.block_of(at(64)), None);
        });
    }

    #[test]
    fn try_word_is_bounds_checked() {
        with_arena(|arena| {
            assert!(arena.try_word(60).is_some());
            assert_eq!(arena.try_word(61), None);
            assert_eq!(arena.try_word(64), None);
            assert_eq!(arena.try_word(usize::MAX - 1), None);
        });
    }

    #[test]
    #[should_panic]
    fn set_word_out_of_bounds() {
        with_arena(|arena| arena.set_word(64, 0));
    }
}
