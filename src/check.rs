//! The consistency checker.
//!
//! Every check walks the arena or the free list using bounds-checked reads
//! only, so it can be pointed at a corrupted heap without faulting. Each
//! check stops at its first violation.
use core::fmt;

use crate::{
    block::{Arena, BlockRef, Tag, DWORD, FIRST_BLOCK, MIN_BLOCK_SIZE, WORD},
    free_list::FreeList,
    Violation,
};

/// The result of [`TagHeap::check`](crate::TagHeap::check).
///
/// Each field holds the first violation found by the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckReport {
    /// Block sizes, header/footer agreement, and the arena walk reaching
    /// the epilogue.
    pub addresses: Option<Violation>,
    /// No allocated block extends into its successor.
    pub overlap: Option<Violation>,
    /// Every free-list member is free and has no free neighbor.
    pub coalescing: Option<Violation>,
    /// Every free block is on the free list, every member is a free block,
    /// and the list's count is right.
    pub free_list: Option<Violation>,
}

impl CheckReport {
    pub(crate) fn run(arena: &Arena, free: &FreeList) -> Self {
        let report = Self {
            addresses: check_addresses(arena).err(),
            overlap: check_overlap(arena).err(),
            coalescing: check_coalescing(arena, free).err(),
            free_list: check_free_list(arena, free).err(),
        };
        for violation in report.violations() {
            log::error!("heap check: {}", violation);
        }
        report
    }

    /// Returns `true` if no check found a violation.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.violations().next().is_none()
    }

    /// Iterate over the violations found.
    #[inline]
    pub fn violations(&self) -> impl Iterator<Item = Violation> {
        [self.addresses, self.overlap, self.coalescing, self.free_list]
            .into_iter()
            .flatten()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("heap is consistent");
        }
        for (i, violation) in self.violations().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

/// A block visited by [`walk`].
struct Visit {
    offset: usize,
    header: Tag,
}

/// Walk the arena from the first ordinary block, calling `f` for every
/// block whose header is readable and whose size keeps the walk in bounds.
/// Returns the offset where the walk stopped, or the first error.
fn walk(
    arena: &Arena,
    mut f: impl FnMut(Visit) -> Result<(), Violation>,
) -> Result<usize, Violation> {
    let mut offset = FIRST_BLOCK;
    loop {
        let addr = arena.addr_of(offset);
        let header = Tag::from_bits(
            arena
                .try_word(offset - WORD)
                .ok_or(Violation::OutOfBounds { addr })?,
        );
        if header.size() == 0 {
            return Ok(offset);
        }
        if header.size() < MIN_BLOCK_SIZE {
            return Err(Violation::BadBlock {
                addr,
                size: header.size(),
            });
        }
        let next = offset
            .checked_add(header.size())
            .filter(|&next| next <= arena.epilogue())
            .ok_or(Violation::OutOfBounds { addr })?;
        f(Visit { offset, header })?;
        offset = next;
    }
}

/// Read the footer of the block at `offset` whose header is `header`.
fn footer(arena: &Arena, offset: usize, header: Tag) -> Option<Tag> {
    arena
        .try_word(offset + header.size() - DWORD)
        .map(Tag::from_bits)
}

fn check_addresses(arena: &Arena) -> Result<(), Violation> {
    let end = walk(arena, |Visit { offset, header }| {
        let addr = arena.addr_of(offset);
        let footer = footer(arena, offset, header).ok_or(Violation::OutOfBounds { addr })?;
        if footer != header {
            return Err(Violation::TagMismatch {
                addr,
                header: header.bits(),
                footer: footer.bits(),
            });
        }
        Ok(())
    })?;

    // The walk must end exactly at a well-formed epilogue
    if end != arena.epilogue() || arena.try_word(end - WORD) != Some(Tag::EPILOGUE.bits()) {
        return Err(Violation::BadEpilogue {
            addr: arena.addr_of(end),
        });
    }
    Ok(())
}

/// Block extents tile the arena by construction: `addr + size` is always the
/// successor's start. An overrun therefore can't make two extents overlap;
/// it shows up as a clobbered footer, which is what the successor uses to
/// find this block. `check_addresses` reports any header/footer mismatch;
/// this check names the allocated block whose payload ran over.
fn check_overlap(arena: &Arena) -> Result<(), Violation> {
    walk(arena, |Visit { offset, header }| {
        if !header.is_allocated() {
            return Ok(());
        }
        if footer(arena, offset, header) == Some(header) {
            Ok(())
        } else {
            Err(Violation::Overlap {
                addr: arena.addr_of(offset),
            })
        }
    })
    .map(drop)
}

fn check_coalescing(arena: &Arena, free: &FreeList) -> Result<(), Violation> {
    for_each_free(arena, free, |block| {
        let offset = block.offset();
        let addr = arena.addr_of(offset);
        let read = |offset: usize| {
            arena
                .try_word(offset)
                .map(Tag::from_bits)
                .ok_or(Violation::OutOfBounds { addr })
        };

        let header = read(offset - WORD)?;
        if header.is_allocated() {
            return Err(Violation::AllocatedInFreeList { addr });
        }
        if header.size() < MIN_BLOCK_SIZE {
            return Err(Violation::BadBlock {
                addr,
                size: header.size(),
            });
        }
        if read(offset + header.size() - DWORD)?.is_allocated() {
            return Err(Violation::AllocatedInFreeList { addr });
        }

        let prev_footer = read(offset - DWORD)?;
        let next_header = read(offset + header.size() - WORD)?;
        if !prev_footer.is_allocated() || !next_header.is_allocated() {
            return Err(Violation::MissedCoalesce { addr });
        }
        Ok(())
    })
    .map(drop)
}

fn check_free_list(arena: &Arena, free: &FreeList) -> Result<(), Violation> {
    let walked = for_each_free(arena, free, |_| Ok(()))?;
    if walked != free.len() {
        return Err(Violation::FreeCountMismatch {
            walked,
            counted: free.len(),
        });
    }

    let mut in_arena = 0;
    walk(arena, |Visit { header, .. }| {
        if !header.is_allocated() {
            in_arena += 1;
        }
        Ok(())
    })?;
    if in_arena == walked {
        // The list has no duplicates (a repeated member would make it cycle
        // past `len`), so equal counts mean every free block is listed.
        return Ok(());
    }

    // Find the culprit. This is quadratic but only runs on a broken heap.
    walk(arena, |Visit { offset, header }| {
        if header.is_allocated() {
            return Ok(());
        }
        let mut found = false;
        for_each_free(arena, free, |block| {
            found |= block.offset() == offset;
            Ok(())
        })?;
        if found {
            Ok(())
        } else {
            Err(Violation::NotInFreeList {
                addr: arena.addr_of(offset),
            })
        }
    })?;
    for_each_free(arena, free, |block| {
        let mut found = false;
        walk(arena, |Visit { offset, header }| {
            found |= offset == block.offset() && !header.is_allocated();
            Ok(())
        })?;
        if found {
            Ok(())
        } else {
            Err(Violation::StrayInFreeList {
                addr: arena.addr_of(block.offset()),
            })
        }
    })
    .map(drop)
}

/// Follow the free list from its head, calling `f` on every member, and
/// return the number of members visited. The walk gives up after
/// `free.len() + 1` steps so that a cycle can't hang it.
fn for_each_free(
    arena: &Arena,
    free: &FreeList,
    mut f: impl FnMut(BlockRef) -> Result<(), Violation>,
) -> Result<usize, Violation> {
    let mut next = free.head();
    let mut count = 0;
    while let Some(block) = next {
        if count > free.len() {
            break;
        }
        let addr = arena.addr_of(block.offset());
        if block.offset() < FIRST_BLOCK || block.offset() >= arena.epilogue() {
            return Err(Violation::OutOfBounds { addr });
        }
        f(block)?;
        count += 1;
        next = arena
            .try_link_next(block)
            .ok_or(Violation::OutOfBounds { addr })?;
    }
    Ok(count)
}
