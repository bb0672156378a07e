//! Tunables of [`TagHeap`](crate::TagHeap).
use crate::Init;

/// The default amount of memory, in bytes, requested from the arena source
/// when no free block can satisfy an allocation.
pub const CHUNK_SIZE: usize = 1 << 13;

/// How allocation requests find their blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Scan the free list from its head and take the first block that is
    /// large enough, splitting off any usable remainder.
    FirstFit,
    /// Never reuse memory: every allocation grows the arena by exactly the
    /// block it needs, and deallocation is a no-op.
    ///
    /// This is only useful as a baseline.
    Bump,
}

/// How [`TagHeap::resize`](crate::TagHeap::resize) grows a block whose
/// capacity is insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeStrategy {
    /// Absorb the following block if it's free and large enough; relocate
    /// otherwise.
    InPlace,
    /// Always relocate.
    Relocate,
}

/// When the consistency checker runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckMode {
    /// Only when [`TagHeap::check`](crate::TagHeap::check) is called.
    Never,
    /// After every coalescing step. Violations are logged.
    AfterCoalesce,
}

/// The configuration of a [`TagHeap`](crate::TagHeap).
///
/// ```
/// use tagheap::{CheckMode, Config, Placement};
///
/// const CONFIG: Config = Config::INIT
///     .with_chunk_size(4096)
///     .with_check(CheckMode::AfterCoalesce);
/// assert_eq!(CONFIG.placement, Placement::FirstFit);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
    /// The minimum number of bytes to grow the arena by when no free block
    /// fits. Rounded up to an even number of words by the heap.
    pub chunk_size: usize,
    pub placement: Placement,
    pub resize: ResizeStrategy,
    pub check: CheckMode,
}

impl Config {
    /// First-fit placement, in-place resizing, [`CHUNK_SIZE`]-byte growth,
    /// and automatic checking in debug builds.
    pub const INIT: Self = Self {
        chunk_size: CHUNK_SIZE,
        placement: Placement::FirstFit,
        resize: ResizeStrategy::InPlace,
        check: if cfg!(debug_assertions) {
            CheckMode::AfterCoalesce
        } else {
            CheckMode::Never
        },
    };

    /// The baseline bump allocator.
    pub const BUMP: Self = Self::INIT.with_placement(Placement::Bump);

    #[inline]
    pub const fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self { chunk_size, ..self }
    }

    #[inline]
    pub const fn with_placement(self, placement: Placement) -> Self {
        Self { placement, ..self }
    }

    #[inline]
    pub const fn with_resize(self, resize: ResizeStrategy) -> Self {
        Self { resize, ..self }
    }

    #[inline]
    pub const fn with_check(self, check: CheckMode) -> Self {
        Self { check, ..self }
    }
}

impl Init for Config {
    const INIT: Self = Self::INIT;
}

impl const_default1::ConstDefault for Config {
    const DEFAULT: Self = Self::INIT;
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self::INIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use const_default1::ConstDefault;

    #[test]
    fn defaults_agree() {
        assert_eq!(Config::default(), Config::INIT);
        assert_eq!(<Config as ConstDefault>::DEFAULT, Config::INIT);
        assert_eq!(<Config as Init>::INIT, Config::INIT);
        assert_eq!(Config::INIT.chunk_size, CHUNK_SIZE);
        assert_eq!(Config::BUMP.placement, Placement::Bump);
        assert_eq!(Config::BUMP.resize, ResizeStrategy::InPlace);
    }

    #[test]
    fn builders() {
        let config = Config::INIT
            .with_chunk_size(64)
            .with_resize(ResizeStrategy::Relocate)
            .with_check(CheckMode::Never);
        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.resize, ResizeStrategy::Relocate);
        assert_eq!(config.check, CheckMode::Never);
        assert_eq!(config.placement, Placement::FirstFit);
    }
}
