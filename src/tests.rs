use std::{collections::BTreeMap, ops::Range, ptr::NonNull};

use crate::ArenaSource;

/// Tracks which bytes of the arena are handed out to callers.
pub struct ShadowAllocator {
    regions: BTreeMap<usize, SaRegion>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SaRegion {
    Free,
    Used,
    Invalid,
}

impl Default for ShadowAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowAllocator {
    pub fn new() -> Self {
        Self {
            regions: Some((0, SaRegion::Invalid)).into_iter().collect(),
        }
    }

    pub fn convert_range(
        &mut self,
        range: Range<usize>,
        old_region: SaRegion,
        new_region: SaRegion,
    ) {
        if range.len() == 0 {
            return;
        }

        assert_ne!(old_region, new_region);
        log::trace!(
            "sa: converting {:?} from {:?} to {:?}",
            range,
            old_region,
            new_region
        );

        let (&addr, &region) = self.regions.range(0..range.end).rev().next().unwrap();
        if addr > range.start {
            panic!("there's a discontinuity in range {:?}", range);
        } else if region != old_region {
            panic!(
                "range {:?} is {:?} (expected {:?})",
                range, region, old_region
            );
        }

        // Insert an element at `range.start`
        if addr == range.start {
            *self.regions.get_mut(&addr).unwrap() = new_region;
        } else {
            self.regions.insert(range.start, new_region);
        }

        // Each element must represent a discontinuity. If it doesnt't represent
        // a discontinuity, it must be removed.
        if let Some((_, &region)) = self.regions.range(0..range.start).rev().next() {
            if region == new_region {
                self.regions.remove(&range.start);
            }
        }

        if let Some(&end_region) = self.regions.get(&range.end) {
            // Each element must represent a discontinuity. If it doesnt't
            // represent a discontinuity, it must be removed.
            if end_region == new_region {
                self.regions.remove(&range.end);
            }
        } else {
            // Insert an element at `range.end`
            self.regions.insert(range.end, old_region);
        }
    }

    /// Record memory newly obtained from an arena source.
    pub fn insert_arena(&mut self, start: NonNull<u8>, len: usize) {
        let start = start.as_ptr() as usize;
        self.convert_range(start..start + len, SaRegion::Invalid, SaRegion::Free);
    }

    pub fn allocate(&mut self, start: NonNull<u8>, len: usize) {
        let start = start.as_ptr() as usize;
        assert!(
            start % crate::ALIGNMENT == 0,
            "0x{:x} is not properly aligned",
            start
        );
        self.convert_range(start..start + len, SaRegion::Free, SaRegion::Used);
    }

    pub fn deallocate(&mut self, start: NonNull<u8>, len: usize) {
        let start = start.as_ptr() as usize;
        self.convert_range(start..start + len, SaRegion::Used, SaRegion::Free);
    }
}

/// An [`ArenaSource`] wrapper feeding a [`ShadowAllocator`] and counting
/// calls.
#[derive(Default)]
pub struct TrackingSource<T> {
    pub sa: ShadowAllocator,
    pub inner: T,
    pub num_calls: usize,
}

impl<T> TrackingSource<T> {
    pub fn new(inner: T) -> Self {
        Self {
            sa: ShadowAllocator::new(),
            inner,
            num_calls: 0,
        }
    }
}

unsafe impl<T: ArenaSource> ArenaSource for TrackingSource<T> {
    fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>> {
        log::trace!("ArenaSource::sbrk({:?})", increment);
        self.num_calls += 1;
        let ptr = self.inner.sbrk(increment)?;
        log::trace!(" ArenaSource::sbrk(...) = {:?}", ptr);
        self.sa.insert_arena(ptr, increment);
        Some(ptr)
    }
}

/// Fails every request after the first `budget` bytes.
pub struct LimitedSource<T> {
    pub inner: T,
    pub budget: usize,
}

unsafe impl<T: ArenaSource> ArenaSource for LimitedSource<T> {
    fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>> {
        self.budget = self.budget.checked_sub(increment)?;
        self.inner.sbrk(increment)
    }
}
