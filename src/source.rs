//! Arena sources: the memory-extension primitive a [`TagHeap`] grows into.
//!
//! [`TagHeap`]: crate::TagHeap
use core::{marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::{utils::checked_align_up, ALIGNMENT};

/// The trait for types that supply a contiguous, growable memory region.
///
/// # Safety
///
/// Every successful call to [`sbrk`](Self::sbrk) must return a range of
/// `increment` bytes, valid for reads and writes and not accessed by anyone
/// else, that starts exactly where the previous successful call's range
/// ended. The memory must remain valid until `self` is dropped.
pub unsafe trait ArenaSource {
    /// Append `increment` bytes to the region and return the address of the
    /// first new byte, or `None` if the region cannot grow by that much.
    ///
    /// A failed call must leave the region unchanged.
    fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>>;
}

unsafe impl<T: ?Sized + ArenaSource> ArenaSource for &mut T {
    #[inline]
    fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>> {
        (**self).sbrk(increment)
    }
}

/// An [`ArenaSource`] carving its region out of a caller-provided memory
/// pool of fixed capacity.
///
/// The start of the pool is rounded up to [`ALIGNMENT`] bytes.
///
/// ```
/// use std::mem::MaybeUninit;
/// use tagheap::{ArenaSource, FixedArena};
///
/// let mut pool = [MaybeUninit::uninit(); 64];
/// let mut arena = FixedArena::new(&mut pool);
/// let a = arena.sbrk(16).unwrap();
/// let b = arena.sbrk(16).unwrap();
/// assert_eq!(a.as_ptr() as usize + 16, b.as_ptr() as usize);
/// assert!(arena.sbrk(64).is_none());
/// ```
#[derive(Debug)]
pub struct FixedArena<'pool> {
    start: NonNull<u8>,
    capacity: usize,
    brk: usize,
    _phantom: PhantomData<&'pool mut ()>,
}

// Safety: The pool is logically owned by `FixedArena`
unsafe impl Send for FixedArena<'_> {}

impl<'pool> FixedArena<'pool> {
    /// Construct a `FixedArena` over `pool`.
    #[inline]
    pub fn new(pool: &'pool mut [MaybeUninit<u8>]) -> Self {
        // Safety: `pool` is a mutable reference, which guarantees the absence
        //         of aliasing references, and it outlives `Self`.
        unsafe { Self::from_raw(NonNull::new_unchecked(pool as *mut [_] as *mut [u8])) }
    }

    /// Construct a `FixedArena` over the memory block specified by a slice
    /// pointer.
    ///
    /// # Safety
    ///
    /// The memory block must be valid for reads and writes, must not be
    /// accessed by anyone else, and must outlive `Self`.
    pub unsafe fn from_raw(pool: NonNull<[u8]>) -> Self {
        let len = pool.len();
        let unaligned_start = pool.cast::<u8>().as_ptr() as usize;
        let (start, capacity) = match checked_align_up(unaligned_start, ALIGNMENT) {
            Some(start) => (start, len.saturating_sub(start - unaligned_start)),
            None => (unaligned_start, 0),
        };
        Self {
            // Safety: `start` is either the original non-null pointer or
            //         larger than it
            start: NonNull::new_unchecked(start as *mut u8),
            capacity,
            brk: 0,
            _phantom: PhantomData,
        }
    }

    /// The number of usable bytes in the pool.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bytes handed out so far.
    #[inline]
    pub fn brk(&self) -> usize {
        self.brk
    }

    /// The number of bytes that can still be handed out.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

unsafe impl ArenaSource for FixedArena<'_> {
    #[inline]
    fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>> {
        if increment > self.remaining() {
            log::debug!(
                "FixedArena: cannot grow by {} bytes ({} of {} used)",
                increment,
                self.brk,
                self.capacity
            );
            return None;
        }
        // Safety: `brk <= capacity`, so this is inside the pool or one past
        //         its end
        let ptr = unsafe { NonNull::new_unchecked(self.start.as_ptr().add(self.brk)) };
        self.brk += increment;
        Some(ptr)
    }
}

#[cfg(feature = "std")]
mod owned {
    use super::*;
    use std::{boxed::Box, vec::Vec};

    /// An [`ArenaSource`] owning a heap-allocated pool of fixed capacity.
    #[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
    #[derive(Debug)]
    pub struct OwnedArena {
        pool: NonNull<[MaybeUninit<u64>]>,
        inner: FixedArena<'static>,
    }

    // Safety: The pool is owned by `OwnedArena`
    unsafe impl Send for OwnedArena {}

    impl OwnedArena {
        /// Allocate a pool of at least `capacity` bytes.
        pub fn with_capacity(capacity: usize) -> Self {
            let words = (capacity + 7) / 8;
            let mut pool = Vec::with_capacity(words);
            pool.resize(words, MaybeUninit::<u64>::uninit());
            let pool = Box::into_raw(pool.into_boxed_slice());
            // Safety: `Box::into_raw` never returns null
            let pool = unsafe { NonNull::new_unchecked(pool) };
            let bytes =
                core::ptr::slice_from_raw_parts_mut(pool.as_ptr() as *mut u8, words * 8);
            // Safety: The pool is exclusively ours until `drop`, and `inner`
            //         is dropped together with it
            let inner = unsafe { FixedArena::from_raw(NonNull::new_unchecked(bytes)) };
            Self { pool, inner }
        }

        #[inline]
        pub fn capacity(&self) -> usize {
            self.inner.capacity()
        }

        #[inline]
        pub fn brk(&self) -> usize {
            self.inner.brk()
        }
    }

    unsafe impl ArenaSource for OwnedArena {
        #[inline]
        fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>> {
            self.inner.sbrk(increment)
        }
    }

    impl Drop for OwnedArena {
        fn drop(&mut self) {
            // Safety: `pool` came from `Box::into_raw`
            drop(unsafe { Box::from_raw(self.pool.as_ptr()) });
        }
    }
}

#[cfg(feature = "std")]
pub use self::owned::OwnedArena;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use self::unix::Sbrk;
    }
}
