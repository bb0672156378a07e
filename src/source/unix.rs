use core::ptr::NonNull;

use crate::ALIGNMENT;

/// An [`ArenaSource`](super::ArenaSource) growing the process's data segment
/// with `sbrk(2)`.
///
/// The program break is shared with anything else in the process that calls
/// `brk`/`sbrk` (including, on some platforms, the system allocator). If
/// someone else moves the break between two calls, the region would no
/// longer be contiguous, so `Sbrk` refuses to grow further instead.
#[derive(Debug)]
pub struct Sbrk {
    /// The break we left behind after the last successful call.
    expected_brk: Option<NonNull<u8>>,
}

// Safety: The memory handed out is owned by whoever owns `Sbrk`
unsafe impl Send for Sbrk {}

impl Sbrk {
    /// Construct an `Sbrk`.
    ///
    /// # Safety
    ///
    /// Nothing else may lower the program break below the memory handed out
    /// by `Self` while that memory is in use.
    #[inline]
    pub const unsafe fn new() -> Self {
        Self { expected_brk: None }
    }

    /// Move the break by `increment` bytes and return the old break.
    #[inline]
    fn raw_sbrk(increment: usize) -> Option<NonNull<u8>> {
        let increment = libc::intptr_t::try_from(increment).ok()?;
        // Safety: Raising the break does not invalidate any memory
        let ptr = unsafe { libc::sbrk(increment) };
        if ptr as usize == usize::MAX {
            // `(void *) -1`
            return None;
        }
        NonNull::new(ptr as *mut u8)
    }
}

unsafe impl super::ArenaSource for Sbrk {
    fn sbrk(&mut self, increment: usize) -> Option<NonNull<u8>> {
        let start = match self.expected_brk {
            Some(expected) => {
                let old = Self::raw_sbrk(increment)?;
                if old != expected {
                    // Somebody moved the break behind our back. The memory we
                    // just got is not adjacent to ours and is leaked.
                    log::warn!(
                        "Sbrk: program break moved from {:p} to {:p}; refusing to grow",
                        expected,
                        old
                    );
                    return None;
                }
                old
            }
            None => {
                // Pad the first region so that it starts at an aligned address
                let current = Self::raw_sbrk(0)?.as_ptr() as usize;
                let padding = current.wrapping_neg() % ALIGNMENT;
                let padded = Self::raw_sbrk(padding.checked_add(increment)?)?;
                // Safety: `padded + padding` is inside the new region
                unsafe { NonNull::new_unchecked(padded.as_ptr().add(padding)) }
            }
        };

        // Safety: `start..start + increment` was just obtained
        self.expected_brk = Some(unsafe { NonNull::new_unchecked(start.as_ptr().add(increment)) });
        log::trace!("Sbrk::sbrk({}) = {:p}", increment, start);
        Some(start)
    }
}
