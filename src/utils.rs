/// Round `x` up to a multiple of `align`, which must be a power of two.
/// Returns `None` on overflow.
#[inline]
pub const fn checked_align_up(x: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match x.checked_add(align - 1) {
        Some(x) => Some(x & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up() {
        assert_eq!(checked_align_up(0, 8), Some(0));
        assert_eq!(checked_align_up(1, 8), Some(8));
        assert_eq!(checked_align_up(8, 8), Some(8));
        assert_eq!(checked_align_up(13, 4), Some(16));
        assert_eq!(checked_align_up(usize::MAX, 8), None);
    }
}
