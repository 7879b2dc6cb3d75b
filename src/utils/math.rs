//! Mathematical utility functions.

use crate::Result;

/// Converts a `usize` to `u32` for PE serialization, returning an error if the value
/// exceeds `u32::MAX`. Every size and offset in a PE image is a 32-bit quantity.
///
/// # Errors
///
/// Returns an error if `value` exceeds `u32::MAX`.
pub fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| malformed_error!("PE serialization value {value} exceeds u32::MAX"))
}

/// Checks if a value is a power of two and returns the exponent.
///
/// Returns `Some(n)` if `value == 2^n`, `None` otherwise.
///
/// # Examples
///
/// ```rust
/// use dotpe::utils::is_power_of_two;
///
/// assert_eq!(is_power_of_two(1), Some(0));
/// assert_eq!(is_power_of_two(512), Some(9));
/// assert_eq!(is_power_of_two(0), None);
/// assert_eq!(is_power_of_two(600), None);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)] // trailing_zeros <= 63 for u64
pub fn is_power_of_two(value: u64) -> Option<u8> {
    if value.is_power_of_two() {
        Some(value.trailing_zeros() as u8)
    } else {
        None
    }
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two; zero is treated as "no alignment".
///
/// ```rust
/// use dotpe::utils::align_up;
///
/// assert_eq!(align_up(300, 0x200), 0x200);
/// assert_eq!(align_up(0x200, 0x200), 0x200);
/// assert_eq!(align_up(0, 0x1000), 0);
/// ```
#[must_use]
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_power_of_two() {
        assert_eq!(is_power_of_two(1), Some(0));
        assert_eq!(is_power_of_two(2), Some(1));
        assert_eq!(is_power_of_two(512), Some(9));
        assert_eq!(is_power_of_two(0x2000), Some(13));
        assert_eq!(is_power_of_two(65536), Some(16));
        assert_eq!(is_power_of_two(1 << 40), Some(40));
    }

    #[test]
    fn test_is_power_of_two_rejects() {
        assert_eq!(is_power_of_two(0), None);
        assert_eq!(is_power_of_two(3), None);
        assert_eq!(is_power_of_two(600), None);
        assert_eq!(is_power_of_two(u64::MAX), None);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 8), 8);
        assert_eq!(align_up(0x1FF, 0x200), 0x200);
        assert_eq!(align_up(0x201, 0x200), 0x400);
        assert_eq!(align_up(0x1F8, 0x2000), 0x2000);
        assert_eq!(align_up(17, 0), 17);
    }

    #[test]
    fn test_to_u32_valid() {
        assert_eq!(to_u32(0).unwrap(), 0);
        assert_eq!(to_u32(1).unwrap(), 1);
        assert_eq!(to_u32(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_to_u32_overflow() {
        assert!(to_u32(u32::MAX as usize + 1).is_err());
        assert!(to_u32(usize::MAX).is_err());
    }
}
