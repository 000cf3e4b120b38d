//! Alignment arithmetic over unsigned integers
//!
//! Every helper except [`is_power_of_2`] assumes `alignment` is a power of
//! two. Callers validate that once, at the boundary where the alignment is
//! configured, and then use the mask-based helpers on the hot path.

use std::ops::{Add, BitAnd, Not, Sub};

/// Unsigned integer types usable with the alignment helpers
pub trait Unsigned:
    Copy
    + Eq
    + Add<Output = Self>
    + Sub<Output = Self>
    + BitAnd<Output = Self>
    + Not<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
}

impl Unsigned for u32 {
    const ZERO: Self = 0;
    const ONE: Self = 1;
}

impl Unsigned for u64 {
    const ZERO: Self = 0;
    const ONE: Self = 1;
}

impl Unsigned for usize {
    const ZERO: Self = 0;
    const ONE: Self = 1;
}

/// Returns true if `x` is a power of two (zero is not)
#[inline]
#[must_use]
pub fn is_power_of_2<T: Unsigned>(x: T) -> bool {
    x != T::ZERO && (x & (x - T::ONE)) == T::ZERO
}

/// `x % alignment` for a power-of-two `alignment`
#[inline]
#[must_use]
pub fn mod_by_power_of_2<T: Unsigned>(x: T, alignment: T) -> T {
    x & (alignment - T::ONE)
}

/// Smallest multiple of `alignment` that is `>= x`
#[inline]
#[must_use]
pub fn round_up_to_multiple_of_power_of_2<T: Unsigned>(x: T, alignment: T) -> T {
    let mask = alignment - T::ONE;
    (x + mask) & !mask
}

/// Largest multiple of `alignment` that is `<= x`
#[inline]
#[must_use]
pub fn round_down_to_multiple_of_power_of_2<T: Unsigned>(x: T, alignment: T) -> T {
    x & !(alignment - T::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_is_power_of_2() {
        assert!(!is_power_of_2(0u64));
        assert!(is_power_of_2(1u64));
        assert!(is_power_of_2(2u32));
        assert!(!is_power_of_2(3u32));
        assert!(is_power_of_2(4096usize));
        assert!(!is_power_of_2(4095usize));
        assert!(is_power_of_2(1u64 << 63));
        assert!(!is_power_of_2(u64::MAX));
    }

    #[test]
    fn test_mod_and_round() {
        assert_eq!(mod_by_power_of_2(0u64, 512), 0);
        assert_eq!(mod_by_power_of_2(100u64, 512), 100);
        assert_eq!(mod_by_power_of_2(512u64, 512), 0);
        assert_eq!(mod_by_power_of_2(8193u64, 4096), 1);

        assert_eq!(round_up_to_multiple_of_power_of_2(0usize, 512), 0);
        assert_eq!(round_up_to_multiple_of_power_of_2(1usize, 512), 512);
        assert_eq!(round_up_to_multiple_of_power_of_2(512usize, 512), 512);
        assert_eq!(round_up_to_multiple_of_power_of_2(562usize, 512), 1024);

        assert_eq!(round_down_to_multiple_of_power_of_2(562u32, 512), 512);
        assert_eq!(round_down_to_multiple_of_power_of_2(511u32, 512), 0);
    }

    #[test]
    fn test_matches_integer_division() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let alignment = 1u64 << rng.gen_range(0..20);
            let x: u64 = rng.gen_range(0..(1 << 40));
            assert_eq!(mod_by_power_of_2(x, alignment), x % alignment);
            assert_eq!(
                round_up_to_multiple_of_power_of_2(x, alignment),
                x.div_ceil(alignment) * alignment
            );
            assert_eq!(
                round_down_to_multiple_of_power_of_2(x, alignment),
                x / alignment * alignment
            );
        }
    }
}
