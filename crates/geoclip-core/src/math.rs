//! Integer helpers for floor division and toroidal addressing.

/// Floor division (rounds towards negative infinity).
#[inline]
pub fn div_floor(value: i64, divisor: i64) -> i64 {
    let mut q = value / divisor;
    let r = value % divisor;
    if r != 0 && ((r > 0) != (divisor > 0)) {
        q -= 1;
    }
    q
}

/// Floor modulo, always in `[0, modulus)` for a positive modulus.
#[inline]
pub fn mod_floor(value: i64, modulus: i64) -> i64 {
    let r = value % modulus;
    if r < 0 {
        r + modulus
    } else {
        r
    }
}

/// Wrap a tile or texel coordinate into `[0, modulus)`.
///
/// Valid for every `i64`, including values far below zero.
#[inline]
pub fn wrap_coord_for_tile(x: i64, modulus: u32) -> u32 {
    debug_assert!(modulus > 0, "wrap modulus must be positive");
    mod_floor(x, i64::from(modulus)) as u32
}

/// Ceiling division for unsigned sizes.
#[inline]
pub const fn div_ceil_u32(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Split a run of `len` texels starting at `start` on a ring of `size`
/// texels into at most two contiguous `(start, len)` spans.
///
/// `len` is clamped to `size`.
pub fn wrapped_spans(start: i64, len: u32, size: u32) -> impl Iterator<Item = (u32, u32)> {
    let len = len.min(size);
    let first = wrap_coord_for_tile(start, size);
    let head = len.min(size - first);
    let tail = len - head;
    [
        (head > 0).then_some((first, head)),
        (tail > 0).then_some((0, tail)),
    ]
    .into_iter()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_matches_euclid_for_positive_divisors() {
        for value in -100..100 {
            for divisor in 1..9 {
                assert_eq!(div_floor(value, divisor), value.div_euclid(divisor));
                assert_eq!(mod_floor(value, divisor), value.rem_euclid(divisor));
            }
        }
    }

    #[test]
    fn wrap_handles_large_negatives() {
        for x in [i64::MIN + 1, -1_000_000_007, -257, -256, -1, 0, 1, 255, 256, i64::MAX] {
            for modulus in [1u32, 3, 16, 256, 1000] {
                let wrapped = wrap_coord_for_tile(x, modulus);
                assert!(wrapped < modulus);
                let m = i64::from(modulus);
                assert_eq!(i64::from(wrapped), (x % m + m) % m);
            }
        }
    }

    #[test]
    fn spans_split_at_wrap_boundary() {
        let spans: Vec<_> = wrapped_spans(254, 4, 256).collect();
        assert_eq!(spans, vec![(254, 2), (0, 2)]);

        let spans: Vec<_> = wrapped_spans(-2, 2, 256).collect();
        assert_eq!(spans, vec![(254, 2)]);

        let spans: Vec<_> = wrapped_spans(10, 3, 256).collect();
        assert_eq!(spans, vec![(10, 3)]);
    }

    #[test]
    fn spans_cover_whole_ring_when_saturated() {
        let spans: Vec<_> = wrapped_spans(100, 999, 256).collect();
        let total: u32 = spans.iter().map(|(_, len)| len).sum();
        assert_eq!(total, 256);
        assert_eq!(spans, vec![(100, 156), (0, 100)]);
    }

    #[test]
    fn empty_span() {
        assert_eq!(wrapped_spans(7, 0, 16).count(), 0);
    }
}
