//! Fixed point helpers of the Silk layer.
//!
//! Silk synthesis is normative integer arithmetic; these mirror the
//! operator set of the RFC 6716 reference decoder so the filter states
//! evolve identically on every platform.

/// `(a * b) >> 16` with `b` treated as the bottom 16 bits, signed.
#[inline(always)]
pub(crate) fn smulwb(a: i32, b: i32) -> i32 {
    ((a as i64 * (b as i16) as i64) >> 16) as i32
}

/// `a + ((b * c) >> 16)` with `c` treated as the bottom 16 bits, signed.
#[inline(always)]
pub(crate) fn smlawb(a: i32, b: i32, c: i32) -> i32 {
    a.wrapping_add(((b as i64 * (c as i16) as i64) >> 16) as i32)
}

/// `(a * b) >> 16` full 32x32 multiply.
#[inline(always)]
pub(crate) fn smulww(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) >> 16) as i32
}

/// `a + ((b * c) >> 16)` full 32x32 multiply.
#[inline(always)]
pub(crate) fn smlaww(a: i32, b: i32, c: i32) -> i32 {
    a.wrapping_add(((b as i64 * c as i64) >> 16) as i32)
}

/// 16x16 multiply of the bottom halves.
#[inline(always)]
pub(crate) fn smulbb(a: i32, b: i32) -> i32 {
    (a as i16 as i32) * (b as i16 as i32)
}

/// `a + b * c` on the bottom halves.
#[inline(always)]
pub(crate) fn smlabb(a: i32, b: i32, c: i32) -> i32 {
    a.wrapping_add((b as i16 as i32) * (c as i16 as i32))
}

/// Shift right with rounding.
#[inline(always)]
pub(crate) fn rshift_round(a: i32, shift: u32) -> i32 {
    debug_assert!(shift > 0);
    if shift == 1 {
        (a >> 1) + (a & 1)
    } else {
        ((a >> (shift - 1)) + 1) >> 1
    }
}

/// Saturate to 16 bits.
#[inline(always)]
pub(crate) fn sat16(a: i32) -> i16 {
    if a > i16::MAX as i32 {
        i16::MAX
    } else if a < i16::MIN as i32 {
        i16::MIN
    } else {
        a as i16
    }
}

/// Saturating addition.
#[inline(always)]
pub(crate) fn add_sat32(a: i32, b: i32) -> i32 {
    a.saturating_add(b)
}

/// Saturating left shift.
#[inline(always)]
pub(crate) fn lshift_sat32(a: i32, shift: u32) -> i32 {
    a.saturating_mul(1 << shift)
}

/// The pseudorandom generator of the excitation sign scrambling.
#[inline(always)]
pub(crate) fn silk_rand(seed: i32) -> i32 {
    907_633_515_i32.wrapping_add(seed.wrapping_mul(196_314_165))
}

/// Number of leading zeros and a Q7 fractional part of the first non-zero
/// bits, used by the log routines.
fn clz_frac(input: i32) -> (i32, i32) {
    let in_u = input as u32;
    let lz = in_u.leading_zeros() as i32;
    // The 7 bits below the leading one.
    let frac = ((in_u.wrapping_shl(lz as u32) >> 24) & 0x7F) as i32;
    (lz, frac)
}

/// Approximate `128 * log2(input)`.
pub(crate) fn lin2log(input: i32) -> i32 {
    let (lz, frac_q7) = clz_frac(input);
    ((31 - lz) << 7) + smlawb(frac_q7, frac_q7 * (128 - frac_q7), 179)
}

/// Approximate `2 ^ (in_log / 128)`.
pub(crate) fn log2lin(in_log_q7: i32) -> i32 {
    if in_log_q7 < 0 {
        return 0;
    } else if in_log_q7 >= 3967 {
        return i32::MAX;
    }
    let mut out = 1_i32 << (in_log_q7 >> 7);
    let frac_q7 = in_log_q7 & 0x7F;
    if in_log_q7 < 2048 {
        // Piece-wise parabolic approximation.
        out += (out * smlawb(frac_q7, frac_q7 * (128 - frac_q7), -174)) >> 7;
    } else {
        out = out.wrapping_add((out >> 7).wrapping_mul(smlawb(
            frac_q7,
            frac_q7 * (128 - frac_q7),
            -174,
        )));
    }
    out
}

/// Approximate square root of a positive integer.
pub(crate) fn sqrt_approx(x: i32) -> i32 {
    if x <= 0 {
        return 0;
    }
    let (lz, frac_q7) = clz_frac(x);
    let mut y = if lz & 1 != 0 { 32768 } else { 46214 };
    // Get scaling right.
    y >>= lz >> 1;
    // Increment using fractional part of input.
    smlawb(y, y, smulbb(213, frac_q7))
}

/// `(a << qres) / b` with rounding, for positive `b`.
pub(crate) fn div32_varq(a: i32, b: i32, qres: u32) -> i32 {
    debug_assert!(b != 0);
    (((a as i64) << qres) / b as i64) as i32
}

/// `(1 << qres) / b`.
pub(crate) fn inverse32_varq(b: i32, qres: u32) -> i32 {
    debug_assert!(b != 0);
    ((1_i64 << qres) / b as i64) as i32
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_log_round_trip() {
        [1_i32, 2, 3, 100, 4096, 65536, 1 << 20, i32::MAX / 2]
            .iter()
            .for_each(|&x| {
                let log = lin2log(x);
                let back = log2lin(log);
                let ratio = back as f64 / x as f64;
                assert!(
                    ratio > 0.98 && ratio < 1.02,
                    "x = {}, back = {}, ratio = {}",
                    x,
                    back,
                    ratio
                );
            });
    }

    #[test]
    fn test_lin2log_monotone() {
        let mut last = i32::MIN;
        let mut x = 1_i32;
        while x < 1 << 30 {
            let l = lin2log(x);
            assert!(l >= last);
            last = l;
            x = x * 3 / 2 + 1;
        }
    }

    #[test]
    fn test_sqrt_approx() {
        [4_i32, 100, 1024, 65536, 1 << 24].iter().for_each(|&x| {
            let r = sqrt_approx(x) as f64;
            let exact = (x as f64).sqrt();
            assert!(
                (r / exact - 1.0).abs() < 0.02,
                "sqrt({}) = {} vs {}",
                x,
                r,
                exact
            );
        });
    }

    #[test]
    fn test_rand_sequence_matches_reference_formula() {
        let mut seed = 0_i32;
        seed = silk_rand(seed);
        assert_eq!(seed, 907_633_515);
        seed = silk_rand(seed);
        assert_eq!(
            seed,
            907_633_515_i32.wrapping_add(907_633_515_i32.wrapping_mul(196_314_165))
        );
    }

    #[test]
    fn test_rshift_round() {
        assert_eq!(rshift_round(7, 1), 4);
        assert_eq!(rshift_round(6, 1), 3);
        assert_eq!(rshift_round(-7, 1), -3);
        assert_eq!(rshift_round(100, 3), 13);
    }
}
