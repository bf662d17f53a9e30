//! Implements the codeword enumeration of pulse vectors.
//!
//! A band shape is an integer vector `y` with `sum(|y[i]|) == k`. The number
//! of such vectors is `V(n, k)`, and this module provides the bijection
//! between the vectors and the integers `[0, V(n, k))` that the range coder
//! transports.
//!
//! Everything is built on `U(n, k)`, the number of such vectors whose first
//! non-zero element is positive, with the recurrences
//!
//! ```text
//! U(n, k) = U(n - 1, k) + U(n, k - 1) + U(n - 1, k - 1)
//! V(n, k) = U(n, k) + U(n, k + 1)
//! U(n, k + 1) = U(n, k) + V(n - 1, k)
//! ```
//!
//! The rows are computed on the fly in 64 bit saturating arithmetic; bands
//! whose `V(n, k)` does not fit in 32 bits are split before they reach this
//! module.

use crate::encoder_error::EncoderError;
use crate::range_coder::{RangeDecoder, RangeEncoder};

/// `U(m, j)` for `m in 0..=n` and `j in 0..=k_max`, as a row-major table.
struct UTable {
    k_max: usize,
    rows: Vec<u64>,
}

impl UTable {
    fn new(n: usize, k_max: usize) -> Self {
        let width = k_max + 1;
        let mut rows = vec![0_u64; (n + 1) * width];
        if n >= 1 {
            // U(1, k) = 1 for k > 0.
            rows[width + 1..2 * width].iter_mut().for_each(|u| *u = 1);
        }
        (2..=n).for_each(|m| {
            (1..=k_max).for_each(|j| {
                let value = rows[(m - 1) * width + j]
                    .saturating_add(rows[m * width + j - 1])
                    .saturating_add(rows[(m - 1) * width + j - 1]);
                rows[m * width + j] = value;
            });
        });
        Self { k_max, rows }
    }

    #[inline(always)]
    fn u(&self, m: usize, j: usize) -> u64 {
        self.rows[m * (self.k_max + 1) + j]
    }
}

/// The number of pulse vectors of dimension `n` with L1 norm `k`,
/// saturating at `u64::MAX`.
pub(crate) fn pvq_size(n: usize, k: usize) -> u64 {
    if k == 0 {
        return 1;
    }
    if n == 0 {
        return 0;
    }
    let table = UTable::new(n, k + 1);
    table.u(n, k).saturating_add(table.u(n, k + 1))
}

/// True if `V(n, k)` is codable as a single range coder symbol.
pub(crate) fn fits_in_32(n: usize, k: usize) -> bool {
    pvq_size(n, k) <= u32::MAX as u64
}

/// Maps a pulse vector to its codeword and writes it to the range encoder.
///
/// `V(n, k)` of the vector must fit in 32 bits.
pub(crate) fn encode_pulses(
    y: &[i32],
    k: usize,
    enc: &mut RangeEncoder,
) -> Result<(), EncoderError> {
    let n = y.len();
    debug_assert!(n > 0 && k > 0);
    debug_assert_eq!(y.iter().map(|v| v.unsigned_abs() as usize).sum::<usize>(), k);

    let table = UTable::new(n, k + 1);

    // Build the index scanning from the last dimension to the first. At
    // every step `tail` is the norm of the dimensions already processed.
    let mut j = n - 1;
    let mut index: u64 = u64::from(y[j] < 0);
    let mut tail = y[j].unsigned_abs() as usize;
    while j > 0 {
        j -= 1;
        let m = n - j;
        index += table.u(m, tail);
        tail += y[j].unsigned_abs() as usize;
        if y[j] < 0 {
            index += table.u(m, tail + 1);
        }
    }
    debug_assert_eq!(tail, k);

    let total = table.u(n, k).saturating_add(table.u(n, k + 1));
    debug_assert!(total <= u32::MAX as u64);
    debug_assert!(index < total);
    enc.encode_uint(index as u32, total as u32)
}

/// Reads a codeword from the range decoder and expands it into the pulse
/// vector it enumerates.
pub(crate) fn decode_pulses(y: &mut [i32], k: usize, dec: &mut RangeDecoder) {
    let n = y.len();
    debug_assert!(n > 0 && k > 0);

    let table = UTable::new(n, k + 1);
    let total = table.u(n, k).saturating_add(table.u(n, k + 1));
    debug_assert!(total <= u32::MAX as u64);

    let mut index = u64::from(dec.decode_uint(total as u32));
    let mut remaining = k;

    (0..n).for_each(|j| {
        let m = n - j;
        if m == 1 {
            y[j] = if index > 0 {
                -(remaining as i32)
            } else {
                remaining as i32
            };
            return;
        }

        let p = table.u(m, remaining + 1);
        let negative = index >= p;
        if negative {
            index -= p;
        }

        // The tail norm is the largest value whose codeword count does not
        // exceed what is left of the index.
        let mut tail = remaining;
        while table.u(m, tail) > index {
            tail -= 1;
        }
        index -= table.u(m, tail);

        let pulses = (remaining - tail) as i32;
        y[j] = if negative { -pulses } else { pulses };
        remaining = tail;
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::range_coder::Tell;

    /// Exhaustively lists every vector of dimension n with L1 norm k.
    fn enumerate(n: usize, k: i32) -> Vec<Vec<i32>> {
        if n == 1 {
            if k == 0 {
                return vec![vec![0]];
            }
            return vec![vec![k], vec![-k]];
        }
        let mut all = Vec::new();
        (-k..=k).for_each(|head| {
            enumerate(n - 1, k - head.abs()).into_iter().for_each(|mut rest| {
                let mut v = vec![head];
                v.append(&mut rest);
                all.push(v);
            });
        });
        all
    }

    #[test]
    fn test_pvq_size_small_dimensions() {
        (1..=9_usize).for_each(|k| {
            assert_eq!(pvq_size(1, k), 2);
            assert_eq!(pvq_size(2, k), 4 * k as u64);
        });
        assert_eq!(pvq_size(3, 2), 18);
        (1..=6_usize).for_each(|n| {
            (1..=6_i32).for_each(|k| {
                assert_eq!(
                    pvq_size(n, k as usize),
                    enumerate(n, k).len() as u64,
                    "V({}, {})",
                    n,
                    k
                );
            });
        });
    }

    #[test]
    fn test_round_trip_exhaustive() {
        (1..=5_usize).for_each(|n| {
            (1..=5_i32).for_each(|k| {
                enumerate(n, k).iter().for_each(|v| {
                    let mut buffer = vec![0_u8; 16];
                    let mut enc = crate::range_coder::RangeEncoder::new(&mut buffer);
                    encode_pulses(v, k as usize, &mut enc).unwrap();
                    enc.done().unwrap();
                    drop(enc);

                    let mut dec = crate::range_coder::RangeDecoder::new(&buffer);
                    let mut decoded = vec![0_i32; n];
                    decode_pulses(&mut decoded, k as usize, &mut dec);
                    assert_eq!(&decoded, v, "n = {}, k = {}", n, k);
                });
            });
        });
    }

    #[test]
    fn test_round_trip_large() {
        use nanorand::RNG;
        let mut rnd = nanorand::WyRand::new_seed(22222);

        (0..200).for_each(|_| {
            let n = rnd.generate_range::<usize>(2, 100);
            let mut k = rnd.generate_range::<usize>(1, 32);
            while !fits_in_32(n, k) {
                k /= 2;
            }

            // Scatter k pulses randomly.
            let mut y = vec![0_i32; n];
            (0..k).for_each(|_| {
                let pos = rnd.generate_range::<usize>(0, n);
                if y[pos] < 0 || (y[pos] == 0 && rnd.generate_range::<u32>(0, 2) == 1) {
                    y[pos] -= 1;
                } else {
                    y[pos] += 1;
                }
            });

            let mut buffer = vec![0_u8; 64];
            let mut enc = crate::range_coder::RangeEncoder::new(&mut buffer);
            encode_pulses(&y, k, &mut enc).unwrap();
            let bits = enc.tell();
            enc.done().unwrap();
            drop(enc);
            assert!(bits <= 40, "{} bits for a 32 bit codeword", bits);

            let mut dec = crate::range_coder::RangeDecoder::new(&buffer);
            let mut decoded = vec![0_i32; n];
            decode_pulses(&mut decoded, k, &mut dec);
            assert_eq!(decoded, y, "n = {}, k = {}", n, k);
        });
    }

    #[test]
    fn test_fits_in_32() {
        assert!(fits_in_32(2, 100));
        assert!(fits_in_32(176, 1));
        assert!(!fits_in_32(100, 100));
        // Identity: V(n, k) == V(k, n).
        (1..=8_usize).for_each(|n| {
            (1..=8_usize).for_each(|k| {
                assert_eq!(pvq_size(n, k), pvq_size(k, n));
            });
        });
    }
}
