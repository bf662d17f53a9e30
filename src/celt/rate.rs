//! Implements the bit allocation.
//!
//! The allocator turns the frame bit budget into a per band split between
//! pulse coding and fine energy. It runs identically on the encoder and the
//! decoder: every quantity it consumes is either coded in the bitstream
//! before it runs or derived from static tables, so both sides must reach
//! bit-identical results.

use once_cell::sync::Lazy;

use crate::celt::cwrs::pvq_size;
use crate::celt::tables::{LOG2_FRAC, MAX_FINE_BITS, STATIC_CAPS};
use crate::celt::{band_width, E_BANDS, MAX_BANDS};
use crate::encoder_error::EncoderError;
use crate::celt::coder::EntropyCoder;
use crate::range_coder::BITRES;

/// log2 of the largest pseudo pulse index.
const LOG_MAX_PSEUDO: usize = 6;
/// The largest number of pulses the cache covers.
const MAX_PULSES: usize = 128;
/// The widest band the cache covers, 22 bins at LM = 3.
const MAX_CACHE_N: usize = 176;
/// Bias of the fine energy offset curve.
const FINE_OFFSET: i32 = 21;

/// `log2(band width)` in Q3 per band.
pub(crate) const LOG_N: [i32; MAX_BANDS] = [
    0, 0, 0, 0, 0, 0, 0, 0, 8, 8, 8, 8, 16, 16, 16, 21, 21, 24, 29, 34, 36,
];

/// Round-up `log2(val)` in Q`frac` precision.
pub(crate) fn log2_frac(val: u64, frac: u32) -> u32 {
    debug_assert!(val > 0);
    let l = 64 - val.leading_zeros();
    let int_part = l - 1;
    if val & (val - 1) == 0 {
        return int_part << frac;
    }
    // Normalize to Q16 in [1, 2), rounding up.
    let mut v: u64 = if l > 16 {
        ((val - 1) >> (l - 16)) + 1
    } else {
        val << (16 - l)
    };
    let mut result = int_part;
    (0..frac).for_each(|_| {
        v = v * v;
        let bit = u32::from(v >= 1 << 33);
        if bit != 0 {
            v >>= 1;
        }
        v = (v + 0xFFFF) >> 16;
        result = (result << 1) | bit;
    });
    if v > 1 << 16 {
        result += 1;
    }
    result
}

/// Maps a pseudo pulse index to the actual number of pulses.
#[inline(always)]
pub(crate) fn get_pulses(index: i32) -> i32 {
    if index < 8 {
        index
    } else {
        (8 + (index & 7)) << ((index >> 3) - 1)
    }
}

/// Per dimension count rows of the pulse cache.
///
/// `rows[n][0]` is the largest usable pseudo pulse index for an `n`
/// dimensional band, `rows[n][i]` the Q3 bit cost of `get_pulses(i)` pulses
/// minus one.
struct PulseCache {
    rows: Vec<Vec<u8>>,
}

static CACHE: Lazy<PulseCache> = Lazy::new(|| {
    let rows = (0..=MAX_CACHE_N)
        .map(|n| {
            if n < 2 {
                return vec![0];
            }
            let mut row = vec![0_u8];
            let mut index = 1;
            loop {
                let pulses = get_pulses(index) as usize;
                if pulses > MAX_PULSES {
                    break;
                }
                let size = pvq_size(n, pulses);
                if size > u32::MAX as u64 {
                    break;
                }
                let bits = log2_frac(size, BITRES);
                if bits < 1 || bits - 1 > u8::MAX as u32 {
                    break;
                }
                row.push((bits - 1) as u8);
                index += 1;
            }
            row[0] = (index - 1) as u8;
            row
        })
        .collect();
    PulseCache { rows }
});

/// The largest pseudo pulse count codable in `bits` (Q3) for `n` dimensions.
pub(crate) fn bits2pulses(n: usize, bits: i32) -> i32 {
    let row = &CACHE.rows[n];
    let mut lo: i32 = 0;
    let mut hi: i32 = i32::from(row[0]);
    let bits = bits - 1;
    (0..LOG_MAX_PSEUDO).for_each(|_| {
        let mid = (lo + hi + 1) >> 1;
        if i32::from(row[mid as usize]) >= bits {
            hi = mid;
        } else {
            lo = mid;
        }
    });
    let lo_bits = if lo == 0 {
        -1
    } else {
        i32::from(row[lo as usize])
    };
    if bits - lo_bits <= i32::from(row[hi as usize]) - bits {
        lo
    } else {
        hi
    }
}

/// The Q3 bit cost of coding `pulses` pseudo pulses in `n` dimensions.
pub(crate) fn pulses2bits(n: usize, pulses: i32) -> i32 {
    if pulses == 0 {
        0
    } else {
        i32::from(CACHE.rows[n][pulses as usize]) + 1
    }
}

/// The maximum pseudo pulse index of an `n` dimensional band.
pub(crate) fn max_pseudo_pulses(n: usize) -> i32 {
    i32::from(CACHE.rows[n][0])
}

/// The hard per band allocation limit in Q3 bits.
pub(crate) fn init_caps(lm: usize, channels: usize) -> [i32; MAX_BANDS] {
    let mut caps = [0; MAX_BANDS];
    caps.iter_mut().enumerate().for_each(|(i, cap)| {
        let n = (band_width(i) << lm) as i32;
        let static_cap = i32::from(STATIC_CAPS[lm][channels - 1][i]);
        *cap = (static_cap + 64) * channels as i32 * n >> 2;
    });
    caps
}

/// The result of the allocation.
#[derive(Clone, Debug, Default)]
pub(crate) struct Allocation {
    /// Q3 bits available for shape coding per band.
    pub(crate) pulses: [i32; MAX_BANDS],
    /// Fine energy bits per band and channel.
    pub(crate) fine_bits: [i32; MAX_BANDS],
    /// Bands that get leftover bits first in the finalise pass.
    pub(crate) fine_priority: [bool; MAX_BANDS],
    /// Bands `start..coded_bands` receive shape bits.
    pub(crate) coded_bands: usize,
    /// Q3 bits carried between bands during shape quantization.
    pub(crate) balance: i32,
    /// First band coded with intensity stereo.
    pub(crate) intensity: usize,
    /// True when the two channels use separate shapes.
    pub(crate) dual_stereo: bool,
}

/// Parameters the allocation depends on beyond the bitstream itself.
pub(crate) struct AllocationRequest<'d> {
    pub(crate) start: usize,
    pub(crate) end: usize,
    /// Dynalloc boosts in Q3 bits.
    pub(crate) offsets: &'d [i32; MAX_BANDS],
    pub(crate) cap: &'d [i32; MAX_BANDS],
    pub(crate) alloc_trim: i32,
    /// Requested intensity/dual decisions (encoder side only).
    pub(crate) intensity: usize,
    pub(crate) dual_stereo: bool,
    /// Total Q3 bits available.
    pub(crate) total: i32,
    pub(crate) channels: usize,
    pub(crate) lm: usize,
    /// Coded bands of the previous frame, for the skip hysteresis.
    pub(crate) prev_coded_bands: usize,
    /// The last band the encoder considers audible.
    pub(crate) signal_bandwidth: usize,
}

/// Computes the complete allocation for one frame.
#[allow(clippy::needless_range_loop)]
pub(crate) fn compute_allocation(
    request: &AllocationRequest<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
) -> Result<Allocation, EncoderError> {
    let start = request.start;
    let end = request.end;
    let channels = request.channels as i32;
    let lm = request.lm;
    let mut total = i32::max(request.total, 0);

    let mut alloc = Allocation {
        intensity: request.intensity,
        dual_stereo: request.dual_stereo,
        ..Allocation::default()
    };

    let mut skip_start = start;
    // Reserve a bit to signal the end of manually skipped bands.
    let skip_rsv = if total >= 1 << BITRES { 1 << BITRES } else { 0 };
    total -= skip_rsv;

    // Reserve bits for the intensity and dual stereo parameters.
    let mut intensity_rsv = 0;
    let mut dual_stereo_rsv = 0;
    if channels == 2 {
        intensity_rsv = i32::from(LOG2_FRAC[end - start]);
        if intensity_rsv > total {
            intensity_rsv = 0;
        } else {
            total -= intensity_rsv;
            dual_stereo_rsv = if total >= 1 << BITRES { 1 << BITRES } else { 0 };
            total -= dual_stereo_rsv;
        }
    }

    let mut thresh = [0_i32; MAX_BANDS];
    let mut trim_offset = [0_i32; MAX_BANDS];
    for j in start..end {
        let n0 = band_width(j) as i32;
        // Below this threshold, we're sure not to allocate any PVQ bits.
        thresh[j] = i32::max(channels << BITRES, (3 * n0 << lm << BITRES) >> 4);
        // Tilt of the allocation curve.
        trim_offset[j] = channels
            * n0
            * (request.alloc_trim - 5 - lm as i32)
            * (end as i32 - j as i32 - 1)
            * (1 << (lm as u32 + BITRES))
            >> 6;
        // Giving less resolution to single-bin bands because they get more
        // benefit from having one coarse value per coefficient.
        if n0 << lm == 1 {
            trim_offset[j] -= channels << BITRES;
        }
    }

    // Coarse search over the allocation quality rows.
    let mut lo = 1_i32;
    let mut hi = crate::celt::tables::BAND_ALLOCATION.len() as i32 - 1;
    loop {
        let mut done = false;
        let mut psum = 0;
        let mid = (lo + hi) >> 1;
        for j in (start..end).rev() {
            let n0 = band_width(j) as i32;
            let mut bits_j =
                channels * n0 * i32::from(crate::celt::tables::BAND_ALLOCATION[mid as usize][j])
                    << lm
                    >> 2;
            if bits_j > 0 {
                bits_j = i32::max(0, bits_j + trim_offset[j]);
            }
            bits_j += request.offsets[j];
            if bits_j >= thresh[j] || done {
                done = true;
                // Don't allocate more than we can actually use.
                psum += i32::min(bits_j, request.cap[j]);
            } else if bits_j >= channels << BITRES {
                psum += channels << BITRES;
            }
        }
        if psum > total {
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
        if lo > hi {
            break;
        }
    }
    let hi_row = lo;
    let lo_row = lo - 1;

    let mut bits1 = [0_i32; MAX_BANDS];
    let mut bits2 = [0_i32; MAX_BANDS];
    for j in start..end {
        let n0 = band_width(j) as i32;
        let mut bits1_j =
            channels * n0 * i32::from(crate::celt::tables::BAND_ALLOCATION[lo_row as usize][j])
                << lm
                >> 2;
        let mut bits2_j = if hi_row >= crate::celt::tables::BAND_ALLOCATION.len() as i32 {
            request.cap[j]
        } else {
            channels * n0 * i32::from(crate::celt::tables::BAND_ALLOCATION[hi_row as usize][j])
                << lm
                >> 2
        };
        if bits1_j > 0 {
            bits1_j = i32::max(0, bits1_j + trim_offset[j]);
        }
        if bits2_j > 0 {
            bits2_j = i32::max(0, bits2_j + trim_offset[j]);
        }
        if lo_row > 0 {
            bits1_j += request.offsets[j];
        }
        bits2_j += request.offsets[j];
        if request.offsets[j] > 0 {
            skip_start = j;
        }
        bits2_j = i32::max(0, bits2_j - bits1_j);
        bits1[j] = bits1_j;
        bits2[j] = bits2_j;
    }

    interp_bits2pulses(
        request,
        coder,
        &mut alloc,
        &bits1,
        &bits2,
        &thresh,
        total,
        skip_start,
        skip_rsv,
        intensity_rsv,
        dual_stereo_rsv,
    )?;

    Ok(alloc)
}

const ALLOC_STEPS: u32 = 6;

#[allow(clippy::too_many_arguments)]
#[allow(clippy::needless_range_loop)]
fn interp_bits2pulses(
    request: &AllocationRequest<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
    alloc: &mut Allocation,
    bits1: &[i32; MAX_BANDS],
    bits2: &[i32; MAX_BANDS],
    thresh: &[i32; MAX_BANDS],
    mut total: i32,
    skip_start: usize,
    skip_rsv: i32,
    mut intensity_rsv: i32,
    mut dual_stereo_rsv: i32,
) -> Result<(), EncoderError> {
    let start = request.start;
    let end = request.end;
    let channels = request.channels as i32;
    let stereo = channels > 1;
    let lm = request.lm;
    let cap = request.cap;
    let alloc_floor = channels << BITRES;
    let log_m = (lm as i32) << BITRES;
    let bits = &mut alloc.pulses;
    let ebits = &mut alloc.fine_bits;

    // Fractional interpolation between the two bracketing rows.
    let mut lo = 0_i32;
    let mut hi = 1 << ALLOC_STEPS;
    (0..ALLOC_STEPS).for_each(|_| {
        let mid = (lo + hi) >> 1;
        let mut psum = 0;
        let mut done = false;
        for j in (start..end).rev() {
            let tmp = bits1[j] + (mid * bits2[j] >> ALLOC_STEPS);
            if tmp >= thresh[j] || done {
                done = true;
                psum += i32::min(tmp, cap[j]);
            } else if tmp >= alloc_floor {
                psum += alloc_floor;
            }
        }
        if psum > total {
            hi = mid;
        } else {
            lo = mid;
        }
    });

    let mut psum = 0;
    let mut done = false;
    for j in (start..end).rev() {
        let mut tmp = bits1[j] + (lo * bits2[j] >> ALLOC_STEPS);
        if tmp < thresh[j] && !done {
            if tmp >= alloc_floor {
                tmp = alloc_floor;
            } else {
                tmp = 0;
            }
        } else {
            done = true;
        }
        tmp = i32::min(tmp, cap[j]);
        bits[j] = tmp;
        psum += tmp;
    }

    // Decide which bands to skip, working backwards from the end.
    let mut coded_bands = end;
    loop {
        let j = coded_bands - 1;
        // Never skip the first band, nor a band that has been boosted by
        // dynalloc. In the first case, we'd be coding a bit to signal we're
        // going to waste all the other bits. In the second case, we'd be
        // coding a bit to redistribute all the bits we just signaled should
        // be concentrated in this band.
        if j <= skip_start {
            // Give the bit we reserved to end skipping back.
            total += skip_rsv;
            break;
        }

        // Figure out how many leftover bits we would be adding to this band.
        // This can include bits we've stolen back from higher, skipped bands.
        let left = total - psum;
        let denom = (E_BANDS[coded_bands] - E_BANDS[start]) as i32;
        let percoeff = left / denom;
        let left = left - denom * percoeff;
        let rem = i32::max(left - (E_BANDS[j] - E_BANDS[start]) as i32, 0);
        let band_width = (E_BANDS[coded_bands] - E_BANDS[j]) as i32;
        let mut band_bits = bits[j] + percoeff * band_width + rem;

        // Only code a skip decision if we're above the threshold for this
        // band. Otherwise it is force-skipped.
        if band_bits >= i32::max(thresh[j], alloc_floor + (1 << BITRES)) {
            let keep = if coder.is_encoder() {
                // The only part of the allocation that is not mandated by
                // the bitstream: the bands we skip here are signaled.
                let depth_threshold = if coded_bands > 17 {
                    if j < request.prev_coded_bands {
                        7
                    } else {
                        9
                    }
                } else {
                    0
                };
                coded_bands <= start + 2
                    || (band_bits > (depth_threshold * band_width << lm << BITRES) >> 4
                        && j <= request.signal_bandwidth)
            } else {
                false
            };
            if coder.bit_logp(keep, 1)? {
                break;
            }
            // We used a bit to skip this band.
            psum += 1 << BITRES;
            band_bits -= 1 << BITRES;
        }

        // Reclaim the bits originally allocated to this band.
        psum -= bits[j] + intensity_rsv;
        if intensity_rsv > 0 {
            intensity_rsv = i32::from(LOG2_FRAC[j - start]);
        }
        psum += intensity_rsv;
        if band_bits >= alloc_floor {
            // If we have enough for a fine energy bit per channel, use it.
            psum += alloc_floor;
            bits[j] = alloc_floor;
        } else {
            // Otherwise this band gets nothing at all.
            bits[j] = 0;
        }

        coded_bands -= 1;
    }
    debug_assert!(coded_bands > start);

    // Code the intensity and dual stereo parameters.
    if intensity_rsv > 0 {
        let value = usize::min(usize::max(alloc.intensity, start), coded_bands);
        let coded = coder.uint(
            (value - start) as u32,
            (coded_bands + 1 - start) as u32,
        )?;
        alloc.intensity = start + coded as usize;
    } else {
        alloc.intensity = 0;
    }
    if alloc.intensity <= start {
        total += dual_stereo_rsv;
        dual_stereo_rsv = 0;
    }
    if dual_stereo_rsv > 0 {
        alloc.dual_stereo = coder.bit_logp(alloc.dual_stereo, 1)?;
    } else {
        alloc.dual_stereo = false;
    }

    // Allocate the remaining bits.
    let left = total - psum;
    let denom = (E_BANDS[coded_bands] - E_BANDS[start]) as i32;
    let percoeff = left / denom;
    let mut left = left - denom * percoeff;
    for j in start..coded_bands {
        bits[j] += percoeff * band_width_i32(j);
    }
    for j in start..coded_bands {
        let tmp = i32::min(left, band_width_i32(j));
        bits[j] += tmp;
        left -= tmp;
    }

    let mut balance = 0;
    let mut j = start;
    while j < coded_bands {
        debug_assert!(bits[j] >= 0);
        let n0 = band_width_i32(j);
        let n = n0 << lm;
        let bit = bits[j] + balance;
        let mut excess;

        if n > 1 {
            excess = i32::max(bit - cap[j], 0);
            bits[j] = bit - excess;

            // Compensate for the extra degree of freedom in stereo.
            let den = channels * n
                + i32::from(channels == 2 && n > 2 && !alloc.dual_stereo && j < alloc.intensity);

            let nclogn = den * (LOG_N[j] + log_m);

            // Offset the number of fine bits by log2(N)/2 + FINE_OFFSET
            // compared to their fair share of total/N.
            let mut offset = (nclogn >> 1) - den * FINE_OFFSET;

            // N = 2 is the only point that doesn't match the curve.
            if n == 2 {
                offset += den << BITRES >> 2;
            }

            // Changing the offset for allocating the second and third fine
            // energy bits.
            if bits[j] + offset < den * 2 << BITRES {
                offset += nclogn >> 2;
            } else if bits[j] + offset < den * 3 << BITRES {
                offset += nclogn >> 3;
            }

            // Divide with rounding.
            ebits[j] = i32::max(0, bits[j] + offset + (den << (BITRES - 1)));
            ebits[j] = (ebits[j] / den) >> BITRES;

            // Make sure not to bust.
            if channels * ebits[j] > bits[j] >> BITRES {
                ebits[j] = bits[j] >> u32::from(stereo) >> BITRES;
            }

            // More than that is useless because that's about as far as PVQ
            // can go.
            ebits[j] = i32::min(ebits[j], MAX_FINE_BITS);

            // If we rounded down or capped this band, make it a candidate
            // for the final fine energy pass.
            alloc.fine_priority[j] = ebits[j] * (den << BITRES) >= bits[j] + offset;

            // Remove the allocated fine bits; the rest are assigned to PVQ.
            bits[j] -= channels * ebits[j] << BITRES;
        } else {
            // For N = 1, all bits go to fine energy except for a single
            // sign bit.
            excess = i32::max(0, bit - (channels << BITRES));
            bits[j] = bit - excess;
            ebits[j] = bits[j] >> u32::from(stereo) >> BITRES;
            alloc.fine_priority[j] = true;
        }

        // Fine energy can't take advantage of the re-balancing in the shape
        // quantizer, so do that re-balancing here.
        if excess > 0 {
            let extra_fine = i32::min(
                excess >> (u32::from(stereo) + BITRES),
                MAX_FINE_BITS - ebits[j],
            );
            ebits[j] += extra_fine;
            let extra_bits = extra_fine * channels << BITRES;
            alloc.fine_priority[j] = extra_bits >= excess - balance;
            excess -= extra_bits;
        }
        balance = excess;

        debug_assert!(bits[j] >= 0);
        debug_assert!(ebits[j] >= 0);
        j += 1;
    }
    alloc.balance = balance;

    // The skipped bands use all their bits for fine energy.
    while j < end {
        ebits[j] = bits[j] >> u32::from(stereo) >> BITRES;
        debug_assert!(channels * ebits[j] << BITRES == bits[j]);
        bits[j] = 0;
        alloc.fine_priority[j] = ebits[j] < 1;
        j += 1;
    }

    alloc.coded_bands = coded_bands;
    Ok(())
}

#[inline(always)]
fn band_width_i32(band: usize) -> i32 {
    band_width(band) as i32
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::range_coder::{RangeDecoder, RangeEncoder};

    #[test]
    fn test_log2_frac() {
        assert_eq!(log2_frac(1, 3), 0);
        assert_eq!(log2_frac(2, 3), 8);
        assert_eq!(log2_frac(4, 3), 16);
        // Non powers of two round up.
        assert_eq!(log2_frac(3, 0), 2);
        let v = log2_frac(3, 3);
        assert!(v >= 12 && v <= 13, "log2(3) in Q3 was {}", v);
        assert!(log2_frac(1000, 3) >= (9.965 * 8.0) as u32);
    }

    #[test]
    fn test_get_pulses() {
        (0..8).for_each(|i| assert_eq!(get_pulses(i), i));
        assert_eq!(get_pulses(8), 8);
        assert_eq!(get_pulses(15), 15);
        assert_eq!(get_pulses(16), 16);
        assert_eq!(get_pulses(17), 18);
        assert_eq!(get_pulses(40), 128);
    }

    #[test]
    fn test_bits_pulses_round_trip() {
        [1_usize, 2, 3, 4, 8, 16, 22, 44, 96, 176].iter().for_each(|&n| {
            if n < 2 {
                return;
            }
            (1..=max_pseudo_pulses(n)).for_each(|pulses| {
                let bits = pulses2bits(n, pulses);
                let back = bits2pulses(n, bits);
                assert_eq!(back, pulses, "n = {}, pulses = {}", n, pulses);
            });
        });
    }

    fn run_allocation(
        total: i32,
        channels: usize,
        lm: usize,
        trim: i32,
        offsets: [i32; MAX_BANDS],
    ) -> (Allocation, Allocation) {
        let cap = init_caps(lm, channels);
        let request = AllocationRequest {
            start: 0,
            end: MAX_BANDS,
            offsets: &offsets,
            cap: &cap,
            alloc_trim: trim,
            intensity: MAX_BANDS,
            dual_stereo: false,
            total,
            channels,
            lm,
            prev_coded_bands: MAX_BANDS,
            signal_bandwidth: MAX_BANDS - 1,
        };

        let mut buffer = vec![0_u8; 1275];
        let mut enc = RangeEncoder::new(&mut buffer);
        let enc_alloc = {
            let mut coder = EntropyCoder::Encoder(&mut enc);
            compute_allocation(&request, &mut coder).unwrap()
        };
        enc.done().unwrap();
        drop(enc);

        let mut dec = RangeDecoder::new(&buffer);
        let dec_alloc = {
            let mut coder = EntropyCoder::Decoder(&mut dec);
            compute_allocation(&request, &mut coder).unwrap()
        };
        (enc_alloc, dec_alloc)
    }

    #[test]
    fn test_encoder_and_decoder_agree() {
        [
            (64 * 20 * 8, 1, 3, 5),
            (32 * 10 * 8, 1, 2, 5),
            (96 * 20 * 8, 2, 3, 5),
            (500, 1, 0, 2),
            (3000, 2, 1, 9),
        ]
        .iter()
        .for_each(|&(total, channels, lm, trim)| {
            let (enc_alloc, dec_alloc) = run_allocation(total, channels, lm, trim, [0; MAX_BANDS]);
            assert_eq!(enc_alloc.pulses, dec_alloc.pulses);
            assert_eq!(enc_alloc.fine_bits, dec_alloc.fine_bits);
            assert_eq!(enc_alloc.fine_priority, dec_alloc.fine_priority);
            assert_eq!(enc_alloc.coded_bands, dec_alloc.coded_bands);
            assert_eq!(enc_alloc.balance, dec_alloc.balance);
        });
    }

    #[test]
    fn test_allocation_respects_budget() {
        let (alloc, _) = run_allocation(64 * 20 * 8, 1, 3, 5, [0; MAX_BANDS]);
        let spent: i32 = alloc.pulses.iter().sum::<i32>()
            + alloc.fine_bits.iter().sum::<i32>() * (1 << BITRES);
        assert!(spent <= 64 * 20 * 8);
        assert!(alloc.coded_bands > 0);
        // A healthy music budget should reach the top bands.
        assert!(alloc.coded_bands >= 18, "{}", alloc.coded_bands);
    }

    #[test]
    fn test_boost_concentrates_bits() {
        let mut offsets = [0; MAX_BANDS];
        offsets[5] = 8 << BITRES;
        let (with_boost, _) = run_allocation(2000, 1, 2, 5, offsets);
        let (without, _) = run_allocation(2000, 1, 2, 5, [0; MAX_BANDS]);
        let total_with = with_boost.pulses[5] + (with_boost.fine_bits[5] << BITRES);
        let total_without = without.pulses[5] + (without.fine_bits[5] << BITRES);
        assert!(total_with > total_without);
    }
}
