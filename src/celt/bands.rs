//! Implements the band level shape coding.
//!
//! Every coded band is normalized to unit norm and quantized by the PVQ.
//! Wide bands are split recursively with an entropy coded mid/side angle
//! until the codewords fit in 32 bits; stereo bands carry the same angle
//! between the two channels. Bands that receive no pulses are filled from
//! lower frequency content or noise, and transient frames run a Hadamard
//! reshuffle so the quantizer sees time continuous vectors.

use crate::celt::coder::EntropyCoder;
use crate::celt::rate::{bits2pulses, get_pulses, max_pseudo_pulses, pulses2bits};
use crate::celt::tables::E_MEANS;
use crate::celt::vq::{
    alg_quant, alg_unquant, renormalise_vector, stereo_itheta, SPREAD_AGGRESSIVE, SPREAD_NONE,
    SPREAD_NORMAL,
};
use crate::celt::{band_width, E_BANDS, MAX_BANDS};
use crate::encoder_error::EncoderError;
use crate::math::{bitexact_cos, bitexact_log2tan, fast_exp2, fast_log2, frac_mul16};
use crate::range_coder::BITRES;

/// The resolution offsets of the split angle.
const QTHETA_OFFSET: i32 = 4;
const QTHETA_OFFSET_TWOPHASE: i32 = 16;

/// The linear congruential generator that drives all decoder side noise.
#[inline(always)]
pub(crate) fn celt_lcg_rand(seed: u32) -> u32 {
    seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223)
}

/// Integer square root, rounding down.
fn isqrt32(value: u32) -> u32 {
    if value == 0 {
        return 0;
    }
    let mut g = 0_u32;
    // Highest power of four not above value.
    let mut b = 1_u32 << (((32 - value.leading_zeros()) - 1) & !1);
    let mut v = value;
    while b != 0 {
        if v >= g + b {
            v -= g + b;
            g = (g >> 1) + b;
        } else {
            g >>= 1;
        }
        b >>= 2;
    }
    g
}

/// Measures the energy of each band, `sqrt(sum(x^2))`.
pub(crate) fn compute_band_energies(
    x: &[f32],
    band_e: &mut [[f32; MAX_BANDS]; 2],
    end: usize,
    channels: usize,
    m: usize,
    frame_size: usize,
) {
    (0..channels).for_each(|c| {
        (0..end).for_each(|i| {
            let lo = m * E_BANDS[i];
            let hi = m * E_BANDS[i + 1];
            let sum: f32 = x[c * frame_size + lo..c * frame_size + hi]
                .iter()
                .map(|v| v * v)
                .sum();
            band_e[c][i] = (1e-27 + sum).sqrt();
        });
    });
}

/// Converts linear band energies into the mean-removed log domain.
pub(crate) fn amp2_log2(
    band_e: &[[f32; MAX_BANDS]; 2],
    band_log_e: &mut [[f32; MAX_BANDS]; 2],
    eff_end: usize,
    end: usize,
    channels: usize,
) {
    (0..channels).for_each(|c| {
        (0..eff_end).for_each(|i| {
            band_log_e[c][i] = fast_log2(band_e[c][i]) - E_MEANS[i];
        });
        (eff_end..end).for_each(|i| {
            band_log_e[c][i] = -14.0;
        });
    });
}

/// Scales each band to unit norm.
pub(crate) fn normalise_bands(
    x: &mut [f32],
    band_e: &[[f32; MAX_BANDS]; 2],
    end: usize,
    channels: usize,
    m: usize,
    frame_size: usize,
) {
    (0..channels).for_each(|c| {
        (0..end).for_each(|i| {
            let g = 1.0 / (1e-27 + band_e[c][i]);
            let lo = c * frame_size + m * E_BANDS[i];
            let hi = c * frame_size + m * E_BANDS[i + 1];
            x[lo..hi].iter_mut().for_each(|v| *v *= g);
        });
    });
}

/// Scales the unit norm shapes back up by the decoded energies into `freq`.
///
/// Bins above `bound` are cleared; a reduced output rate lowers the bound
/// accordingly.
#[allow(clippy::too_many_arguments)]
pub(crate) fn denormalise_bands(
    x: &[f32],
    freq: &mut [f32],
    band_log_e: &[f32; MAX_BANDS],
    start: usize,
    end: usize,
    m: usize,
    downsample: usize,
    silence: bool,
) {
    let frame_size = freq.len();
    let mut bound = m * E_BANDS[end];
    if downsample != 1 {
        bound = usize::min(bound, frame_size / downsample);
    }
    let (start, end, bound) = if silence { (0, 0, 0) } else { (start, end, bound) };

    freq[..m * E_BANDS[start]].iter_mut().for_each(|f| *f = 0.0);
    (start..end).for_each(|i| {
        let lo = m * E_BANDS[i];
        let hi = m * E_BANDS[i + 1];
        let lg = band_log_e[i] + E_MEANS[i];
        let g = fast_exp2(f32::min(32.0, lg));
        (lo..hi).for_each(|j| {
            freq[j] = x[j] * g;
        });
    });
    freq[bound..].iter_mut().for_each(|f| *f = 0.0);
}

/// Renormalizes collapsed short blocks with pseudo random noise whose level
/// follows the lowest energy of the two previous frames.
#[allow(clippy::too_many_arguments)]
pub(crate) fn anti_collapse(
    x: &mut [f32],
    collapse_masks: &[u8; 2 * MAX_BANDS],
    lm: usize,
    channels: usize,
    size: usize,
    start: usize,
    end: usize,
    log_e: &[[f32; MAX_BANDS]; 2],
    prev1_log_e: &[[f32; MAX_BANDS]; 2],
    prev2_log_e: &[[f32; MAX_BANDS]; 2],
    pulses: &[i32; MAX_BANDS],
    seed: &mut u32,
) {
    (start..end).for_each(|i| {
        let n0 = band_width(i);
        let depth = ((1 + pulses[i]) / n0 as i32) >> lm;
        let thresh = 0.5 * fast_exp2(-0.125 * depth as f32);
        let sqrt_1 = 1.0 / ((n0 << lm) as f32).sqrt();

        (0..channels).for_each(|c| {
            let mut prev1 = prev1_log_e[c][i];
            let mut prev2 = prev2_log_e[c][i];
            if channels == 1 {
                prev1 = f32::max(prev1, prev1_log_e[1][i]);
                prev2 = f32::max(prev2, prev2_log_e[1][i]);
            }
            let e_diff = f32::max(0.0, log_e[c][i] - f32::min(prev1, prev2));
            let mut r = 2.0 * fast_exp2(-e_diff);
            if lm == 3 {
                r *= 1.41421356;
            }
            r = f32::min(thresh, r) * sqrt_1;

            let base = c * size + (E_BANDS[i] << lm);
            let mut renormalize = false;
            (0..1 << lm).for_each(|k| {
                // Detect collapse.
                if collapse_masks[i * channels + c] & (1 << k) == 0 {
                    // Fill with noise.
                    (0..n0).for_each(|j| {
                        *seed = celt_lcg_rand(*seed);
                        x[base + (j << lm) + k] = if *seed & 0x8000 != 0 { r } else { -r };
                    });
                    renormalize = true;
                }
            });
            // We just added some energy, so we need to renormalize.
            if renormalize {
                renormalise_vector(&mut x[base..base + (n0 << lm)], 1.0);
            }
        });
    });
}

/// One level of the Haar transform over interleaved blocks.
pub(crate) fn haar1(x: &mut [f32], n0: usize, stride: usize) {
    let n0 = n0 >> 1;
    (0..stride).for_each(|i| {
        (0..n0).for_each(|j| {
            let tmp1 = std::f32::consts::FRAC_1_SQRT_2 * x[stride * 2 * j + i];
            let tmp2 = std::f32::consts::FRAC_1_SQRT_2 * x[stride * (2 * j + 1) + i];
            x[stride * 2 * j + i] = tmp1 + tmp2;
            x[stride * (2 * j + 1) + i] = tmp1 - tmp2;
        });
    });
}

/// The resolution of the split angle, an even number of steps or 1 when the
/// angle is not coded at all.
fn compute_qn(n: usize, b: i32, offset: i32, pulse_cap: i32, stereo: bool) -> i32 {
    const EXP2_TABLE8: [i32; 8] = [16384, 17866, 19483, 21247, 23170, 25267, 27554, 30048];
    let mut n2 = 2 * n as i32 - 1;
    if stereo && n == 2 {
        n2 -= 1;
    }
    // The upper limit ensures that in a stereo split with itheta == 16384,
    // we'll always have enough bits left over to code at least one pulse in
    // the side; otherwise it would collapse, since it doesn't get folded.
    let mut qb = (b + n2 * offset) / n2;
    qb = i32::min(b - pulse_cap - (4 << BITRES), qb);
    qb = i32::min(8 << BITRES, qb);

    if qb < (1 << BITRES >> 1) {
        1
    } else {
        let qn = EXP2_TABLE8[(qb & 0x7) as usize] >> (14 - (qb >> BITRES));
        ((qn + 1) >> 1) << 1
    }
}

/// Mixes the left channel towards the energy weighted mean of the pair.
fn intensity_stereo(x: &mut [f32], y: &[f32], band_e: &[[f32; MAX_BANDS]; 2], band: usize) {
    let left = band_e[0][band];
    let right = band_e[1][band];
    let norm = 1e-15 + (1e-15 + left * left + right * right).sqrt();
    let a1 = left / norm;
    let a2 = right / norm;
    x.iter_mut().zip(y.iter()).for_each(|(l, &r)| {
        *l = a1 * *l + a2 * r;
    });
}

fn stereo_split(x: &mut [f32], y: &mut [f32]) {
    x.iter_mut().zip(y.iter_mut()).for_each(|(l, r)| {
        let m = std::f32::consts::FRAC_1_SQRT_2 * *l;
        let s = std::f32::consts::FRAC_1_SQRT_2 * *r;
        *l = m + s;
        *r = s - m;
    });
}

fn stereo_merge(x: &mut [f32], y: &mut [f32], mid: f32) {
    let mut xp = 0.0_f32;
    let mut side = 0.0_f32;
    x.iter().zip(y.iter()).for_each(|(&l, &r)| {
        xp += l * r;
        side += r * r;
    });
    // Compensating for the mid normalization.
    xp *= mid;
    let el = mid * mid + side - 2.0 * xp;
    let er = mid * mid + side + 2.0 * xp;
    if er < 6e-4 || el < 6e-4 {
        y.copy_from_slice(x);
        return;
    }

    let lgain = 1.0 / el.sqrt();
    let rgain = 1.0 / er.sqrt();
    x.iter_mut().zip(y.iter_mut()).for_each(|(l, r)| {
        // Apply mid scaling (side is already scaled).
        let m = mid * *l;
        let s = *r;
        *l = lgain * (m - s);
        *r = rgain * (m + s);
    });
}

/// Ordering of interleaved Hadamard blocks, per stride.
const ORDERY_2: [usize; 2] = [1, 0];
const ORDERY_4: [usize; 4] = [3, 0, 2, 1];
const ORDERY_8: [usize; 8] = [7, 0, 4, 3, 6, 1, 5, 2];

fn ordery(stride: usize) -> Option<&'static [usize]> {
    match stride {
        2 => Some(&ORDERY_2),
        4 => Some(&ORDERY_4),
        8 => Some(&ORDERY_8),
        _ => None,
    }
}

fn interleave_hadamard(x: &mut [f32], n0: usize, stride: usize, hadamard: bool) {
    let n = n0 * stride;
    let mut tmp = vec![0.0_f32; n];
    if hadamard {
        if let Some(order) = ordery(stride) {
            (0..stride).for_each(|i| {
                (0..n0).for_each(|j| {
                    tmp[order[i] * n0 + j] = x[j * stride + i];
                });
            });
        }
    } else {
        (0..stride).for_each(|i| {
            (0..n0).for_each(|j| {
                tmp[i * n0 + j] = x[j * stride + i];
            });
        });
    }
    x[..n].copy_from_slice(&tmp);
}

fn deinterleave_hadamard(x: &mut [f32], n0: usize, stride: usize, hadamard: bool) {
    let n = n0 * stride;
    let mut tmp = vec![0.0_f32; n];
    if hadamard {
        if let Some(order) = ordery(stride) {
            (0..stride).for_each(|i| {
                (0..n0).for_each(|j| {
                    tmp[j * stride + i] = x[order[i] * n0 + j];
                });
            });
        }
    } else {
        (0..stride).for_each(|i| {
            (0..n0).for_each(|j| {
                tmp[j * stride + i] = x[i * n0 + j];
            });
        });
    }
    x[..n].copy_from_slice(&tmp);
}

/// Duplicates enough of the first band folding data to be able to fold the
/// second band after a non-zero start (Hybrid mode).
pub(crate) fn special_hybrid_folding(
    norm: &mut [f32],
    norm2: Option<&mut [f32]>,
    start: usize,
    m: usize,
) {
    let n1 = m * band_width(start);
    let n2 = m * band_width(start + 1);
    if n2 <= n1 || 2 * n1 < n2 {
        return;
    }
    norm.copy_within(2 * n1 - n2..n1, n1);
    if let Some(norm2) = norm2 {
        norm2.copy_within(2 * n1 - n2..n1, n1);
    }
}

/// State threaded through the recursive band quantization.
struct BandCtx<'e> {
    encode: bool,
    resynth: bool,
    band: usize,
    intensity: usize,
    spread: usize,
    tf_change: i8,
    remaining_bits: i32,
    band_e: &'e [[f32; MAX_BANDS]; 2],
    seed: u32,
    disable_inv: bool,
    avoid_split_noise: bool,
}

struct SplitCtx {
    inv: bool,
    imid: i32,
    iside: i32,
    delta: i32,
    itheta: i32,
    qalloc: i32,
}

/// Codes the step distribution used for the stereo split angle.
fn code_step_theta(
    coder: &mut EntropyCoder<'_, '_, '_>,
    itheta: i32,
    qn: i32,
) -> Result<i32, EncoderError> {
    let p0: u32 = 3;
    let x0 = (qn / 2) as u32;
    let ft = p0 * (x0 + 1) + x0;
    match coder {
        EntropyCoder::Encoder(enc) => {
            let x = itheta as u32;
            let (fl, fh) = if x <= x0 {
                (p0 * x, p0 * (x + 1))
            } else {
                ((x - 1 - x0) + (x0 + 1) * p0, (x - x0) + (x0 + 1) * p0)
            };
            enc.encode(fl, fh, ft)?;
            Ok(itheta)
        }
        EntropyCoder::Decoder(dec) => {
            let fs = dec.decode(ft);
            let x = if fs < (x0 + 1) * p0 {
                fs / p0
            } else {
                x0 + 1 + (fs - (x0 + 1) * p0)
            };
            let (fl, fh) = if x <= x0 {
                (p0 * x, p0 * (x + 1))
            } else {
                ((x - 1 - x0) + (x0 + 1) * p0, (x - x0) + (x0 + 1) * p0)
            };
            dec.update(fl, fh, ft);
            Ok(x as i32)
        }
    }
}

/// Codes the triangular distribution used for the time split angle.
fn code_triangular_theta(
    coder: &mut EntropyCoder<'_, '_, '_>,
    itheta: i32,
    qn: i32,
) -> Result<i32, EncoderError> {
    let half = qn >> 1;
    let ft = ((half + 1) * (half + 1)) as u32;
    match coder {
        EntropyCoder::Encoder(enc) => {
            let (fl, fs) = if itheta <= half {
                ((itheta * (itheta + 1) >> 1) as u32, (itheta + 1) as u32)
            } else {
                (
                    ft - (((qn + 1 - itheta) * (qn + 2 - itheta) >> 1) as u32),
                    (qn + 1 - itheta) as u32,
                )
            };
            enc.encode(fl, fl + fs, ft)?;
            Ok(itheta)
        }
        EntropyCoder::Decoder(dec) => {
            let fm = dec.decode(ft);
            let (itheta, fl, fs) = if fm < ((half * (half + 1)) >> 1) as u32 {
                let value = ((isqrt32(8 * fm + 1) - 1) >> 1) as i32;
                (value, (value * (value + 1) >> 1) as u32, (value + 1) as u32)
            } else {
                let value = ((2 * (qn + 1)) as u32 - isqrt32(8 * (ft - fm - 1) + 1)) as i32 >> 1;
                (
                    value,
                    ft - (((qn + 1 - value) * (qn + 2 - value) >> 1) as u32),
                    (qn + 1 - value) as u32,
                )
            };
            dec.update(fl, fl + fs, ft);
            Ok(itheta)
        }
    }
}

/// Decides the resolution of the mid/side angle, codes it, and derives the
/// gains and bit split of the two halves.
#[allow(clippy::too_many_arguments)]
fn compute_theta(
    ctx: &mut BandCtx<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
    sctx: &mut SplitCtx,
    x: &mut [f32],
    y: &mut [f32],
    b: &mut i32,
    blocks: usize,
    b0: usize,
    lm: i32,
    stereo: bool,
    fill: &mut u32,
) -> Result<(), EncoderError> {
    let n = x.len();
    let band = ctx.band;
    let mut inv = false;

    // Decide on the resolution to give to the split parameter theta.
    let pulse_cap = crate::celt::rate::LOG_N[band] + lm * (1 << BITRES);
    let offset = (pulse_cap >> 1)
        - if stereo && n == 2 {
            QTHETA_OFFSET_TWOPHASE
        } else {
            QTHETA_OFFSET
        };
    let mut qn = compute_qn(n, *b, offset, pulse_cap, stereo);
    if stereo && band >= ctx.intensity {
        qn = 1;
    }

    let mut itheta = 0;
    if ctx.encode {
        // theta is the atan() of the ratio between the (normalized) side
        // and mid. With just that parameter, we can re-scale both mid and
        // side because we know that 1) they have unit norm and 2) they are
        // orthogonal.
        itheta = stereo_itheta(x, y, stereo);
    }

    let tell = coder.tell_frac();

    if qn != 1 {
        if ctx.encode {
            itheta = (itheta * qn + 8192) >> 14;
            if !stereo && ctx.avoid_split_noise && itheta > 0 && itheta < qn {
                // Check if the selected value of theta will cause the bit
                // allocation to inject noise on one side. If so, make sure
                // the energy of that side is zero.
                let unquantized = itheta * 16384 / qn;
                let imid = i32::from(bitexact_cos(unquantized as i16));
                let iside = i32::from(bitexact_cos((16384 - unquantized) as i16));
                let delta = i32::from(frac_mul16(
                    ((n - 1) << 7) as i16,
                    bitexact_log2tan(iside, imid) as i16,
                ));
                if delta > *b {
                    itheta = qn;
                } else if delta < -*b {
                    itheta = 0;
                }
            }
        }

        // Entropy coding of the angle. We use a uniform pdf for the time
        // split, a step for stereo, and a triangular one for the rest.
        itheta = if stereo && n > 2 {
            code_step_theta(coder, itheta, qn)?
        } else if b0 > 1 || stereo {
            coder.uint(itheta as u32, qn as u32 + 1)? as i32
        } else {
            code_triangular_theta(coder, itheta, qn)?
        };
        itheta = itheta * 16384 / qn;

        if ctx.encode && stereo {
            if itheta == 0 {
                intensity_stereo(x, y, ctx.band_e, band);
            } else {
                stereo_split(x, y);
            }
        }
    } else if stereo {
        if ctx.encode {
            inv = itheta > 8192 && !ctx.disable_inv;
            if inv {
                y.iter_mut().for_each(|v| *v = -*v);
            }
            intensity_stereo(x, y, ctx.band_e, band);
        }
        if *b > 2 << BITRES && ctx.remaining_bits > 2 << BITRES {
            inv = coder.bit_logp(inv, 2)?;
        } else {
            inv = false;
        }
        // inv flag override to avoid problems with downmixing.
        if ctx.disable_inv {
            inv = false;
        }
        itheta = 0;
    }

    let qalloc = (coder.tell_frac() - tell) as i32;
    *b -= qalloc;

    let (imid, iside, delta) = if itheta == 0 {
        *fill &= (1 << blocks) - 1;
        (32767, 0, -16384)
    } else if itheta == 16384 {
        *fill &= ((1 << blocks) - 1) << blocks;
        (0, 32767, 16384)
    } else {
        let imid = i32::from(bitexact_cos(itheta as i16));
        let iside = i32::from(bitexact_cos((16384 - itheta) as i16));
        // This is the mid vs side allocation that minimizes squared error
        // in that band.
        let delta = i32::from(frac_mul16(
            ((n - 1) << 7) as i16,
            bitexact_log2tan(iside, imid) as i16,
        ));
        (imid, iside, delta)
    };

    sctx.inv = inv;
    sctx.imid = imid;
    sctx.iside = iside;
    sctx.delta = delta;
    sctx.itheta = itheta;
    sctx.qalloc = qalloc;
    Ok(())
}

/// A band of a single sample: code the sign per channel, the magnitude is
/// fully described by the energy.
fn quant_band_n1(
    ctx: &mut BandCtx<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
    x: &mut [f32],
    y: Option<&mut [f32]>,
    lowband_out: Option<&mut [f32]>,
) -> Result<u32, EncoderError> {
    let mut sign = false;
    {
        let mut code_one = |value: &mut [f32], ctx: &mut BandCtx<'_>| -> Result<(), EncoderError> {
            if ctx.remaining_bits >= 1 << BITRES {
                sign = coder.bits(u32::from(value[0] < 0.0), 1)? != 0;
                ctx.remaining_bits -= 1 << BITRES;
            } else {
                sign = false;
            }
            if ctx.resynth {
                value[0] = if sign { -1.0 } else { 1.0 };
            }
            Ok(())
        };
        code_one(x, ctx)?;
        if let Some(y) = y {
            code_one(y, ctx)?;
        }
    }
    if let Some(out) = lowband_out {
        out[0] = x[0];
    }
    Ok(1)
}

/// Recursively quantizes a band partition, splitting while the codebook
/// exceeds 32 bits.
#[allow(clippy::too_many_arguments)]
fn quant_partition(
    ctx: &mut BandCtx<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
    x: &mut [f32],
    mut b: i32,
    mut blocks: usize,
    lowband: Option<&[f32]>,
    lm: i32,
    gain: f32,
    mut fill: u32,
) -> Result<u32, EncoderError> {
    let n = x.len();
    let b0 = blocks;
    let band = ctx.band;
    let mut cm = 0;

    // If the band is too wide for exact PVQ coding (i.e. it doesn't fit in
    // 32 bits), then split it.
    let cache_max = pulses2bits(n, max_pseudo_pulses(n));
    if lm != -1 && b > cache_max - 1 + 12 && n > 2 {
        let half = n >> 1;
        let (x_half, y_half) = x.split_at_mut(half);
        let lm = lm - 1;
        if blocks == 1 {
            fill = (fill & 1) | (fill << 1);
        }
        blocks = (blocks + 1) >> 1;

        let mut sctx = SplitCtx {
            inv: false,
            imid: 0,
            iside: 0,
            delta: 0,
            itheta: 0,
            qalloc: 0,
        };
        compute_theta(
            ctx, coder, &mut sctx, x_half, y_half, &mut b, blocks, b0, lm, false, &mut fill,
        )?;
        let itheta = sctx.itheta;
        let mut delta = sctx.delta;
        let mid = sctx.imid as f32 / 32768.0;
        let side = sctx.iside as f32 / 32768.0;

        // Give more bits to low-energy MDCTs than they would otherwise
        // deserve.
        if b0 > 1 && (itheta & 0x3fff) != 0 {
            if itheta > 8192 {
                // Rough approximation for pre-echo masking.
                delta -= delta >> (4 - lm);
            } else {
                // Corresponds to a forward-masking slope of 1.5 dB per 10 ms.
                delta = i32::min(0, delta + ((half as i32) << BITRES >> (5 - lm)));
            }
        }
        let mbits = i32::max(0, i32::min(b, (b - delta) / 2));
        let sbits = b - mbits;
        ctx.remaining_bits -= sctx.qalloc;

        let (lowband_mid, lowband_side) = match lowband {
            Some(lb) => (Some(&lb[..half]), Some(&lb[half..])),
            None => (None, None),
        };

        let rebalance = ctx.remaining_bits;
        if mbits >= sbits {
            cm = quant_partition(
                ctx,
                coder,
                x_half,
                mbits,
                blocks,
                lowband_mid,
                lm,
                gain * mid,
                fill,
            )?;
            let rebalance = mbits - (rebalance - ctx.remaining_bits);
            let mut sbits = sbits;
            if rebalance > 3 << BITRES && itheta != 0 {
                sbits += rebalance - (3 << BITRES);
            }
            cm |= quant_partition(
                ctx,
                coder,
                y_half,
                sbits,
                blocks,
                lowband_side,
                lm,
                gain * side,
                fill >> blocks,
            )? << (b0 >> 1);
        } else {
            cm = quant_partition(
                ctx,
                coder,
                y_half,
                sbits,
                blocks,
                lowband_side,
                lm,
                gain * side,
                fill >> blocks,
            )? << (b0 >> 1);
            let rebalance = sbits - (rebalance - ctx.remaining_bits);
            let mut mbits = mbits;
            if rebalance > 3 << BITRES && itheta != 16384 {
                mbits += rebalance - (3 << BITRES);
            }
            cm |= quant_partition(
                ctx,
                coder,
                x_half,
                mbits,
                blocks,
                lowband_mid,
                lm,
                gain * mid,
                fill,
            )?;
        }
    } else {
        // This is the basic no-split case.
        let mut q = bits2pulses(n, b);
        let mut curr_bits = pulses2bits(n, q);
        ctx.remaining_bits -= curr_bits;

        // Ensures we can never bust the budget.
        while ctx.remaining_bits < 0 && q > 0 {
            ctx.remaining_bits += curr_bits;
            q -= 1;
            curr_bits = pulses2bits(n, q);
            ctx.remaining_bits -= curr_bits;
        }

        if q != 0 {
            let k = get_pulses(q) as usize;
            // Finally do the actual quantization.
            cm = match coder {
                EntropyCoder::Encoder(enc) => {
                    alg_quant(x, k, ctx.spread, blocks, enc, gain, ctx.resynth)?
                }
                EntropyCoder::Decoder(dec) => alg_unquant(x, k, ctx.spread, blocks, dec, gain),
            };
        } else if ctx.resynth {
            // If there's no pulse, fill the band anyway.
            let cm_mask = (1_u32 << blocks) - 1;
            fill &= cm_mask;
            if fill == 0 {
                x.iter_mut().for_each(|v| *v = 0.0);
            } else {
                match lowband {
                    None => {
                        // Noise.
                        x.iter_mut().for_each(|v| {
                            ctx.seed = celt_lcg_rand(ctx.seed);
                            *v = (ctx.seed as i32 >> 20) as f32;
                        });
                        cm = cm_mask;
                    }
                    Some(lb) => {
                        // Folded spectrum.
                        x.iter_mut().zip(lb.iter()).for_each(|(v, &l)| {
                            ctx.seed = celt_lcg_rand(ctx.seed);
                            // About 48 dB below the "normal" folding level.
                            let tmp = if ctx.seed & 0x8000 != 0 {
                                1.0 / 256.0
                            } else {
                                -1.0 / 256.0
                            };
                            *v = l + tmp;
                        });
                        cm = fill;
                    }
                }
                renormalise_vector(x, gain);
            }
        }
    }

    Ok(cm)
}

const BIT_INTERLEAVE_TABLE: [u8; 16] = [0, 1, 1, 1, 2, 3, 3, 3, 2, 3, 3, 3, 2, 3, 3, 3];
const BIT_DEINTERLEAVE_TABLE: [u8; 16] = [
    0x00, 0x03, 0x0C, 0x0F, 0x30, 0x33, 0x3C, 0x3F, 0xC0, 0xC3, 0xCC, 0xCF, 0xF0, 0xF3, 0xFC,
    0xFF,
];

/// Quantizes one band of one channel, handling the time-frequency
/// transforms around the recursive partition.
#[allow(clippy::too_many_arguments)]
fn quant_band(
    ctx: &mut BandCtx<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
    x: &mut [f32],
    b: i32,
    mut blocks: usize,
    lowband: Option<&[f32]>,
    lm: i32,
    lowband_out: Option<&mut [f32]>,
    gain: f32,
    mut lowband_scratch: Option<&mut [f32]>,
    mut fill: u32,
) -> Result<u32, EncoderError> {
    let n = x.len();
    let n0 = n;
    let mut n_b = n / blocks;
    let b0 = blocks;
    let mut time_divide = 0;
    let mut recombine = 0;
    let long_blocks = b0 == 1;
    let mut tf_change = ctx.tf_change;

    // Special case for one sample.
    if n == 1 {
        return quant_band_n1(ctx, coder, x, None, lowband_out);
    }

    if tf_change > 0 {
        recombine = tf_change as usize;
    }

    // Band recombining to increase frequency resolution.
    let mut use_scratch = false;
    if let (Some(lb), Some(scratch)) = (lowband, lowband_scratch.as_deref_mut()) {
        if recombine != 0 || ((n_b & 1) == 0 && tf_change < 0) || b0 > 1 {
            scratch[..n].copy_from_slice(&lb[..n]);
            use_scratch = true;
        }
    }

    (0..recombine).for_each(|k| {
        if ctx.encode {
            haar1(x, n >> k, 1 << k);
        }
        if use_scratch {
            if let Some(scratch) = lowband_scratch.as_deref_mut() {
                haar1(&mut scratch[..n], n >> k, 1 << k);
            }
        }
        fill = u32::from(BIT_INTERLEAVE_TABLE[(fill & 0xF) as usize])
            | u32::from(BIT_INTERLEAVE_TABLE[(fill >> 4) as usize]) << 2;
    });
    blocks >>= recombine;
    n_b <<= recombine;

    // Increasing the time resolution.
    while (n_b & 1) == 0 && tf_change < 0 {
        if ctx.encode {
            haar1(x, n_b, blocks);
        }
        if use_scratch {
            if let Some(scratch) = lowband_scratch.as_deref_mut() {
                haar1(&mut scratch[..n], n_b, blocks);
            }
        }
        fill |= fill << blocks;
        blocks <<= 1;
        n_b >>= 1;
        time_divide += 1;
        tf_change += 1;
    }
    let b0_final = blocks;
    let n_b0 = n_b;

    // Reorganize the samples in time order instead of frequency order.
    if b0_final > 1 {
        if ctx.encode {
            deinterleave_hadamard(x, n_b >> recombine, b0_final << recombine, long_blocks);
        }
        if use_scratch {
            if let Some(scratch) = lowband_scratch.as_deref_mut() {
                deinterleave_hadamard(
                    &mut scratch[..n],
                    n_b >> recombine,
                    b0_final << recombine,
                    long_blocks,
                );
            }
        }
    }

    let lowband_for_partition: Option<&[f32]> = if use_scratch {
        lowband_scratch.as_deref().map(|s| &s[..n])
    } else {
        lowband
    };

    let mut cm = quant_partition(
        ctx,
        coder,
        x,
        b,
        blocks,
        lowband_for_partition,
        lm,
        gain,
        fill,
    )?;

    // Re-organize the samples in frequency order.
    if ctx.resynth {
        if b0_final > 1 {
            interleave_hadamard(x, n_b >> recombine, b0_final << recombine, long_blocks);
        }

        // Undo the time-freq changes that we did earlier.
        let mut n_b = n_b0;
        let mut blocks = b0_final;
        (0..time_divide).for_each(|_| {
            blocks >>= 1;
            n_b <<= 1;
            cm |= cm >> blocks;
            haar1(x, n_b, blocks);
        });

        (0..recombine).for_each(|k| {
            cm = u32::from(BIT_DEINTERLEAVE_TABLE[cm as usize & 0xF]);
            haar1(x, n0 >> k, 1 << k);
        });

        // Scale output for later folding.
        if let Some(out) = lowband_out {
            let scale = (n0 as f32).sqrt();
            out.iter_mut().zip(x.iter()).for_each(|(o, &v)| {
                *o = scale * v;
            });
        }
        cm &= (1 << (blocks << recombine)) - 1;
    }
    Ok(cm)
}

/// Quantizes one band of a stereo pair.
#[allow(clippy::too_many_arguments)]
fn quant_band_stereo(
    ctx: &mut BandCtx<'_>,
    coder: &mut EntropyCoder<'_, '_, '_>,
    x: &mut [f32],
    y: &mut [f32],
    b: i32,
    blocks: usize,
    lowband: Option<&[f32]>,
    lm: i32,
    lowband_out: Option<&mut [f32]>,
    lowband_scratch: Option<&mut [f32]>,
    fill: u32,
) -> Result<u32, EncoderError> {
    let n = x.len();
    let mut b = b;
    let mut fill = fill;

    // Special case for one sample.
    if n == 1 {
        return quant_band_n1(ctx, coder, x, Some(y), lowband_out);
    }

    let orig_fill = fill;
    let mut sctx = SplitCtx {
        inv: false,
        imid: 0,
        iside: 0,
        delta: 0,
        itheta: 0,
        qalloc: 0,
    };
    compute_theta(
        ctx, coder, &mut sctx, x, y, &mut b, blocks, blocks, lm, true, &mut fill,
    )?;
    let inv = sctx.inv;
    let itheta = sctx.itheta;
    let delta = sctx.delta;
    let qalloc = sctx.qalloc;
    let mid = sctx.imid as f32 / 32768.0;
    let side = sctx.iside as f32 / 32768.0;
    let mut cm;

    // This is a special case for N=2 with two pulses that ensures we can
    // code the phase flag without increasing the peak amplitude.
    if n == 2 {
        let mut sbits = 0;
        // Only need one bit for the side.
        if itheta != 0 && itheta != 16384 {
            sbits = 1 << BITRES;
        }
        let mbits = b - sbits;
        ctx.remaining_bits -= qalloc + sbits;

        let swapped = itheta > 8192;
        let mut sign = 0;
        if sbits != 0 {
            let encoded_sign = if ctx.encode {
                let (x2, y2): (&[f32], &[f32]) = if swapped { (&*y, &*x) } else { (&*x, &*y) };
                x2[0] * y2[1] - x2[1] * y2[0] < 0.0
            } else {
                false
            };
            sign = i32::from(coder.bits(u32::from(encoded_sign), 1)? != 0);
        }
        let sign = 1 - 2 * sign;

        // We use orig_fill here because we want to fold the side, but if
        // itheta == 16384, we'll have cleared the low bits of fill.
        {
            let x2: &mut [f32] = if swapped { &mut *y } else { &mut *x };
            cm = quant_band(
                ctx,
                coder,
                x2,
                mbits,
                blocks,
                lowband,
                lm,
                lowband_out,
                1.0,
                lowband_scratch,
                orig_fill,
            )?;
        }
        // We don't split N=2 bands, so cm is either 1 or 0 (for a
        // fold-collapse), and there's no need to worry about mixing with
        // the other channel.
        if ctx.resynth {
            {
                let (x2, y2): (&mut [f32], &mut [f32]) =
                    if swapped { (&mut *y, &mut *x) } else { (&mut *x, &mut *y) };
                y2[0] = -(sign as f32) * x2[1];
                y2[1] = sign as f32 * x2[0];
            }
            x[0] *= mid;
            x[1] *= mid;
            y[0] *= side;
            y[1] *= side;
            let tmp = x[0];
            x[0] = tmp - y[0];
            y[0] = tmp + y[0];
            let tmp = x[1];
            x[1] = tmp - y[1];
            y[1] = tmp + y[1];
        }
    } else {
        // "Normal" split code.
        let mut mbits = i32::max(0, i32::min(b, (b - delta) / 2));
        let mut sbits = b - mbits;
        ctx.remaining_bits -= qalloc;

        let rebalance = ctx.remaining_bits;
        if mbits >= sbits {
            // In stereo mode, we do not apply a scaling to the mid because
            // we need the normalized mid for folding later.
            cm = quant_band(
                ctx,
                coder,
                x,
                mbits,
                blocks,
                lowband,
                lm,
                lowband_out,
                1.0,
                lowband_scratch,
                fill,
            )?;
            let rebalance = mbits - (rebalance - ctx.remaining_bits);
            if rebalance > 3 << BITRES && itheta != 0 {
                sbits += rebalance - (3 << BITRES);
            }
            // For a stereo split, the high bits of fill are always zero, so
            // no folding will be done to the side.
            cm |= quant_band(
                ctx,
                coder,
                y,
                sbits,
                blocks,
                None,
                lm,
                None,
                side,
                None,
                fill >> blocks,
            )?;
        } else {
            cm = quant_band(
                ctx,
                coder,
                y,
                sbits,
                blocks,
                None,
                lm,
                None,
                side,
                None,
                fill >> blocks,
            )?;
            let rebalance = sbits - (rebalance - ctx.remaining_bits);
            if rebalance > 3 << BITRES && itheta != 16384 {
                mbits += rebalance - (3 << BITRES);
            }
            cm |= quant_band(
                ctx,
                coder,
                x,
                mbits,
                blocks,
                lowband,
                lm,
                lowband_out,
                1.0,
                lowband_scratch,
                fill,
            )?;
        }
    }

    // This code is used by the encoder and by the resynthesis-enabled
    // decoder.
    if ctx.resynth {
        if n != 2 {
            stereo_merge(x, y, mid);
        }
        if inv {
            y.iter_mut().for_each(|v| *v = -*v);
        }
    }
    Ok(cm)
}

/// Input and output of [`quant_all_bands`].
pub(crate) struct BandQuantParams<'d> {
    pub(crate) start: usize,
    pub(crate) end: usize,
    /// Effective end band for reduced rate decoding.
    pub(crate) eff_ebands: usize,
    pub(crate) band_e: &'d [[f32; MAX_BANDS]; 2],
    pub(crate) pulses: &'d [i32; MAX_BANDS],
    pub(crate) short_blocks: bool,
    pub(crate) spread: usize,
    pub(crate) dual_stereo: bool,
    pub(crate) intensity: usize,
    pub(crate) tf_res: &'d [i8; MAX_BANDS],
    pub(crate) total_bits: i32,
    pub(crate) balance: i32,
    pub(crate) lm: usize,
    pub(crate) coded_bands: usize,
    pub(crate) disable_inv: bool,
}

/// Quantizes or reconstructs all bands of one frame.
#[allow(non_snake_case)]
pub(crate) fn quant_all_bands(
    params: &BandQuantParams<'_>,
    x_full: &mut [f32],
    y_full: Option<&mut [f32]>,
    collapse_masks: &mut [u8; 2 * MAX_BANDS],
    coder: &mut EntropyCoder<'_, '_, '_>,
    seed: &mut u32,
) -> Result<(), EncoderError> {
    let start = params.start;
    let end = params.end;
    let lm = params.lm;
    let m = 1 << lm;
    let stereo = y_full.is_some();
    let channels = if stereo { 2 } else { 1 };
    let blocks = if params.short_blocks { m } else { 1 };
    let encode = coder.is_encoder();
    let resynth = !encode;
    let mut balance = params.balance;
    let mut dual_stereo = params.dual_stereo;

    let norm_offset = m * E_BANDS[start];
    let norm_len = m * E_BANDS[MAX_BANDS - 1] - norm_offset;
    let mut norm_buf = vec![0.0_f32; channels * norm_len];
    let (norm_mid, norm_side) = norm_buf.split_at_mut(norm_len);

    let mut scratch = vec![0.0_f32; m * band_width(MAX_BANDS - 1)];
    let mut discard = vec![0.0_f32; m * band_width(MAX_BANDS - 1)];
    let mut discard2 = vec![0.0_f32; m * band_width(MAX_BANDS - 1)];
    let mut fold_buf = vec![0.0_f32; m * band_width(MAX_BANDS - 1)];
    let mut fold_buf2 = vec![0.0_f32; m * band_width(MAX_BANDS - 1)];

    let mut lowband_offset = 0_usize;
    let mut update_lowband = true;
    let mut y_full = y_full;

    let mut ctx = BandCtx {
        encode,
        resynth,
        band: 0,
        intensity: params.intensity,
        spread: params.spread,
        tf_change: 0,
        remaining_bits: 0,
        band_e: params.band_e,
        seed: *seed,
        disable_inv: params.disable_inv,
        // Avoid injecting noise in the first band on transients.
        avoid_split_noise: blocks > 1,
    };

    for i in start..end {
        ctx.band = i;
        let last = i == end - 1;
        let band_lo = m * E_BANDS[i];
        let band_hi = m * E_BANDS[i + 1];
        let n = band_hi - band_lo;
        let tell = coder.tell_frac() as i32;

        // Compute how many bits we want to allocate to this band.
        if i != start {
            balance -= tell;
        }
        let remaining_bits = params.total_bits - tell - 1;
        ctx.remaining_bits = remaining_bits;
        let b = if i <= params.coded_bands - 1 {
            let curr_balance = balance / i32::min(3, (params.coded_bands - i) as i32);
            i32::max(
                0,
                i32::min(16383, i32::min(remaining_bits + 1, params.pulses[i] + curr_balance)),
            )
        } else {
            0
        };

        if resynth
            && (band_lo as i32 - n as i32 >= (m * E_BANDS[start]) as i32 || i == start + 1)
            && (update_lowband || lowband_offset == 0)
        {
            lowband_offset = i;
        }
        if i == start + 1 {
            special_hybrid_folding(
                norm_mid,
                if dual_stereo { Some(&mut *norm_side) } else { None },
                start,
                m,
            );
        }

        ctx.tf_change = params.tf_res[i];
        let out_of_range = i >= params.eff_ebands;

        // Get a conservative estimate of the collapse masks of the bands
        // we're going to be folding from.
        let (mut x_cm, mut y_cm) = if lowband_offset != 0
            && (params.spread != SPREAD_AGGRESSIVE || blocks > 1 || ctx.tf_change < 0)
        {
            let effective_lowband =
                i32::max(0, (m * E_BANDS[lowband_offset]) as i32 - norm_offset as i32 - n as i32)
                    as usize;
            // This ensures we never repeat spectral content within one band.
            let mut fold_start = lowband_offset;
            while m * E_BANDS[fold_start - 1] > effective_lowband + norm_offset {
                fold_start -= 1;
            }
            fold_start -= 1;
            let mut fold_end = lowband_offset;
            while fold_end < i && m * E_BANDS[fold_end] < effective_lowband + norm_offset + n {
                fold_end += 1;
            }
            let mut x_cm = 0_u32;
            let mut y_cm = 0_u32;
            (fold_start..fold_end).for_each(|fold_i| {
                x_cm |= u32::from(collapse_masks[fold_i * channels]);
                y_cm |= u32::from(collapse_masks[fold_i * channels + channels - 1]);
            });
            (x_cm, y_cm)
        } else {
            // Otherwise, we'll be using the LCG to fold, so all blocks will
            // (almost always) be non-zero.
            ((1 << blocks) - 1, (1 << blocks) - 1)
        };

        if dual_stereo && i == params.intensity {
            // Switch off dual stereo to do intensity.
            dual_stereo = false;
            if resynth {
                (0..band_lo - norm_offset).for_each(|j| {
                    norm_mid[j] = 0.5 * (norm_mid[j] + norm_side[j]);
                });
            }
        }

        let effective_lowband = if lowband_offset != 0
            && (params.spread != SPREAD_AGGRESSIVE || blocks > 1 || ctx.tf_change < 0)
        {
            Some(
                i32::max(0, (m * E_BANDS[lowband_offset]) as i32 - norm_offset as i32 - n as i32)
                    as usize,
            )
        } else {
            None
        };

        // The folding source may overlap the region this band writes (the
        // duplicated data after a non-zero start does), so it is staged
        // through a copy.
        let lowband = effective_lowband.map(|off| {
            fold_buf[..n].copy_from_slice(&norm_mid[off..off + n]);
            off
        });
        let lowband2 = if dual_stereo {
            effective_lowband.map(|off| {
                fold_buf2[..n].copy_from_slice(&norm_side[off..off + n]);
                off
            })
        } else {
            None
        };

        if dual_stereo {
            let out_base = band_lo - norm_offset;
            let lowband_out = if last || out_of_range {
                None
            } else {
                Some(&mut norm_mid[out_base..out_base + n])
            };
            x_cm = quant_band(
                &mut ctx,
                coder,
                band_target(x_full, band_lo, band_hi, out_of_range, &mut discard),
                b / 2,
                blocks,
                lowband.map(|_| &fold_buf[..n]),
                lm as i32,
                lowband_out,
                1.0,
                Some(&mut scratch),
                x_cm,
            )?;
            let lowband2_out = if last || out_of_range {
                None
            } else {
                Some(&mut norm_side[out_base..out_base + n])
            };
            if let Some(y_all) = y_full.as_deref_mut() {
                y_cm = quant_band(
                    &mut ctx,
                    coder,
                    if out_of_range {
                        &mut discard2[..n]
                    } else {
                        &mut y_all[band_lo..band_hi]
                    },
                    b / 2,
                    blocks,
                    lowband2.map(|_| &fold_buf2[..n]),
                    lm as i32,
                    lowband2_out,
                    1.0,
                    Some(&mut scratch),
                    y_cm,
                )?;
            }
        } else {
            let out_base = band_lo - norm_offset;
            let lowband_out = if last || out_of_range {
                None
            } else {
                Some(&mut norm_mid[out_base..out_base + n])
            };
            if let Some(y_all) = y_full.as_deref_mut() {
                let fill = x_cm | y_cm;
                x_cm = quant_band_stereo(
                    &mut ctx,
                    coder,
                    band_target(x_full, band_lo, band_hi, out_of_range, &mut discard),
                    if out_of_range {
                        &mut discard2[..n]
                    } else {
                        &mut y_all[band_lo..band_hi]
                    },
                    b,
                    blocks,
                    lowband.map(|_| &fold_buf[..n]),
                    lm as i32,
                    lowband_out,
                    if last || out_of_range {
                        None
                    } else {
                        Some(&mut scratch)
                    },
                    fill,
                )?;
                y_cm = x_cm;
            } else {
                let fill = x_cm | y_cm;
                x_cm = quant_band(
                    &mut ctx,
                    coder,
                    band_target(x_full, band_lo, band_hi, out_of_range, &mut discard),
                    b,
                    blocks,
                    lowband.map(|_| &fold_buf[..n]),
                    lm as i32,
                    lowband_out,
                    1.0,
                    if last { None } else { Some(&mut scratch) },
                    fill,
                )?;
                y_cm = x_cm;
            }
        }
        collapse_masks[i * channels] = x_cm as u8;
        collapse_masks[i * channels + channels - 1] = y_cm as u8;
        balance += params.pulses[i] + tell;

        // Update the folding position only as long as we have 1 bit/sample
        // depth.
        update_lowband = b > (n as i32) << BITRES;
        // We only need to avoid noise on a split for the first band. After
        // that, we have folding.
        ctx.avoid_split_noise = false;
    }
    *seed = ctx.seed;
    Ok(())
}

/// Selects either the real band buffer or the discard scratch for bands
/// above the effective end.
fn band_target<'t>(
    x_full: &'t mut [f32],
    lo: usize,
    hi: usize,
    out_of_range: bool,
    discard: &'t mut [f32],
) -> &'t mut [f32] {
    if out_of_range {
        x_full[lo..hi].iter_mut().for_each(|v| *v = 0.0);
        &mut discard[..hi - lo]
    } else {
        &mut x_full[lo..hi]
    }
}

/// The encoder's spreading decision, from the distribution of the
/// normalized coefficients.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spreading_decision(
    x: &[f32],
    frame_size: usize,
    average: &mut i32,
    last_decision: usize,
    hf_average: &mut i32,
    tapset_decision: &mut usize,
    update_hf: bool,
    end: usize,
    channels: usize,
    m: usize,
) -> usize {
    let mut sum = 0_i32;
    let mut nb_bands = 0_i32;
    let mut hf_sum = 0_i32;

    if m * (E_BANDS[end] - E_BANDS[end - 1]) <= 8 {
        return SPREAD_NONE;
    }

    (0..channels).for_each(|c| {
        (0..end).for_each(|i| {
            let n = m * band_width(i);
            if n <= 8 {
                return;
            }
            let band = &x[c * frame_size + m * E_BANDS[i]..c * frame_size + m * E_BANDS[i + 1]];
            let mut tcount = [0_i32; 3];
            // Compute rough CDF of |x[j]|.
            band.iter().for_each(|&v| {
                let x2n = v * v * n as f32;
                if x2n < 0.25 {
                    tcount[0] += 1;
                }
                if x2n < 0.0625 {
                    tcount[1] += 1;
                }
                if x2n < 0.015625 {
                    tcount[2] += 1;
                }
            });

            // Only include four last bands (8 kHz and up).
            if i > MAX_BANDS - 4 {
                hf_sum += (32 * (tcount[1] + tcount[0])) / n as i32;
            }
            let tmp = i32::from(2 * tcount[2] >= n as i32)
                + i32::from(2 * tcount[1] >= n as i32)
                + i32::from(2 * tcount[0] >= n as i32);
            sum += tmp;
            nb_bands += 1;
        });
    });

    if update_hf {
        if hf_sum != 0 {
            hf_sum /= channels as i32 * (4 - (MAX_BANDS - end).min(4) as i32).max(1);
        }
        *hf_average = (*hf_average + hf_sum) >> 1;
        let mut hf_sum = *hf_average;
        if *tapset_decision == 2 {
            hf_sum += 4;
        } else if *tapset_decision == 0 {
            hf_sum -= 4;
        }
        if hf_sum > 22 {
            *tapset_decision = 2;
        } else if hf_sum > 18 {
            *tapset_decision = 1;
        } else {
            *tapset_decision = 0;
        }
    }

    if nb_bands == 0 {
        return SPREAD_NORMAL;
    }
    let mut sum = (sum << 8) / nb_bands;
    // Recursive averaging.
    sum = (sum + *average) >> 1;
    *average = sum;
    // Hysteresis.
    sum = (3 * sum + (((3 - last_decision as i32) << 7) + 64) + 2) >> 2;
    if sum < 80 {
        SPREAD_AGGRESSIVE
    } else if sum < 256 {
        SPREAD_NORMAL
    } else if sum < 384 {
        crate::celt::vq::SPREAD_LIGHT
    } else {
        SPREAD_NONE
    }
}

/// A threshold decision with hysteresis around the previous value.
pub(crate) fn hysteresis_decision(
    value: f32,
    thresholds: &[f32],
    hysteresis: &[f32],
    prev: usize,
) -> usize {
    let count = thresholds.len();
    let mut i = 0;
    while i < count {
        if value < thresholds[i] {
            break;
        }
        i += 1;
    }
    if i > prev && value < thresholds[prev] + hysteresis[prev] {
        i = prev;
    }
    if i < prev && prev > 0 && value > thresholds[prev - 1] - hysteresis[prev - 1] {
        i = prev;
    }
    i
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;

    use super::*;
    use crate::celt::rate::{compute_allocation, init_caps, AllocationRequest};
    use crate::range_coder::{RangeDecoder, RangeEncoder};

    #[test]
    fn test_lcg_sequence_is_deterministic() {
        let mut seed = 42;
        let mut values = Vec::new();
        (0..4).for_each(|_| {
            seed = celt_lcg_rand(seed);
            values.push(seed);
        });
        let mut seed = 42;
        (0..4).for_each(|i| {
            seed = celt_lcg_rand(seed);
            assert_eq!(seed, values[i]);
        });
    }

    #[test]
    fn test_isqrt() {
        [0_u32, 1, 2, 3, 4, 8, 9, 15, 16, 24, 25, 1 << 20, u32::MAX]
            .iter()
            .for_each(|&v| {
                let r = isqrt32(v);
                assert!(u64::from(r) * u64::from(r) <= u64::from(v));
                assert!((u64::from(r) + 1) * (u64::from(r) + 1) > u64::from(v));
            });
    }

    #[test]
    fn test_haar_round_trip() {
        let mut rnd = nanorand::WyRand::new_seed(5);
        let mut x: Vec<f32> = (0..64)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
            .collect();
        let original = x.clone();
        haar1(&mut x, 64, 1);
        haar1(&mut x, 64, 1);
        x.iter().zip(original.iter()).for_each(|(a, b)| {
            assert!((a - b).abs() < 1e-5);
        });
    }

    #[test]
    fn test_interleave_round_trip() {
        let mut rnd = nanorand::WyRand::new_seed(6);
        for &(n0, stride, hadamard) in
            [(8_usize, 4_usize, true), (16, 2, false), (4, 8, true)].iter()
        {
            let mut x: Vec<f32> = (0..n0 * stride)
                .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
                .collect();
            let original = x.clone();
            deinterleave_hadamard(&mut x, n0, stride, hadamard);
            interleave_hadamard(&mut x, n0, stride, hadamard);
            assert_eq!(x, original);
        }
    }

    #[test]
    fn test_stereo_split_merge_preserves_energy() {
        let mut rnd = nanorand::WyRand::new_seed(7);
        let n = 16;
        let mut x: Vec<f32> = (0..n)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
            .collect();
        let mut y: Vec<f32> = (0..n)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
            .collect();
        renormalise_vector(&mut x, 1.0);
        renormalise_vector(&mut y, 1.0);

        stereo_split(&mut x, &mut y);
        // After the split both channels hold mid/side at half energy.
        let total: f32 = x.iter().chain(y.iter()).map(|v| v * v).sum();
        assert!((total - 1.0).abs() < 1e-4, "total = {}", total);

        stereo_merge(&mut x, &mut y, 1.0);
        let ex: f32 = x.iter().map(|v| v * v).sum();
        let ey: f32 = y.iter().map(|v| v * v).sum();
        assert!((ex - 1.0).abs() < 1e-3);
        assert!((ey - 1.0).abs() < 1e-3);
    }

    /// End-to-end: quantize all bands, decode them back, and require the
    /// decoder to reproduce the encoder's bitstream interpretation exactly.
    #[test]
    fn test_quant_all_bands_round_trip() {
        let mut rnd = nanorand::WyRand::new_seed(8);
        for &(lm, stereo) in [(2_usize, false), (3, false), (3, true)].iter() {
            let m = 1 << lm;
            let frame = m * E_BANDS[MAX_BANDS];
            let channels = if stereo { 2 } else { 1 };

            let mut x: Vec<f32> = (0..frame * channels)
                .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
                .collect();
            let mut band_e = [[0.0_f32; MAX_BANDS]; 2];
            compute_band_energies(&x, &mut band_e, MAX_BANDS, channels, m, frame);
            normalise_bands(&mut x, &band_e, MAX_BANDS, channels, m, frame);

            let total_bits = 1000 * (1 << BITRES);
            let caps = init_caps(lm, channels);
            let offsets = [0_i32; MAX_BANDS];
            let request = AllocationRequest {
                start: 0,
                end: MAX_BANDS,
                offsets: &offsets,
                cap: &caps,
                alloc_trim: 5,
                intensity: MAX_BANDS,
                dual_stereo: false,
                total: total_bits - 8,
                channels,
                lm,
                prev_coded_bands: MAX_BANDS,
                signal_bandwidth: MAX_BANDS - 1,
            };

            let mut buffer = vec![0_u8; 1275];
            let mut enc = RangeEncoder::new(&mut buffer);
            let tf_res = [0_i8; MAX_BANDS];
            let mut enc_x = x.clone();
            {
                let mut coder = EntropyCoder::Encoder(&mut enc);
                let alloc = compute_allocation(&request, &mut coder).unwrap();
                let params = BandQuantParams {
                    start: 0,
                    end: MAX_BANDS,
                    eff_ebands: MAX_BANDS,
                    band_e: &band_e,
                    pulses: &alloc.pulses,
                    short_blocks: false,
                    spread: SPREAD_NORMAL,
                    dual_stereo: alloc.dual_stereo,
                    intensity: alloc.intensity,
                    tf_res: &tf_res,
                    total_bits,
                    balance: alloc.balance,
                    lm,
                    coded_bands: alloc.coded_bands,
                    disable_inv: !stereo,
                };
                let mut masks = [0_u8; 2 * MAX_BANDS];
                let mut seed = 0;
                let (x0, y0) = enc_x.split_at_mut(frame);
                quant_all_bands(
                    &params,
                    x0,
                    if stereo { Some(y0) } else { None },
                    &mut masks,
                    &mut coder,
                    &mut seed,
                )
                .unwrap();
            }
            enc.done().unwrap();
            drop(enc);

            let mut dec = RangeDecoder::new(&buffer);
            let mut dec_x = vec![0.0_f32; frame * channels];
            let mut masks = [0_u8; 2 * MAX_BANDS];
            let mut seed = 0;
            {
                let mut coder = EntropyCoder::Decoder(&mut dec);
                let alloc = compute_allocation(&request, &mut coder).unwrap();
                let params = BandQuantParams {
                    start: 0,
                    end: MAX_BANDS,
                    eff_ebands: MAX_BANDS,
                    band_e: &band_e,
                    pulses: &alloc.pulses,
                    short_blocks: false,
                    spread: SPREAD_NORMAL,
                    dual_stereo: alloc.dual_stereo,
                    intensity: alloc.intensity,
                    tf_res: &tf_res,
                    total_bits,
                    balance: alloc.balance,
                    lm,
                    coded_bands: alloc.coded_bands,
                    disable_inv: !stereo,
                };
                let (x0, y0) = dec_x.split_at_mut(frame);
                quant_all_bands(
                    &params,
                    x0,
                    if stereo { Some(y0) } else { None },
                    &mut masks,
                    &mut coder,
                    &mut seed,
                )
                .unwrap();
            }

            // Each coded band must come out with roughly unit norm per
            // channel combination.
            (0..MAX_BANDS).for_each(|i| {
                let lo = m * E_BANDS[i];
                let hi = m * E_BANDS[i + 1];
                let e: f32 = dec_x[lo..hi].iter().map(|v| v * v).sum();
                assert!(
                    e > 0.5 && e < 2.0,
                    "band {} energy {} (lm {}, stereo {})",
                    i,
                    e,
                    lm,
                    stereo
                );
            });
        }
    }
}
