//! Implements the pyramid vector quantizer for the band shapes.

use crate::celt::cwrs::{decode_pulses, encode_pulses};
use crate::encoder_error::EncoderError;
use crate::math::fast_atan2;
use crate::range_coder::{RangeDecoder, RangeEncoder};

/// Spreading decisions, ordered by increasing rotation strength.
pub(crate) const SPREAD_NONE: usize = 0;
pub(crate) const SPREAD_LIGHT: usize = 1;
pub(crate) const SPREAD_NORMAL: usize = 2;
pub(crate) const SPREAD_AGGRESSIVE: usize = 3;

const SPREAD_FACTOR: [usize; 3] = [15, 10, 5];

/// A single rotation pass over the vector with the given stride.
fn exp_rotation1(x: &mut [f32], stride: usize, c: f32, s: f32) {
    let len = x.len();
    let ms = -s;
    (0..len - stride).for_each(|i| {
        let x1 = x[i];
        let x2 = x[i + stride];
        x[i + stride] = c * x2 + s * x1;
        x[i] = c * x1 + ms * x2;
    });
    (0..len.saturating_sub(2 * stride)).rev().for_each(|i| {
        let x1 = x[i];
        let x2 = x[i + stride];
        x[i + stride] = c * x2 + s * x1;
        x[i] = c * x1 + ms * x2;
    });
}

/// Spreads the pulse energy over neighbouring bins by rotating the vector
/// with an angle derived from the pulse density. `dir` is 1 when encoding
/// and -1 when decoding, making the passes exact inverses.
pub(crate) fn exp_rotation(x: &mut [f32], dir: i32, stride: usize, k: usize, spread: usize) {
    let mut len = x.len();
    if 2 * k >= len || spread == SPREAD_NONE {
        return;
    }
    let factor = SPREAD_FACTOR[spread - 1];

    let gain = len as f32 / (len + factor * k) as f32;
    let theta = 0.5 * gain * gain;

    let c = (0.5 * std::f32::consts::PI * theta).cos();
    let s = (0.5 * std::f32::consts::PI * (1.0 - theta)).cos();

    let mut stride2 = 0;
    if len >= 8 * stride {
        // Just a simple way of computing sqrt(len / stride) with rounding.
        stride2 = 1;
        while (stride2 * stride2 + stride2) * stride + (stride >> 2) < len {
            stride2 += 1;
        }
    }

    len /= stride;
    (0..stride).for_each(|i| {
        let part = &mut x[i * len..(i + 1) * len];
        if dir < 0 {
            if stride2 > 0 {
                exp_rotation1(part, stride2, s, c);
            }
            exp_rotation1(part, 1, c, s);
        } else {
            exp_rotation1(part, 1, c, -s);
            if stride2 > 0 {
                exp_rotation1(part, stride2, s, -c);
            }
        }
    });
}

/// Scales the pulse vector to unit norm times `gain` into `x`.
fn normalise_residual(iy: &[i32], x: &mut [f32], ryy: f32, gain: f32) {
    let g = gain / ryy.sqrt();
    x.iter_mut().zip(iy.iter()).for_each(|(value, &pulses)| {
        *value = g * pulses as f32;
    });
}

/// One bit per short block that received at least one pulse. Bands whose
/// mask stays zero in a transient frame have collapsed and are candidates
/// for noise injection.
fn extract_collapse_mask(iy: &[i32], blocks: usize) -> u32 {
    if blocks <= 1 {
        return 1;
    }
    let n0 = iy.len() / blocks;
    let mut mask = 0;
    (0..blocks).for_each(|i| {
        let any = iy[i * n0..(i + 1) * n0].iter().any(|&v| v != 0);
        mask |= u32::from(any) << i;
    });
    mask
}

/// Finds the pulse vector whose direction is closest to `x`.
///
/// Returns the squared norm of the winner. The selection maximises
/// `<x, y>^2 / <y, y>` one pulse at a time after an initial projection,
/// matching the reference search exactly so that encoder decisions are
/// reproducible.
pub(crate) fn op_pvq_search(x: &mut [f32], iy: &mut [i32], k: usize) -> f32 {
    let n = x.len();
    let mut signs = vec![1_i32; n];
    let mut y = vec![0.0_f32; n];

    x.iter_mut().enumerate().for_each(|(j, value)| {
        if *value < 0.0 {
            signs[j] = -1;
            *value = -*value;
        }
        iy[j] = 0;
    });

    let mut xy = 0.0_f32;
    let mut yy = 0.0_f32;
    let mut pulses_left = k as i32;

    // Pre-search by projecting on the pyramid.
    if k as i32 > (n as i32) >> 1 {
        let mut sum: f32 = x.iter().sum();
        // If x is too small, just replace the whole vector with pulses at
        // the first position.
        if !(sum > 1e-15 && sum < 64.0) {
            x[0] = 1.0;
            x[1..].iter_mut().for_each(|value| *value = 0.0);
            sum = 1.0;
        }
        // Using k + e with e < 1 guarantees we cannot get more than k pulses.
        let rcp = (k as f32 + 0.8) / sum;
        (0..n).for_each(|j| {
            iy[j] = (rcp * x[j]).floor() as i32;
            y[j] = iy[j] as f32;
            yy += y[j] * y[j];
            xy += x[j] * y[j];
            y[j] *= 2.0;
            pulses_left -= iy[j];
        });
    }
    debug_assert!(pulses_left >= 0);

    // This should never happen, but just in case it does (e.g. on silence)
    // we fill the first bin with pulses.
    if pulses_left > n as i32 + 3 {
        let tmp = pulses_left as f32;
        yy += tmp * tmp;
        yy += tmp * y[0];
        iy[0] += pulses_left;
        pulses_left = 0;
    }

    (0..pulses_left).for_each(|_| {
        let mut best_num = -1e15_f32;
        let mut best_den = 0.0_f32;
        let mut best_id = 0;
        // The squared magnitude term gets added anyway, so we might as well
        // add it outside the loop.
        yy += 1.0;
        (0..n).for_each(|j| {
            // Temporary sums of the new pulse(s). y[] is scaled by two so
            // the cross term needs no doubling here.
            let rxy = xy + x[j];
            let ryy = yy + y[j];
            let rxy2 = rxy * rxy;
            if best_den * rxy2 > ryy * best_num {
                best_den = ryy;
                best_num = rxy2;
                best_id = j;
            }
        });
        xy += x[best_id];
        yy += y[best_id];
        y[best_id] += 2.0;
        iy[best_id] += 1;
    });

    // Put the original signs back.
    iy.iter_mut().zip(signs.iter()).for_each(|(value, &sign)| {
        if sign < 0 {
            *value = -*value;
        }
    });

    iy.iter().map(|&v| (v * v) as f32).sum()
}

/// Quantizes the unit norm vector `x` with `k` pulses and writes the
/// codeword. `x` is replaced by the quantized shape when `resynth` is set.
#[allow(clippy::too_many_arguments)]
pub(crate) fn alg_quant(
    x: &mut [f32],
    k: usize,
    spread: usize,
    blocks: usize,
    enc: &mut RangeEncoder,
    gain: f32,
    resynth: bool,
) -> Result<u32, EncoderError> {
    let n = x.len();
    debug_assert!(k > 0, "alg_quant() needs at least one pulse");
    debug_assert!(n > 1, "alg_quant() needs at least two dimensions");

    let mut iy = vec![0_i32; n];
    exp_rotation(x, 1, blocks, k, spread);
    let yy = op_pvq_search(x, &mut iy, k);
    encode_pulses(&iy, k, enc)?;

    if resynth {
        normalise_residual(&iy, x, yy, gain);
        exp_rotation(x, -1, blocks, k, spread);
    }

    Ok(extract_collapse_mask(&iy, blocks))
}

/// Decodes a codeword and reconstructs the band shape with gain `gain`.
pub(crate) fn alg_unquant(
    x: &mut [f32],
    k: usize,
    spread: usize,
    blocks: usize,
    dec: &mut RangeDecoder,
    gain: f32,
) -> u32 {
    let n = x.len();
    debug_assert!(k > 0, "alg_unquant() needs at least one pulse");
    debug_assert!(n > 1, "alg_unquant() needs at least two dimensions");

    let mut iy = vec![0_i32; n];
    decode_pulses(&mut iy, k, dec);
    let ryy: f32 = iy.iter().map(|&v| (v * v) as f32).sum();
    normalise_residual(&iy, x, ryy, gain);
    exp_rotation(x, -1, blocks, k, spread);
    extract_collapse_mask(&iy, blocks)
}

/// Scales `x` to unit norm times `gain`.
pub(crate) fn renormalise_vector(x: &mut [f32], gain: f32) {
    let energy: f32 = 1e-15 + x.iter().map(|v| v * v).sum::<f32>();
    let g = gain / energy.sqrt();
    x.iter_mut().for_each(|value| *value *= g);
}

/// The quantized mid/side angle of a band pair in Q14, `16384` being pi/2.
pub(crate) fn stereo_itheta(x: &[f32], y: &[f32], stereo: bool) -> i32 {
    let mut emid = 1e-15_f32;
    let mut eside = 1e-15_f32;
    if stereo {
        x.iter().zip(y.iter()).for_each(|(&l, &r)| {
            let m = 0.5 * (l + r);
            let s = 0.5 * (l - r);
            emid += m * m;
            eside += s * s;
        });
    } else {
        emid += x.iter().map(|v| v * v).sum::<f32>();
        eside += y.iter().map(|v| v * v).sum::<f32>();
    }
    let mid = emid.sqrt();
    let side = eside.sqrt();
    // 0.63662 = 2/pi
    (0.5 + 16384.0 * 0.63662 * fast_atan2(mid, side)).floor() as i32
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;

    use super::*;

    fn random_unit_vector(n: usize, rnd: &mut nanorand::WyRand) -> Vec<f32> {
        let mut x: Vec<f32> = (0..n)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
            .collect();
        renormalise_vector(&mut x, 1.0);
        x
    }

    #[test]
    fn test_search_distributes_all_pulses() {
        let mut rnd = nanorand::WyRand::new_seed(1);
        (0..100).for_each(|_| {
            let n = rnd.generate_range::<usize>(2, 32);
            let k = rnd.generate_range::<usize>(1, 16);
            let mut x = random_unit_vector(n, &mut rnd);
            let mut iy = vec![0_i32; n];
            let yy = op_pvq_search(&mut x, &mut iy, k);

            let total: i32 = iy.iter().map(|v| v.abs()).sum();
            assert_eq!(total as usize, k);
            let expected_yy: f32 = iy.iter().map(|&v| (v * v) as f32).sum();
            assert!((yy - expected_yy).abs() < 1e-3);
        });
    }

    #[test]
    fn test_search_matches_brute_force() {
        let mut rnd = nanorand::WyRand::new_seed(2);
        (0..50).for_each(|_| {
            let n = rnd.generate_range::<usize>(2, 5);
            let k = rnd.generate_range::<usize>(1, 4);
            let x = random_unit_vector(n, &mut rnd);

            let mut work = x.clone();
            let mut iy = vec![0_i32; n];
            op_pvq_search(&mut work, &mut iy, k);

            let score = |y: &[i32]| {
                let xy: f32 = x.iter().zip(y.iter()).map(|(&a, &b)| a * b as f32).sum();
                let yy: f32 = y.iter().map(|&v| (v * v) as f32).sum();
                xy * xy / yy
            };

            // Exhaustive check over every pulse vector.
            fn enumerate(n: usize, k: i32, found: &mut Vec<Vec<i32>>, prefix: &mut Vec<i32>) {
                if n == 1 {
                    for last in [k, -k].iter() {
                        let mut v = prefix.clone();
                        v.push(*last);
                        found.push(v);
                        if k == 0 {
                            break;
                        }
                    }
                    return;
                }
                for head in -k..=k {
                    prefix.push(head);
                    enumerate(n - 1, k - head.abs(), found, prefix);
                    prefix.pop();
                }
            }
            let mut all = Vec::new();
            enumerate(n, k as i32, &mut all, &mut Vec::new());
            let best = all
                .iter()
                .map(|y| score(y))
                .fold(0.0_f32, |a, b| a.max(b));

            // The greedy search is the reference algorithm. It does not
            // always find the global optimum, but it must come close.
            assert!(score(&iy) >= best * 0.9 - 1e-6);
        });
    }

    #[test]
    fn test_quantized_shape_has_unit_norm() {
        let mut rnd = nanorand::WyRand::new_seed(3);
        (0..50).for_each(|_| {
            let n = rnd.generate_range::<usize>(2, 24);
            let k = rnd.generate_range::<usize>(1, 10);
            let mut x = random_unit_vector(n, &mut rnd);

            let mut buffer = vec![0_u8; 128];
            let mut enc = crate::range_coder::RangeEncoder::new(&mut buffer);
            alg_quant(&mut x, k, SPREAD_NORMAL, 1, &mut enc, 1.0, true).unwrap();
            enc.done().unwrap();
            drop(enc);

            let norm: f32 = x.iter().map(|v| v * v).sum();
            assert!((norm - 1.0).abs() < 1e-5, "norm = {}", norm);

            let mut dec = crate::range_coder::RangeDecoder::new(&buffer);
            let mut decoded = vec![0.0_f32; n];
            alg_unquant(&mut decoded, k, SPREAD_NORMAL, 1, &mut dec, 1.0);

            let norm: f32 = decoded.iter().map(|v| v * v).sum();
            assert!((norm - 1.0).abs() < 1e-5, "norm = {}", norm);

            // Encoder resynthesis and decoder output must agree.
            x.iter().zip(decoded.iter()).for_each(|(a, b)| {
                assert!((a - b).abs() < 1e-6);
            });
        });
    }

    #[test]
    fn test_rotation_round_trip() {
        let mut rnd = nanorand::WyRand::new_seed(4);
        [SPREAD_LIGHT, SPREAD_NORMAL, SPREAD_AGGRESSIVE]
            .iter()
            .for_each(|&spread| {
                let n = 64;
                let x = random_unit_vector(n, &mut rnd);
                let mut work = x.clone();
                exp_rotation(&mut work, 1, 2, 3, spread);
                exp_rotation(&mut work, -1, 2, 3, spread);
                work.iter().zip(x.iter()).for_each(|(a, b)| {
                    assert!((a - b).abs() < 1e-5);
                });
            });
    }

    #[test]
    fn test_stereo_itheta_range() {
        let n = 16;
        let x = vec![0.25_f32; n];
        let zeros = vec![0.0_f32; n];
        // All mid: angle 0. All side: angle 16384.
        assert_eq!(stereo_itheta(&x, &zeros, false), 0);
        assert_eq!(stereo_itheta(&zeros, &x, false), 16384);
    }
}
