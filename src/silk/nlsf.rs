//! Normalized line spectral frequency decoding and conversion to LPC.

use crate::range_coder::RangeDecoder;
use crate::silk::math::{div32_varq, sat16, smlawb, smulbb, sqrt_approx};
use crate::silk::tables::{
    NlsfCodebook, LSF_COS_TAB_Q12, MAX_LPC_ORDER, NLSF_EXT_ICDF, NLSF_QUANT_MAX_AMPLITUDE,
};

/// Weight resolution of the Laroia weights.
const NLSF_W_Q: i32 = 2;
/// Residual levels are shrunk towards zero by this amount in Q10.
const NLSF_QUANT_LEVEL_ADJ_Q10: i32 = 102; // 0.1

/// The decoded NLSF index set: the stage 1 vector and the per coefficient
/// stage 2 residual levels.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct NlsfIndices {
    pub(crate) index1: usize,
    pub(crate) residuals: [i32; MAX_LPC_ORDER],
}

/// Reads the two stage NLSF indices, in bitstream order.
pub(crate) fn nlsf_decode_indices(
    cb: &NlsfCodebook,
    signal_type: i32,
    dec: &mut RangeDecoder<'_>,
) -> NlsfIndices {
    let order = cb.order;

    // Stage 1: the codebook vector.
    let half = usize::from(signal_type >> 1 == 1) * cb.n_vectors;
    let index1 = dec.decode_icdf(&cb.cb1_icdf[half..half + cb.n_vectors], 8) as usize;

    // Unpack the stage 2 table selections of this vector.
    let mut ec_ix = [0_usize; MAX_LPC_ORDER];
    let mut pred_q8 = [0_i32; MAX_LPC_ORDER];
    nlsf_unpack(&mut ec_ix, &mut pred_q8, cb, index1);

    // Stage 2: per coefficient residual indices.
    let mut indices = NlsfIndices {
        index1,
        residuals: [0; MAX_LPC_ORDER],
    };
    (0..order).for_each(|i| {
        let mut ind = dec.decode_icdf(&cb.ec_icdf[ec_ix[i]..ec_ix[i] + 9], 8) as i32
            - NLSF_QUANT_MAX_AMPLITUDE;
        if ind == -NLSF_QUANT_MAX_AMPLITUDE {
            ind -= dec.decode_icdf(&NLSF_EXT_ICDF, 8) as i32;
        } else if ind == NLSF_QUANT_MAX_AMPLITUDE {
            ind += dec.decode_icdf(&NLSF_EXT_ICDF, 8) as i32;
        }
        indices.residuals[i] = ind;
    });
    indices
}

/// Reconstructs the Q15 NLSF vector from a decoded index set.
pub(crate) fn nlsf_reconstruct(nlsf_q15: &mut [i16], cb: &NlsfCodebook, decoded: &NlsfIndices) {
    let order = cb.order;
    let index1 = decoded.index1;
    let indices = &decoded.residuals;

    let mut ec_ix = [0_usize; MAX_LPC_ORDER];
    let mut pred_q8 = [0_i32; MAX_LPC_ORDER];
    nlsf_unpack(&mut ec_ix, &mut pred_q8, cb, index1);

    // Backwards prediction of the residual.
    let mut res_q10 = [0_i32; MAX_LPC_ORDER];
    let mut out_q10 = 0_i32;
    (0..order).rev().for_each(|i| {
        let pred_q10 = smulbb(out_q10, pred_q8[i]) >> 8;
        out_q10 = indices[i] << 10;
        if out_q10 > 0 {
            out_q10 -= NLSF_QUANT_LEVEL_ADJ_Q10;
        } else if out_q10 < 0 {
            out_q10 += NLSF_QUANT_LEVEL_ADJ_Q10;
        }
        out_q10 = smlawb(pred_q10, out_q10, cb.quant_step_size_q16);
        res_q10[i] = out_q10;
    });

    // Reconstruct from the codebook vector, with the residual scaled by the
    // inverse square root of the Laroia weights.
    let base = &cb.cb1_nlsf_q8[index1 * order..(index1 + 1) * order];
    (0..order).for_each(|i| {
        nlsf_q15[i] = (i32::from(base[i]) << 7) as i16;
    });
    let mut weights_q = [0_i32; MAX_LPC_ORDER];
    nlsf_vq_weights_laroia(&mut weights_q, nlsf_q15, order);
    (0..order).for_each(|i| {
        let w_q9 = sqrt_approx(weights_q[i] << (18 - NLSF_W_Q));
        let value = i32::from(nlsf_q15[i]) + div32_varq(res_q10[i], i32::max(w_q9, 1), 14);
        nlsf_q15[i] = sat16(value);
    });

    nlsf_stabilize(&mut nlsf_q15[..order], cb.delta_min_q15);
}

/// Unpacks the per coefficient table and predictor selections of a stage 1
/// vector; two coefficients share one selection byte.
fn nlsf_unpack(
    ec_ix: &mut [usize; MAX_LPC_ORDER],
    pred_q8: &mut [i32; MAX_LPC_ORDER],
    cb: &NlsfCodebook,
    index1: usize,
) {
    let order = cb.order;
    let sel = &cb.ec_sel[index1 * order / 2..(index1 + 1) * order / 2];
    let stride = (2 * NLSF_QUANT_MAX_AMPLITUDE + 1) as usize;
    (0..order / 2).for_each(|i| {
        let entry = i32::from(sel[i]);
        ec_ix[2 * i] = (((entry >> 1) & 7) as usize) * stride;
        pred_q8[2 * i] =
            i32::from(cb.pred_q8[2 * i + ((entry & 1) as usize) * (order - 1)]);
        ec_ix[2 * i + 1] = (((entry >> 5) & 7) as usize) * stride;
        pred_q8[2 * i + 1] =
            i32::from(cb.pred_q8[2 * i + 1 + (((entry >> 4) & 1) as usize) * (order - 1)]);
    });
}

/// The Laroia spectral distortion weights, roughly the inverse distance to
/// the two neighbours.
pub(crate) fn nlsf_vq_weights_laroia(weights: &mut [i32; MAX_LPC_ORDER], nlsf_q15: &[i16], order: usize) {
    debug_assert!(order >= 2);
    let one = 1_i32 << (15 + NLSF_W_Q);

    let mut tmp1 = one / i32::max(i32::from(nlsf_q15[0]), 1);
    let mut tmp2 = one / i32::max(i32::from(nlsf_q15[1]) - i32::from(nlsf_q15[0]), 1);
    weights[0] = i32::min(tmp1 + tmp2, i32::from(i16::MAX));

    let mut k = 1;
    while k < order - 1 {
        tmp1 = one / i32::max(i32::from(nlsf_q15[k + 1]) - i32::from(nlsf_q15[k]), 1);
        weights[k] = i32::min(tmp1 + tmp2, i32::from(i16::MAX));
        if k + 1 >= order - 1 {
            tmp2 = tmp1;
            break;
        }
        tmp2 = one / i32::max(i32::from(nlsf_q15[k + 2]) - i32::from(nlsf_q15[k + 1]), 1);
        weights[k + 1] = i32::min(tmp1 + tmp2, i32::from(i16::MAX));
        k += 2;
    }
    weights[order - 1] = i32::min(tmp2, i32::from(i16::MAX));
}

/// Enforces the ordering and the minimum distances of an NLSF vector.
pub(crate) fn nlsf_stabilize(nlsf_q15: &mut [i16], delta_min_q15: &[i32]) {
    let order = nlsf_q15.len();

    // A few gentle local repairs first.
    for _ in 0..20 {
        // Find the smallest distance and its position.
        let mut min_diff = i32::from(nlsf_q15[0]) - delta_min_q15[0];
        let mut min_index = 0;
        (1..order).for_each(|i| {
            let diff = i32::from(nlsf_q15[i]) - i32::from(nlsf_q15[i - 1]) - delta_min_q15[i];
            if diff < min_diff {
                min_diff = diff;
                min_index = i;
            }
        });
        let end_diff =
            (1 << 15) - i32::from(nlsf_q15[order - 1]) - delta_min_q15[order];
        if end_diff < min_diff {
            min_diff = end_diff;
            min_index = order;
        }

        if min_diff >= 0 {
            return;
        }

        if min_index == 0 {
            nlsf_q15[0] = delta_min_q15[0] as i16;
        } else if min_index == order {
            nlsf_q15[order - 1] = ((1 << 15) - delta_min_q15[order]) as i16;
        } else {
            // Move the pair apart, weighted by the room on each side.
            let min_center = {
                let mut center = delta_min_q15[min_index] >> 1;
                (0..min_index).for_each(|k| center += delta_min_q15[k]);
                center
            };
            let max_center = {
                let mut center = (1 << 15) - (delta_min_q15[min_index] >> 1);
                (min_index + 1..=order).for_each(|k| center -= delta_min_q15[k]);
                center
            };
            let center =
                (i32::from(nlsf_q15[min_index - 1]) + i32::from(nlsf_q15[min_index])) >> 1;
            let center = i32::max(min_center, i32::min(max_center, center));
            nlsf_q15[min_index - 1] = sat16(center - (delta_min_q15[min_index] >> 1));
            nlsf_q15[min_index] =
                sat16(i32::from(nlsf_q15[min_index - 1]) + delta_min_q15[min_index]);
        }
    }

    // Fallback: sort and clamp from both ends.
    nlsf_q15.sort_unstable();
    (0..order).for_each(|i| {
        let floor = if i == 0 {
            delta_min_q15[0]
        } else {
            i32::from(nlsf_q15[i - 1]) + delta_min_q15[i]
        };
        nlsf_q15[i] = sat16(i32::max(i32::from(nlsf_q15[i]), floor));
    });
    (0..order).rev().for_each(|i| {
        let ceil = if i == order - 1 {
            (1 << 15) - delta_min_q15[order]
        } else {
            i32::from(nlsf_q15[i + 1]) - delta_min_q15[i + 1]
        };
        nlsf_q15[i] = sat16(i32::min(i32::from(nlsf_q15[i]), ceil));
    });
}

/// Interpolates the previous and the current NLSFs in Q2 steps.
pub(crate) fn nlsf_interpolate(
    out_q15: &mut [i16],
    prev_q15: &[i16],
    curr_q15: &[i16],
    factor_q2: i32,
    order: usize,
) {
    (0..order).for_each(|i| {
        out_q15[i] = sat16(
            i32::from(prev_q15[i])
                + ((factor_q2 * (i32::from(curr_q15[i]) - i32::from(prev_q15[i]))) >> 2),
        );
    });
}

/// Converts an NLSF vector to LPC coefficients in Q12.
///
/// The polynomial construction runs in Q16; on overflow of the Q12 output
/// the vector is bandwidth expanded and the conversion retried.
pub(crate) fn nlsf_to_lpc(a_q12: &mut [i16], nlsf_q15: &[i16]) {
    let order = nlsf_q15.len();
    debug_assert!(order % 2 == 0);

    // Cosine of the line frequencies with table interpolation, Q17.
    let mut cos_q17 = [0_i32; MAX_LPC_ORDER];
    (0..order).for_each(|k| {
        let f = i32::from(nlsf_q15[k]);
        let index = (f >> 8) as usize;
        let frac = f & 255;
        cos_q17[k] = (LSF_COS_TAB_Q12[index] << 5)
            + frac * ((LSF_COS_TAB_Q12[index + 1] - LSF_COS_TAB_Q12[index]) >> 3);
    });

    let half = order / 2;
    let mut p = [0_i64; MAX_LPC_ORDER / 2 + 2];
    let mut q = [0_i64; MAX_LPC_ORDER / 2 + 2];
    poly_from_roots(&mut p, &cos_q17, 0, half);
    poly_from_roots(&mut q, &cos_q17, 1, half);

    let mut a32_q17 = [0_i32; MAX_LPC_ORDER];
    (0..half).for_each(|k| {
        // P is symmetric, Q antisymmetric.
        let p_term = p[k + 1] + p[k];
        let q_term = q[k + 1] - q[k];
        a32_q17[k] = (-q_term - p_term) as i32;
        a32_q17[order - 1 - k] = (q_term - p_term) as i32;
    });

    // Fit into 16 bit Q12 with up to ten rounds of bandwidth expansion.
    for round in 0..10 {
        let mut max_abs = 0_i32;
        a32_q17.iter().take(order).for_each(|&a| {
            max_abs = i32::max(max_abs, a.abs());
        });
        let max_abs_q12 = (max_abs + 16) >> 5;
        if max_abs_q12 <= i32::from(i16::MAX) || round == 9 {
            break;
        }
        // Bring the largest coefficient just inside the representable range.
        let chirp_q16 = 65536 - (65536 * (max_abs_q12 - 32767)) / (max_abs_q12 + 163_838);
        bandwidth_expand(&mut a32_q17[..order], chirp_q16);
    }

    (0..order).for_each(|k| {
        a_q12[k] = sat16((a32_q17[k] + 16) >> 5);
    });
}

/// Builds the polynomial with the given cosine roots, interleaved over the
/// even or odd positions.
fn poly_from_roots(out: &mut [i64], cos_q17: &[i32], first: usize, count: usize) {
    out.iter_mut().for_each(|v| *v = 0);
    out[0] = 1 << 16;
    let mut degree = 0;
    let mut k = first;
    (0..count).for_each(|_| {
        let root = i64::from(cos_q17[k]);
        // Multiply by (1 - 2 cos(w) z^-1 + z^-2).
        degree += 1;
        let mut carry_prev = 0_i64;
        let mut carry_prev2 = 0_i64;
        (0..=degree).for_each(|j| {
            let original = out[j];
            let mut value = original;
            value -= (root * carry_prev) >> 16;
            value += carry_prev2;
            out[j] = value;
            carry_prev2 = carry_prev;
            carry_prev = original;
        });
        k += 2;
    });
}

/// Scales the coefficients by powers of the chirp factor.
fn bandwidth_expand(a_q17: &mut [i32], chirp_q16: i32) {
    let mut factor_q16 = chirp_q16;
    a_q17.iter_mut().for_each(|a| {
        *a = ((i64::from(*a) * i64::from(factor_q16)) >> 16) as i32;
        factor_q16 = ((i64::from(factor_q16) * i64::from(chirp_q16)) >> 16) as i32;
    });
}
