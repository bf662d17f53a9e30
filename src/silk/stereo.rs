//! Mid/side stereo decoding.

use crate::range_coder::RangeDecoder;
use crate::silk::math::{rshift_round, sat16, smlabb, smlawb, smulbb, smulwb};
use crate::silk::tables::{
    STEREO_INTERP_LEN_MS, STEREO_ONLY_CODE_MID_ICDF, STEREO_PRED_JOINT_ICDF,
    STEREO_PRED_QUANT_Q13, STEREO_QUANT_SUB_STEPS, UNIFORM3_ICDF, UNIFORM5_ICDF,
};

/// Stereo reconstruction state carried between frames.
#[derive(Clone, Debug, Default)]
pub(crate) struct StereoDecodeState {
    pub(crate) pred_prev_q13: [i32; 2],
    pub(crate) mid_history: [i16; 2],
    pub(crate) side_history: [i16; 2],
}

impl StereoDecodeState {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Decodes the two side predictor weights.
pub(crate) fn stereo_decode_pred(dec: &mut RangeDecoder<'_>) -> [i32; 2] {
    let n = dec.decode_icdf(&STEREO_PRED_JOINT_ICDF, 8) as i32;
    let mut ix = [[0_i32; 3]; 2];
    ix[0][2] = n / 5;
    ix[1][2] = n - 5 * ix[0][2];
    (0..2).for_each(|i| {
        ix[i][0] = dec.decode_icdf(&UNIFORM3_ICDF, 8) as i32;
        ix[i][1] = dec.decode_icdf(&UNIFORM5_ICDF, 8) as i32;
    });

    let mut pred_q13 = [0_i32; 2];
    (0..2).for_each(|i| {
        ix[i][0] += 3 * ix[i][2];
        let low_q13 = STEREO_PRED_QUANT_Q13[ix[i][0] as usize];
        let step_q13 = smulwb(
            STEREO_PRED_QUANT_Q13[ix[i][0] as usize + 1] - low_q13,
            (0.5 / STEREO_QUANT_SUB_STEPS as f64 * 65536.0) as i32,
        );
        pred_q13[i] = smlabb(low_q13, step_q13, 2 * ix[i][1] + 1);
    });

    // Subtract second from first predictor, which helps when applying them.
    pred_q13[0] -= pred_q13[1];
    pred_q13
}

/// Reads the mid-only flag of a frame whose side channel is not coded.
pub(crate) fn stereo_decode_mid_only(dec: &mut RangeDecoder<'_>) -> bool {
    dec.decode_icdf(&STEREO_ONLY_CODE_MID_ICDF, 8) != 0
}

/// Converts the mid/side signals to left/right in place, interpolating the
/// predictors over the first 8 ms.
pub(crate) fn stereo_ms_to_lr(
    state: &mut StereoDecodeState,
    mid: &mut [i16],
    side: &mut [i16],
    pred_q13: &[i32; 2],
    fs_khz: usize,
    frame_length: usize,
) {
    // Two sample buffering delay on both channels.
    let mut x1 = vec![0_i16; frame_length + 2];
    let mut x2 = vec![0_i16; frame_length + 2];
    x1[..2].copy_from_slice(&state.mid_history);
    x2[..2].copy_from_slice(&state.side_history);
    x1[2..].copy_from_slice(&mid[..frame_length]);
    x2[2..].copy_from_slice(&side[..frame_length]);
    state.mid_history = [x1[frame_length], x1[frame_length + 1]];
    state.side_history = [x2[frame_length], x2[frame_length + 1]];

    // Interpolate the predictors and add the mid prediction to the side.
    let interp_len = STEREO_INTERP_LEN_MS * fs_khz;
    let mut pred0_q13 = state.pred_prev_q13[0];
    let mut pred1_q13 = state.pred_prev_q13[1];
    let denom_q16 = (1 << 16) / interp_len as i32;
    let delta0_q13 = rshift_round(smulbb(pred_q13[0] - state.pred_prev_q13[0], denom_q16), 16);
    let delta1_q13 = rshift_round(smulbb(pred_q13[1] - state.pred_prev_q13[1], denom_q16), 16);
    (0..interp_len.min(frame_length)).for_each(|n| {
        pred0_q13 += delta0_q13;
        pred1_q13 += delta1_q13;
        unmix_sample(&x1, &mut x2, n, pred0_q13, pred1_q13);
    });
    let pred0_q13 = pred_q13[0];
    let pred1_q13 = pred_q13[1];
    (interp_len.min(frame_length)..frame_length).for_each(|n| {
        unmix_sample(&x1, &mut x2, n, pred0_q13, pred1_q13);
    });
    state.pred_prev_q13 = *pred_q13;

    // Convert to left/right signals.
    (0..frame_length).for_each(|n| {
        let sum = i32::from(x1[n + 1]) + i32::from(x2[n + 1]);
        let diff = i32::from(x1[n + 1]) - i32::from(x2[n + 1]);
        mid[n] = sat16(sum);
        side[n] = sat16(diff);
    });
}

#[inline(always)]
fn unmix_sample(x1: &[i16], x2: &mut [i16], n: usize, pred0_q13: i32, pred1_q13: i32) {
    // Low-passed mid signal in Q11.
    let lp = (i32::from(x1[n]) + i32::from(x1[n + 2]) + 2 * i32::from(x1[n + 1])) << 9;
    let mut sum = smlawb(i32::from(x2[n + 1]) << 8, lp, pred0_q13); // Q8
    sum = smlawb(sum, i32::from(x1[n + 1]) << 11, pred1_q13); // Q8
    x2[n + 1] = sat16(rshift_round(sum, 8));
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_zero_side_and_pred_gives_dual_mono() {
        let mut state = StereoDecodeState::default();
        let frame_length = 160;
        let mut mid: Vec<i16> = (0..frame_length)
            .map(|i| ((i as f32 * 0.3).sin() * 8000.0) as i16)
            .collect();
        let original = mid.clone();
        let mut side = vec![0_i16; frame_length];

        stereo_ms_to_lr(&mut state, &mut mid, &mut side, &[0, 0], 16, frame_length);

        // With zero side and zero predictors, left == right == delayed mid.
        (2..frame_length).for_each(|n| {
            assert_eq!(mid[n], original[n - 1]);
            assert_eq!(side[n], original[n - 1]);
        });
    }

    #[test]
    fn test_predictor_state_carries_over() {
        let mut state = StereoDecodeState::default();
        let frame_length = 160;
        let mut mid = vec![1000_i16; frame_length];
        let mut side = vec![0_i16; frame_length];
        stereo_ms_to_lr(&mut state, &mut mid, &mut side, &[4000, -2000], 16, frame_length);
        assert_eq!(state.pred_prev_q13, [4000, -2000]);
        assert_eq!(state.mid_history, [1000, 1000]);
    }
}
