//! The frame level Silk decoder.

use crate::decoder_error::DecoderError;
use crate::range_coder::RangeDecoder;
use crate::silk::excitation::decode_pulses;
use crate::silk::math::{
    add_sat32, inverse32_varq, lshift_sat32, rshift_round, sat16, silk_rand, smlabb, smlawb,
    smulwb, smulww,
};
use crate::silk::nlsf::{
    nlsf_decode_indices, nlsf_interpolate, nlsf_reconstruct, nlsf_to_lpc, NlsfIndices,
};
use crate::silk::resampler::Resampler;
use crate::silk::stereo::{
    stereo_decode_mid_only, stereo_decode_pred, stereo_ms_to_lr, StereoDecodeState,
};
use crate::silk::tables::{
    NlsfCodebook, CB_LAGS_STAGE2, CB_LAGS_STAGE2_10_MS, CB_LAGS_STAGE3, CB_LAGS_STAGE3_10_MS,
    DELTA_GAIN_ICDF, GAIN_ICDF, LBRR_FLAGS_2_ICDF, LBRR_FLAGS_3_ICDF, LTP_GAIN_ICDF_0,
    LTP_GAIN_ICDF_1, LTP_GAIN_ICDF_2, LTP_ORDER, LTP_PER_INDEX_ICDF, LTP_SCALES_TABLE_Q14,
    LTP_SCALE_ICDF, MAX_DELTA_GAIN_QUANT, MAX_LPC_ORDER, MIN_DELTA_GAIN_QUANT, MIN_LPC_ORDER,
    NLSF_CB_NB_MB, NLSF_CB_WB, NLSF_INTERPOLATION_FACTOR_ICDF, N_LEVELS_QGAIN, PE_MAX_LAG_MS,
    PE_MIN_LAG_MS, PITCH_CONTOUR_10_MS_ICDF, PITCH_CONTOUR_10_MS_NB_ICDF, PITCH_CONTOUR_ICDF,
    PITCH_CONTOUR_NB_ICDF, PITCH_DELTA_ICDF, PITCH_LAG_ICDF, QUANTIZATION_OFFSETS_Q10,
    QUANT_LEVEL_ADJUST_Q10, TYPE_OFFSET_NO_VAD_ICDF, TYPE_OFFSET_VAD_ICDF, UNIFORM4_ICDF,
    UNIFORM6_ICDF, UNIFORM8_ICDF, LTP_VQ_Q7_0, LTP_VQ_Q7_1, LTP_VQ_Q7_2,
};
use crate::silk::{CondCoding, TYPE_VOICED};
use crate::{Bandwidth, SamplingRate};

/// The largest frame at 16 kHz: 20 ms.
const MAX_FRAME_LENGTH: usize = 320;
/// The largest subframe: 5 ms at 16 kHz.
const MAX_SUBFR_LENGTH: usize = 80;
const MAX_NB_SUBFR: usize = 4;
/// Bandwidth expansion applied to the LPC after a loss, Q16.
const BWE_AFTER_LOSS_Q16: i32 = 63570;
/// Gain decay per concealed frame, Q16.
const PLC_GAIN_DECAY_Q16: i32 = 55000;

/// Side information of one frame.
#[derive(Clone, Debug, Default)]
struct FrameIndices {
    signal_type: i32,
    quant_offset_type: i32,
    gains_indices: [i32; MAX_NB_SUBFR],
    nlsf: NlsfIndices,
    nlsf_interp_q2: i32,
    lag_index: i32,
    contour_index: i32,
    per_index: i32,
    ltp_index: [i32; MAX_NB_SUBFR],
    ltp_scale_index: i32,
    seed: i32,
}

/// Decoded control values of one frame.
#[derive(Clone, Debug, Default)]
struct FrameControl {
    pred_coef_q12: [[i16; MAX_LPC_ORDER]; 2],
    ltp_coef_q14: [i32; MAX_NB_SUBFR * LTP_ORDER],
    gains_q16: [i32; MAX_NB_SUBFR],
    pitch_lags: [i32; MAX_NB_SUBFR],
    ltp_scale_q14: i32,
}

/// Per channel decoder state.
pub(crate) struct ChannelDecoder {
    fs_khz: usize,
    frame_length: usize,
    subfr_length: usize,
    nb_subfr: usize,
    ltp_mem_length: usize,
    lpc_order: usize,

    indices: FrameIndices,
    prev_nlsf_q15: [i16; MAX_LPC_ORDER],
    first_frame_after_reset: bool,
    ec_prev_signal_type: i32,
    ec_prev_lag_index: i32,
    last_gain_index: i32,
    loss_count: u32,
    lag_prev: i32,
    prev_gain_q16: i32,
    plc_rand_seed: i32,

    /// LTP history plus scratch for the rewhitening.
    out_buf: [i16; MAX_FRAME_LENGTH + 2 * MAX_SUBFR_LENGTH],
    slpc_q14: [i32; MAX_LPC_ORDER],
    exc_q14: [i32; MAX_FRAME_LENGTH],

    vad_flags: [bool; 3],
    lbrr_flag: bool,
    lbrr_flags: [bool; 3],
}

impl ChannelDecoder {
    fn new() -> Self {
        Self {
            fs_khz: 0,
            frame_length: 0,
            subfr_length: 0,
            nb_subfr: 0,
            ltp_mem_length: 0,
            lpc_order: MIN_LPC_ORDER,
            indices: FrameIndices::default(),
            prev_nlsf_q15: [0; MAX_LPC_ORDER],
            first_frame_after_reset: true,
            ec_prev_signal_type: 0,
            ec_prev_lag_index: 0,
            last_gain_index: 10,
            loss_count: 0,
            lag_prev: 0,
            prev_gain_q16: 65536,
            plc_rand_seed: 22222,
            out_buf: [0; MAX_FRAME_LENGTH + 2 * MAX_SUBFR_LENGTH],
            slpc_q14: [0; MAX_LPC_ORDER],
            exc_q14: [0; MAX_FRAME_LENGTH],
            vad_flags: [false; 3],
            lbrr_flag: false,
            lbrr_flags: [false; 3],
        }
    }

    fn reset(&mut self) {
        let fs = self.fs_khz;
        let nb = self.nb_subfr;
        *self = Self::new();
        if fs != 0 {
            self.set_rate(fs, nb);
        }
    }

    fn nlsf_codebook(&self) -> &'static NlsfCodebook {
        if self.fs_khz == 16 {
            &NLSF_CB_WB
        } else {
            &NLSF_CB_NB_MB
        }
    }

    /// Configures the internal rate and frame split. A rate change resets
    /// all prediction state.
    fn set_rate(&mut self, fs_khz: usize, nb_subfr: usize) {
        if self.fs_khz != fs_khz || self.nb_subfr != nb_subfr {
            log::debug!(
                "internal rate {} kHz, {} subframes",
                fs_khz,
                nb_subfr
            );
            if self.fs_khz != fs_khz {
                self.prev_nlsf_q15 = [0; MAX_LPC_ORDER];
                self.out_buf = [0; MAX_FRAME_LENGTH + 2 * MAX_SUBFR_LENGTH];
                self.slpc_q14 = [0; MAX_LPC_ORDER];
                self.lag_prev = 100 * fs_khz as i32 / 10;
                self.last_gain_index = 10;
                self.first_frame_after_reset = true;
                self.ec_prev_signal_type = 0;
                self.ec_prev_lag_index = 0;
            }
            self.fs_khz = fs_khz;
            self.nb_subfr = nb_subfr;
            self.subfr_length = 5 * fs_khz;
            self.frame_length = self.subfr_length * nb_subfr;
            self.ltp_mem_length = 20 * fs_khz;
            self.lpc_order = if fs_khz == 16 {
                MAX_LPC_ORDER
            } else {
                MIN_LPC_ORDER
            };
        }
    }

    fn pitch_low_bits_icdf(&self) -> &'static [u8] {
        match self.fs_khz {
            8 => &UNIFORM4_ICDF,
            12 => &UNIFORM6_ICDF,
            _ => &UNIFORM8_ICDF,
        }
    }

    fn pitch_contour_icdf(&self) -> &'static [u8] {
        if self.nb_subfr == MAX_NB_SUBFR {
            if self.fs_khz == 8 {
                &PITCH_CONTOUR_NB_ICDF
            } else {
                &PITCH_CONTOUR_ICDF
            }
        } else if self.fs_khz == 8 {
            &PITCH_CONTOUR_10_MS_NB_ICDF
        } else {
            &PITCH_CONTOUR_10_MS_ICDF
        }
    }

    /// Reads all side information of one frame, in bitstream order.
    fn decode_indices(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        frame_index: usize,
        decode_lbrr: bool,
        cond_coding: CondCoding,
    ) {
        // Signal type and quantizer offset.
        let type_offset = if decode_lbrr || self.vad_flags[frame_index] {
            dec.decode_icdf(&TYPE_OFFSET_VAD_ICDF, 8) as i32 + 2
        } else {
            dec.decode_icdf(&TYPE_OFFSET_NO_VAD_ICDF, 8) as i32
        };
        self.indices.signal_type = type_offset >> 1;
        self.indices.quant_offset_type = type_offset & 1;

        // Gains, either delta coded or in two absolute stages.
        if cond_coding == CondCoding::Conditionally {
            self.indices.gains_indices[0] = dec.decode_icdf(&DELTA_GAIN_ICDF, 8) as i32;
        } else {
            self.indices.gains_indices[0] =
                (dec.decode_icdf(&GAIN_ICDF[self.indices.signal_type as usize], 8) as i32) << 3;
            self.indices.gains_indices[0] += dec.decode_icdf(&UNIFORM8_ICDF, 8) as i32;
        }
        (1..self.nb_subfr).for_each(|i| {
            self.indices.gains_indices[i] = dec.decode_icdf(&DELTA_GAIN_ICDF, 8) as i32;
        });

        // NLSF indices.
        self.indices.nlsf =
            nlsf_decode_indices(self.nlsf_codebook(), self.indices.signal_type, dec);

        // NLSF interpolation factor, 20 ms frames only.
        self.indices.nlsf_interp_q2 = if self.nb_subfr == MAX_NB_SUBFR {
            dec.decode_icdf(&NLSF_INTERPOLATION_FACTOR_ICDF, 8) as i32
        } else {
            4
        };

        if self.indices.signal_type == TYPE_VOICED {
            // Pitch lag: delta against the previous frame when possible.
            let mut absolute = true;
            if cond_coding == CondCoding::Conditionally
                && self.ec_prev_signal_type == TYPE_VOICED
            {
                let delta = dec.decode_icdf(&PITCH_DELTA_ICDF, 8) as i32;
                if delta > 0 {
                    self.indices.lag_index = self.ec_prev_lag_index + delta - 9;
                    absolute = false;
                }
            }
            if absolute {
                self.indices.lag_index = dec.decode_icdf(&PITCH_LAG_ICDF, 8) as i32
                    * (self.fs_khz as i32 >> 1);
                self.indices.lag_index +=
                    dec.decode_icdf(self.pitch_low_bits_icdf(), 8) as i32;
            }
            self.ec_prev_lag_index = self.indices.lag_index;

            self.indices.contour_index = dec.decode_icdf(self.pitch_contour_icdf(), 8) as i32;

            // LTP filter.
            self.indices.per_index = dec.decode_icdf(&LTP_PER_INDEX_ICDF, 8) as i32;
            let gain_icdf: &[u8] = match self.indices.per_index {
                0 => &LTP_GAIN_ICDF_0,
                1 => &LTP_GAIN_ICDF_1,
                _ => &LTP_GAIN_ICDF_2,
            };
            (0..self.nb_subfr).for_each(|k| {
                self.indices.ltp_index[k] = dec.decode_icdf(gain_icdf, 8) as i32;
            });

            self.indices.ltp_scale_index = if cond_coding == CondCoding::Independently {
                dec.decode_icdf(&LTP_SCALE_ICDF, 8) as i32
            } else {
                0
            };
        }
        self.ec_prev_signal_type = self.indices.signal_type;

        // Seed of the excitation sign scrambler.
        self.indices.seed = dec.decode_icdf(&UNIFORM4_ICDF, 8) as i32;
    }

    /// Converts the indices into filter coefficients, gains and lags.
    fn decode_parameters(&mut self, control: &mut FrameControl, cond_coding: CondCoding) {
        // Gains.
        gains_dequant(
            &mut control.gains_q16[..self.nb_subfr],
            &self.indices.gains_indices[..self.nb_subfr],
            &mut self.last_gain_index,
            cond_coding == CondCoding::Conditionally,
        );

        // NLSFs and the two LPC sets.
        let cb = self.nlsf_codebook();
        let mut nlsf_q15 = [0_i16; MAX_LPC_ORDER];
        nlsf_reconstruct(&mut nlsf_q15[..self.lpc_order], cb, &self.indices.nlsf);
        nlsf_to_lpc(
            &mut control.pred_coef_q12[1][..self.lpc_order],
            &nlsf_q15[..self.lpc_order],
        );

        // No interpolation right after a reset.
        if self.first_frame_after_reset {
            self.indices.nlsf_interp_q2 = 4;
        }
        if self.indices.nlsf_interp_q2 < 4 {
            let mut nlsf0_q15 = [0_i16; MAX_LPC_ORDER];
            nlsf_interpolate(
                &mut nlsf0_q15,
                &self.prev_nlsf_q15,
                &nlsf_q15,
                self.indices.nlsf_interp_q2,
                self.lpc_order,
            );
            nlsf_to_lpc(
                &mut control.pred_coef_q12[0][..self.lpc_order],
                &nlsf0_q15[..self.lpc_order],
            );
        } else {
            control.pred_coef_q12[0] = control.pred_coef_q12[1];
        }
        self.prev_nlsf_q15 = nlsf_q15;

        // After a loss, soften the filters.
        if self.loss_count > 0 {
            control.pred_coef_q12.iter_mut().for_each(|coefs| {
                bwexpander(&mut coefs[..self.lpc_order], BWE_AFTER_LOSS_Q16);
            });
        }

        if self.indices.signal_type == TYPE_VOICED {
            self.decode_pitch(control);

            let cbk: &[[i8; LTP_ORDER]] = match self.indices.per_index {
                0 => &LTP_VQ_Q7_0,
                1 => &LTP_VQ_Q7_1,
                _ => &LTP_VQ_Q7_2,
            };
            (0..self.nb_subfr).for_each(|k| {
                (0..LTP_ORDER).for_each(|i| {
                    control.ltp_coef_q14[k * LTP_ORDER + i] =
                        i32::from(cbk[self.indices.ltp_index[k] as usize][i]) << 7;
                });
            });

            control.ltp_scale_q14 = LTP_SCALES_TABLE_Q14[self.indices.ltp_scale_index as usize];
        } else {
            control.pitch_lags = [0; MAX_NB_SUBFR];
            control.ltp_coef_q14 = [0; MAX_NB_SUBFR * LTP_ORDER];
            control.ltp_scale_q14 = LTP_SCALES_TABLE_Q14[0];
        }
    }

    /// Expands the primary lag and contour into per subframe pitch lags.
    fn decode_pitch(&self, control: &mut FrameControl) {
        let min_lag = (PE_MIN_LAG_MS * self.fs_khz) as i32;
        let max_lag = (PE_MAX_LAG_MS * self.fs_khz) as i32;
        let lag = min_lag + self.indices.lag_index;
        let contour = self.indices.contour_index as usize;

        (0..self.nb_subfr).for_each(|k| {
            let offset = if self.fs_khz == 8 {
                if self.nb_subfr == MAX_NB_SUBFR {
                    i32::from(CB_LAGS_STAGE2[k][contour])
                } else {
                    i32::from(CB_LAGS_STAGE2_10_MS[k][contour])
                }
            } else if self.nb_subfr == MAX_NB_SUBFR {
                i32::from(CB_LAGS_STAGE3[k][contour])
            } else {
                i32::from(CB_LAGS_STAGE3_10_MS[k][contour])
            };
            control.pitch_lags[k] = (lag + offset).clamp(min_lag, max_lag);
        });
    }

    /// LTP plus LPC synthesis of one frame into `xq`.
    fn decode_core(&mut self, control: &FrameControl, xq: &mut [i16], pulses: &[i32]) {
        let offset_q10 = QUANTIZATION_OFFSETS_Q10[(self.indices.signal_type >> 1) as usize]
            [self.indices.quant_offset_type as usize];

        let nlsf_interpolation = self.indices.nlsf_interp_q2 < 4;

        // Excitation with pseudorandom sign inversion.
        let mut rand_seed = self.indices.seed;
        (0..self.frame_length).for_each(|i| {
            rand_seed = silk_rand(rand_seed);
            let mut exc = pulses[i] << 14;
            if exc > 0 {
                exc -= QUANT_LEVEL_ADJUST_Q10 << 4;
            } else if exc < 0 {
                exc += QUANT_LEVEL_ADJUST_Q10 << 4;
            }
            exc += offset_q10 << 4;
            if rand_seed < 0 {
                exc = -exc;
            }
            self.exc_q14[i] = exc;
            rand_seed = rand_seed.wrapping_add(pulses[i]);
        });

        let mut sltp = [0_i16; MAX_FRAME_LENGTH];
        let mut sltp_q15 = [0_i32; 2 * MAX_FRAME_LENGTH];
        let mut res_q14 = [0_i32; MAX_SUBFR_LENGTH];
        let mut slpc = [0_i32; MAX_SUBFR_LENGTH + MAX_LPC_ORDER];
        slpc[..MAX_LPC_ORDER].copy_from_slice(&self.slpc_q14);

        let mut sltp_buf_idx = self.ltp_mem_length;

        for k in 0..self.nb_subfr {
            let a_q12 = &control.pred_coef_q12[k >> 1];
            let b_q14 = &control.ltp_coef_q14[k * LTP_ORDER..(k + 1) * LTP_ORDER];
            let gain_q10 = control.gains_q16[k] >> 6;
            let gain_q16 = i32::max(control.gains_q16[k], 1);
            let mut inv_gain_q31 = inverse32_varq(gain_q16, 47);
            let gain_adj_q16 = if gain_q16 == self.prev_gain_q16 {
                65536
            } else {
                (((self.prev_gain_q16 as i64) << 16) / i64::from(gain_q16)) as i32
            };
            self.prev_gain_q16 = gain_q16;

            // Keep the short term state in the gain normalized domain.
            if gain_adj_q16 != 65536 {
                (0..MAX_LPC_ORDER).for_each(|i| {
                    slpc[i] = smulww(gain_adj_q16, slpc[i]);
                });
            }

            let voiced = self.indices.signal_type == TYPE_VOICED;
            if voiced {
                let lag = control.pitch_lags[k] as usize;
                if k == 0 || (k == 2 && nlsf_interpolation) {
                    // Rewhiten the output history with the current LPC to
                    // get an unquantized LTP state.
                    let start_idx =
                        self.ltp_mem_length as i32 - lag as i32 - self.lpc_order as i32 - 2;
                    let start_idx = i32::max(start_idx, 0) as usize;

                    if k == 2 {
                        let base = self.ltp_mem_length;
                        self.out_buf[base..base + 2 * self.subfr_length]
                            .copy_from_slice(&xq[..2 * self.subfr_length]);
                    }

                    lpc_analysis_filter(
                        &mut sltp[start_idx..self.ltp_mem_length],
                        &self.out_buf[start_idx + k * self.subfr_length..],
                        &a_q12[..self.lpc_order],
                    );

                    // Downscale the LTP state at the frame start to reduce
                    // the dependency on previous packets.
                    if k == 0 {
                        inv_gain_q31 = smulwb(inv_gain_q31, control.ltp_scale_q14) << 2;
                    }
                    (0..lag + LTP_ORDER / 2).for_each(|i| {
                        sltp_q15[sltp_buf_idx - i - 1] = smulwb(
                            inv_gain_q31,
                            i32::from(sltp[self.ltp_mem_length - i - 1]),
                        );
                    });
                } else if gain_adj_q16 != 65536 {
                    // Update the LTP state scaling.
                    (0..lag + LTP_ORDER / 2).for_each(|i| {
                        sltp_q15[sltp_buf_idx - i - 1] =
                            smulww(gain_adj_q16, sltp_q15[sltp_buf_idx - i - 1]);
                    });
                }
            }

            // Long term prediction.
            if voiced {
                let lag = control.pitch_lags[k] as usize;
                let mut pred_idx = sltp_buf_idx - lag + LTP_ORDER / 2;
                (0..self.subfr_length).for_each(|i| {
                    let mut ltp_pred_q13 = 2_i32;
                    (0..LTP_ORDER).for_each(|j| {
                        ltp_pred_q13 =
                            smlawb(ltp_pred_q13, sltp_q15[pred_idx - j], b_q14[j]);
                    });
                    pred_idx += 1;

                    res_q14[i] = add_sat32(self.exc_q14[k * self.subfr_length + i], ltp_pred_q13 << 1);
                    sltp_q15[sltp_buf_idx] = res_q14[i] << 1;
                    sltp_buf_idx += 1;
                });
            } else {
                res_q14[..self.subfr_length].copy_from_slice(
                    &self.exc_q14[k * self.subfr_length..(k + 1) * self.subfr_length],
                );
            }

            // Short term prediction and gain scaling.
            (0..self.subfr_length).for_each(|i| {
                let mut lpc_pred_q10 = (self.lpc_order as i32) >> 1;
                (0..self.lpc_order).for_each(|j| {
                    lpc_pred_q10 = smlawb(
                        lpc_pred_q10,
                        slpc[MAX_LPC_ORDER + i - 1 - j],
                        i32::from(a_q12[j]),
                    );
                });
                slpc[MAX_LPC_ORDER + i] = add_sat32(res_q14[i], lshift_sat32(lpc_pred_q10, 4));
                xq[k * self.subfr_length + i] = sat16(rshift_round(
                    smulww(slpc[MAX_LPC_ORDER + i], gain_q10),
                    8,
                ));
            });

            // Carry the LPC state to the next subframe.
            slpc.copy_within(self.subfr_length..self.subfr_length + MAX_LPC_ORDER, 0);
        }

        self.slpc_q14.copy_from_slice(&slpc[..MAX_LPC_ORDER]);
    }

    /// Decodes one frame into `xq` (`frame_length` samples).
    fn decode_frame(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        xq: &mut [i16],
        frame_index: usize,
        cond_coding: CondCoding,
    ) {
        let mut control = FrameControl::default();

        self.decode_indices(dec, frame_index, false, cond_coding);

        let mut pulses = [0_i32; MAX_FRAME_LENGTH];
        decode_pulses(
            dec,
            &mut pulses[..self.frame_length],
            self.indices.signal_type,
            self.indices.quant_offset_type,
            self.frame_length,
        );

        self.decode_parameters(&mut control, cond_coding);
        self.decode_core(&control, xq, &pulses);

        self.update_out_buf(xq);
        self.lag_prev = control.pitch_lags[self.nb_subfr - 1];
        self.loss_count = 0;
        self.first_frame_after_reset = false;
    }

    /// Conceals one lost frame by extending the previous signal.
    fn conceal_frame(&mut self, xq: &mut [i16]) {
        let fade_q16 = {
            let mut fade = 65536_i32;
            (0..self.loss_count).for_each(|_| {
                fade = smulww(fade, PLC_GAIN_DECAY_Q16);
            });
            fade
        };

        let voiced = self.ec_prev_signal_type == TYPE_VOICED && self.lag_prev > 0;
        let lag = i32::max(self.lag_prev, (PE_MIN_LAG_MS * self.fs_khz) as i32) as usize;

        (0..self.frame_length).for_each(|i| {
            let extended = if voiced {
                // Repeat the last pitch period.
                let idx = self.ltp_mem_length - lag + (i % lag);
                i32::from(self.out_buf[idx])
            } else {
                // Shaped noise at a fraction of the previous level.
                self.plc_rand_seed = silk_rand(self.plc_rand_seed);
                (self.plc_rand_seed >> 25) * 3
            };
            xq[i] = sat16(smulww(extended << 2, fade_q16) >> 2);
        });

        self.update_out_buf(xq);
        self.loss_count += 1;
    }

    fn update_out_buf(&mut self, xq: &[i16]) {
        let keep = self.ltp_mem_length - self.frame_length;
        self.out_buf
            .copy_within(self.frame_length..self.ltp_mem_length, 0);
        self.out_buf[keep..self.ltp_mem_length].copy_from_slice(&xq[..self.frame_length]);
    }
}

/// Dequantizes the subframe gain indices into linear Q16 gains.
fn gains_dequant(
    gains_q16: &mut [i32],
    indices: &[i32],
    prev_index: &mut i32,
    conditional: bool,
) {
    gains_q16
        .iter_mut()
        .zip(indices.iter())
        .enumerate()
        .for_each(|(k, (gain, &index))| {
            if k == 0 && !conditional {
                // The gain index cannot drop more than 16 steps at once.
                *prev_index = i32::max(index, *prev_index - 16);
            } else {
                let ind_tmp = index + MIN_DELTA_GAIN_QUANT;
                // Accumulate deltas, with the double step extension at the
                // top of the range.
                let double_step_threshold = 2 * MAX_DELTA_GAIN_QUANT - N_LEVELS_QGAIN + *prev_index;
                if ind_tmp > double_step_threshold {
                    *prev_index += (ind_tmp << 1) - double_step_threshold;
                } else {
                    *prev_index += ind_tmp;
                }
            }
            *prev_index = (*prev_index).clamp(0, N_LEVELS_QGAIN - 1);

            // Convert to a linear Q16 scale.
            *gain = crate::silk::math::log2lin(i32::min(
                smulwb(0x1D1C71, *prev_index) + 2090,
                3967,
            ));
        });
}

/// The whitening filter of the rewhitening step:
/// `out[n] = in[n] - (sum(a[j] * in[n - 1 - j]) >> 12)`.
fn lpc_analysis_filter(out: &mut [i16], input: &[i16], a_q12: &[i16]) {
    let order = a_q12.len();
    let len = out.len();
    (0..len).for_each(|n| {
        if n < order {
            out[n] = 0;
            return;
        }
        let mut pred_q12 = 0_i32;
        (0..order).for_each(|j| {
            pred_q12 = smlabb(pred_q12, i32::from(input[n - 1 - j]), i32::from(a_q12[j]));
        });
        let value_q12 = (i32::from(input[n]) << 12).wrapping_sub(pred_q12);
        out[n] = sat16(rshift_round(value_q12, 12));
    });
}

/// In place bandwidth expansion of Q12 coefficients.
fn bwexpander(a_q12: &mut [i16], chirp_q16: i32) {
    let mut factor_q16 = chirp_q16;
    a_q12.iter_mut().for_each(|a| {
        *a = ((i64::from(*a) * i64::from(factor_q16)) >> 16) as i16;
        factor_q16 = ((i64::from(factor_q16) * i64::from(chirp_q16)) >> 16) as i32;
    });
}

/// The Silk decoder: up to two channels plus the stereo unmixer and the
/// output resamplers.
pub(crate) struct SilkDecoder {
    api_khz: usize,
    api_channels: usize,
    channels_internal: usize,
    n_frames_decoded: usize,
    channels: [ChannelDecoder; 2],
    stereo: StereoDecodeState,
    resamplers: [Resampler; 2],
    ms_pred_q13: [i32; 2],
    decode_only_middle: bool,
    prev_side_coded: bool,
}

impl SilkDecoder {
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: crate::Channels,
    ) -> Result<Self, DecoderError> {
        let api_khz = sampling_rate as usize / 1000;
        Ok(Self {
            api_khz,
            api_channels: channels as usize,
            channels_internal: channels as usize,
            n_frames_decoded: 0,
            channels: [ChannelDecoder::new(), ChannelDecoder::new()],
            stereo: StereoDecodeState::default(),
            resamplers: [
                Resampler::new(8, api_khz),
                Resampler::new(8, api_khz),
            ],
            ms_pred_q13: [0; 2],
            decode_only_middle: false,
            prev_side_coded: false,
        })
    }

    pub(crate) fn reset(&mut self) {
        self.channels.iter_mut().for_each(ChannelDecoder::reset);
        self.stereo.reset();
        self.resamplers.iter_mut().for_each(Resampler::reset);
        self.ms_pred_q13 = [0; 2];
        self.decode_only_middle = false;
        self.prev_side_coded = false;
        self.n_frames_decoded = 0;
    }

    /// The internal rate the given bandwidth runs at.
    pub(crate) fn internal_khz(bandwidth: Bandwidth) -> usize {
        match bandwidth {
            Bandwidth::Narrowband => 8,
            Bandwidth::Mediumband => 12,
            _ => 16,
        }
    }

    /// The pitch lag of the last decoded frame, at 48 kHz.
    pub(crate) fn pitch(&self) -> u32 {
        let channel = &self.channels[0];
        if channel.fs_khz == 0 {
            return 0;
        }
        (channel.lag_prev as usize * 48 / channel.fs_khz) as u32
    }

    /// Decodes one Silk frame (10 or 20 ms) of the packet into `output`,
    /// interleaved i16 at the API rate. Returns samples per channel.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn decode(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        first_frame: bool,
        lost: bool,
        bandwidth: Bandwidth,
        channels_internal: usize,
        frame_ms: usize,
        frames_per_packet: usize,
        output: &mut [i16],
    ) -> Result<usize, DecoderError> {
        debug_assert!(frame_ms == 10 || frame_ms == 20);
        let fs_khz = Self::internal_khz(bandwidth);
        let nb_subfr = frame_ms / 5;

        if first_frame {
            self.n_frames_decoded = 0;
            // A bandwidth switch resets the target resampler but keeps the
            // rest intact, so an immediate switch back finds its state.
            (0..channels_internal).for_each(|c| {
                if self.channels[c].fs_khz != fs_khz {
                    self.resamplers[c] = Resampler::new(fs_khz, self.api_khz);
                    self.resamplers[c].reset();
                    if c == 1 {
                        self.stereo.reset();
                    }
                }
                self.channels[c].set_rate(fs_khz, nb_subfr);
            });
            if channels_internal > self.channels_internal {
                self.channels[1].reset();
                self.channels[1].set_rate(fs_khz, nb_subfr);
            }
            self.channels_internal = channels_internal;
        }
        let frame_length = self.channels[0].frame_length;

        if lost {
            // Conceal without touching the range decoder.
            let mut mid = [0_i16; MAX_FRAME_LENGTH];
            let mut side = [0_i16; MAX_FRAME_LENGTH];
            self.channels[0].conceal_frame(&mut mid[..frame_length]);
            if channels_internal == 2 {
                self.channels[1].conceal_frame(&mut side[..frame_length]);
            }
            return self.deliver(&mut mid, &mut side, frame_length, output);
        }

        if first_frame {
            self.decode_header(dec, channels_internal, frames_per_packet)?;
        }

        let frame_index = self.n_frames_decoded;

        // Stereo side information comes before the mid frame.
        let mut side_coded = true;
        if channels_internal == 2 {
            self.ms_pred_q13 = stereo_decode_pred(dec);
            if !self.channels[1].vad_flags[frame_index] {
                self.decode_only_middle = stereo_decode_mid_only(dec);
            } else {
                self.decode_only_middle = false;
            }
            side_coded = !self.decode_only_middle;
        }

        let mut mid = [0_i16; MAX_FRAME_LENGTH];
        let mut side = [0_i16; MAX_FRAME_LENGTH];

        let mid_cond = if frame_index > 0 {
            CondCoding::Conditionally
        } else {
            CondCoding::Independently
        };
        self.channels[0].decode_frame(dec, &mut mid[..frame_length], frame_index, mid_cond);

        if channels_internal == 2 {
            if side_coded {
                let side_cond = if frame_index > 0 && self.prev_side_coded {
                    CondCoding::Conditionally
                } else {
                    CondCoding::Independently
                };
                self.channels[1].decode_frame(
                    dec,
                    &mut side[..frame_length],
                    frame_index,
                    side_cond,
                );
            } else {
                // The side channel is silent this frame; its predictors
                // start fresh on the next coded frame.
                side[..frame_length].iter_mut().for_each(|s| *s = 0);
                self.channels[1].first_frame_after_reset = true;
            }
            self.prev_side_coded = side_coded;
        }

        self.n_frames_decoded += 1;
        self.deliver(&mut mid, &mut side, frame_length, output)
    }

    /// Reads the VAD and LBRR header of a packet and skips the LBRR data.
    fn decode_header(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        channels_internal: usize,
        frames_per_packet: usize,
    ) -> Result<(), DecoderError> {
        if frames_per_packet > 3 {
            return Err(DecoderError::InvalidPacket);
        }
        (0..channels_internal).for_each(|c| {
            (0..frames_per_packet).for_each(|i| {
                self.channels[c].vad_flags[i] = dec.decode_bit_logp(1);
            });
            self.channels[c].lbrr_flag = dec.decode_bit_logp(1);
            self.channels[c].lbrr_flags = [false; 3];
        });

        (0..channels_internal).for_each(|c| {
            if self.channels[c].lbrr_flag {
                if frames_per_packet == 1 {
                    self.channels[c].lbrr_flags[0] = true;
                } else {
                    let table: &[u8] = if frames_per_packet == 2 {
                        &LBRR_FLAGS_2_ICDF
                    } else {
                        &LBRR_FLAGS_3_ICDF
                    };
                    let symbol = dec.decode_icdf(table, 8) as i32 + 1;
                    (0..frames_per_packet).for_each(|i| {
                        self.channels[c].lbrr_flags[i] = (symbol >> i) & 1 != 0;
                    });
                }
            }
        });

        // Decode and discard the LBRR frames.
        for i in 0..frames_per_packet {
            for c in 0..channels_internal {
                if !self.channels[c].lbrr_flags[i] {
                    continue;
                }
                if channels_internal == 2 && c == 0 {
                    let _ = stereo_decode_pred(dec);
                    if !self.channels[1].lbrr_flags[i] {
                        let _ = stereo_decode_mid_only(dec);
                    }
                }
                let cond = if i > 0 && self.channels[c].lbrr_flags[i - 1] {
                    CondCoding::Conditionally
                } else {
                    CondCoding::Independently
                };
                let frame_length = self.channels[c].frame_length;
                self.channels[c].decode_indices(dec, i, true, cond);
                let mut pulses = [0_i32; MAX_FRAME_LENGTH];
                decode_pulses(
                    dec,
                    &mut pulses[..frame_length],
                    self.channels[c].indices.signal_type,
                    self.channels[c].indices.quant_offset_type,
                    frame_length,
                );
            }
        }
        Ok(())
    }

    /// Stereo unmixing, resampling and interleaving into `output`.
    fn deliver(
        &mut self,
        mid: &mut [i16; MAX_FRAME_LENGTH],
        side: &mut [i16; MAX_FRAME_LENGTH],
        frame_length: usize,
        output: &mut [i16],
    ) -> Result<usize, DecoderError> {
        let fs_khz = self.channels[0].fs_khz;
        let out_len = frame_length * self.api_khz / fs_khz;
        if output.len() < out_len * self.api_channels {
            return Err(DecoderError::BufferTooSmall);
        }

        if self.channels_internal == 2 {
            stereo_ms_to_lr(
                &mut self.stereo,
                &mut mid[..frame_length],
                &mut side[..frame_length],
                &self.ms_pred_q13,
                fs_khz,
                frame_length,
            );
        }

        let mut left = vec![0_i16; out_len];
        let produced = self.resamplers[0].process(&mid[..frame_length], &mut left);
        debug_assert_eq!(produced, out_len);

        if self.api_channels == 1 {
            if self.channels_internal == 2 {
                // Downmix after unmixing; the predictors already balanced
                // the channels.
                let mut right = vec![0_i16; out_len];
                self.resamplers[1].process(&side[..frame_length], &mut right);
                (0..out_len).for_each(|i| {
                    output[i] = sat16((i32::from(left[i]) + i32::from(right[i])) >> 1);
                });
            } else {
                output[..out_len].copy_from_slice(&left);
            }
        } else if self.channels_internal == 2 {
            let mut right = vec![0_i16; out_len];
            self.resamplers[1].process(&side[..frame_length], &mut right);
            (0..out_len).for_each(|i| {
                output[2 * i] = left[i];
                output[2 * i + 1] = right[i];
            });
        } else {
            (0..out_len).for_each(|i| {
                output[2 * i] = left[i];
                output[2 * i + 1] = left[i];
            });
        }

        Ok(out_len)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use nanorand::RNG;

    fn decode_frames(
        data: &[u8],
        bandwidth: Bandwidth,
        channels: usize,
        frame_ms: usize,
        frames: usize,
    ) -> Vec<i16> {
        let mut decoder =
            SilkDecoder::new(SamplingRate::Hz48000, crate::Channels::Mono).unwrap();
        let mut dec = crate::range_coder::RangeDecoder::new(data);
        let mut collected = Vec::new();
        (0..frames).for_each(|i| {
            let mut output = vec![0_i16; 48 * frame_ms];
            let samples = decoder
                .decode(
                    &mut dec,
                    i == 0,
                    false,
                    bandwidth,
                    channels,
                    frame_ms,
                    frames,
                    &mut output,
                )
                .unwrap();
            collected.extend_from_slice(&output[..samples]);
        });
        collected
    }

    /// Arbitrary bytes must decode into bounded PCM without panicking;
    /// this exercises the whole frame path including synthesis.
    #[test]
    fn test_decode_random_bytes_is_robust() {
        let mut rnd = nanorand::WyRand::new_seed(14);
        for &bandwidth in [
            Bandwidth::Narrowband,
            Bandwidth::Mediumband,
            Bandwidth::Wideband,
        ]
        .iter()
        {
            (0..20).for_each(|_| {
                let len = rnd.generate_range::<usize>(8, 120);
                let data: Vec<u8> = (0..len)
                    .map(|_| rnd.generate_range::<u32>(0, 256) as u8)
                    .collect();
                let out = decode_frames(&data, bandwidth, 1, 20, 1);
                assert_eq!(out.len(), 960);
            });
        }
    }

    #[test]
    fn test_decode_stereo_random_bytes() {
        let mut rnd = nanorand::WyRand::new_seed(15);
        (0..10).for_each(|_| {
            let len = rnd.generate_range::<usize>(16, 200);
            let data: Vec<u8> = (0..len)
                .map(|_| rnd.generate_range::<u32>(0, 256) as u8)
                .collect();

            let mut decoder =
                SilkDecoder::new(SamplingRate::Hz48000, crate::Channels::Stereo).unwrap();
            let mut dec = crate::range_coder::RangeDecoder::new(&data);
            let mut output = vec![0_i16; 2 * 960];
            let samples = decoder
                .decode(
                    &mut dec,
                    true,
                    false,
                    Bandwidth::Wideband,
                    2,
                    20,
                    1,
                    &mut output,
                )
                .unwrap();
            assert_eq!(samples, 960);
        });
    }

    /// Two decoders fed the same packets produce identical output.
    #[test]
    fn test_decoders_are_deterministic() {
        let mut rnd = nanorand::WyRand::new_seed(16);
        let data: Vec<u8> = (0..100)
            .map(|_| rnd.generate_range::<u32>(0, 256) as u8)
            .collect();
        let a = decode_frames(&data, Bandwidth::Wideband, 1, 20, 1);
        let b = decode_frames(&data, Bandwidth::Wideband, 1, 20, 1);
        assert_eq!(a, b);
    }

    /// Concealment keeps producing bounded audio without bitstream input.
    #[test]
    fn test_concealment_after_decoding() {
        let mut rnd = nanorand::WyRand::new_seed(17);
        let data: Vec<u8> = (0..80)
            .map(|_| rnd.generate_range::<u32>(0, 256) as u8)
            .collect();

        let mut decoder =
            SilkDecoder::new(SamplingRate::Hz48000, crate::Channels::Mono).unwrap();
        let mut dec = crate::range_coder::RangeDecoder::new(&data);
        let mut output = vec![0_i16; 960];
        decoder
            .decode(
                &mut dec,
                true,
                false,
                Bandwidth::Wideband,
                1,
                20,
                1,
                &mut output,
            )
            .unwrap();

        (0..3).for_each(|_| {
            let mut concealed = vec![0_i16; 960];
            let mut dummy = crate::range_coder::RangeDecoder::new(&[]);
            let samples = decoder
                .decode(
                    &mut dummy,
                    true,
                    true,
                    Bandwidth::Wideband,
                    1,
                    20,
                    1,
                    &mut concealed,
                )
                .unwrap();
            assert_eq!(samples, 960);
        });
    }

    #[test]
    fn test_bandwidth_switch_resets_resampler() {
        let mut rnd = nanorand::WyRand::new_seed(18);
        let mut decoder =
            SilkDecoder::new(SamplingRate::Hz48000, crate::Channels::Mono).unwrap();

        for &bandwidth in [
            Bandwidth::Narrowband,
            Bandwidth::Wideband,
            Bandwidth::Narrowband,
        ]
        .iter()
        {
            let data: Vec<u8> = (0..60)
                .map(|_| rnd.generate_range::<u32>(0, 256) as u8)
                .collect();
            let mut dec = crate::range_coder::RangeDecoder::new(&data);
            let mut output = vec![0_i16; 960];
            let samples = decoder
                .decode(&mut dec, true, false, bandwidth, 1, 20, 1, &mut output)
                .unwrap();
            assert_eq!(samples, 960);
            assert_eq!(
                decoder.resamplers[0].fs_in_khz(),
                SilkDecoder::internal_khz(bandwidth)
            );
        }
    }
}
