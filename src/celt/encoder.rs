//! Implements the CELT encoder.

use once_cell::sync::Lazy;

use crate::celt::bands::{
    amp2_log2, compute_band_energies, haar1, hysteresis_decision, normalise_bands,
    quant_all_bands, spreading_decision, BandQuantParams,
};
use crate::celt::coder::EntropyCoder;
use crate::celt::mdct::Mdct;
use crate::celt::quant_energy::{quant_coarse_energy, quant_energy_finalise, quant_fine_energy};
use crate::celt::rate::{compute_allocation, init_caps, AllocationRequest};
use crate::celt::tables::{SPREAD_ICDF, TF_SELECT_TABLE, TRIM_ICDF};
use crate::celt::vq::SPREAD_NORMAL;
use crate::celt::{band_width, E_BANDS, MAX_BANDS, MAX_LM, PREEMPHASIS, SHORT_BLOCKSIZE};
use crate::encoder_error::EncoderError;
use crate::range_coder::{RangeEncoder, Tell, BITRES};
use crate::{Channels, SamplingRate};

const OVERLAP: usize = SHORT_BLOCKSIZE;

static MDCT: Lazy<Mdct> = Lazy::new(Mdct::new);

/// The CELT encoder.
pub(crate) struct CeltEncoder {
    channels: usize,
    stream_channels: usize,
    /// 48 kHz divided by the input rate; lower rates are zero stuffed.
    upsample: usize,
    start_band: usize,
    end_band: usize,
    bitrate: u32,
    vbr: bool,
    complexity: u32,

    rng: u32,
    force_intra: bool,
    consec_transient: u32,
    intensity: usize,
    prev_coded_bands: usize,
    spread_average: i32,
    spread_decision_last: usize,
    hf_average: i32,
    tapset_decision: usize,
    preemph_mem: [f32; 2],
    /// The last OVERLAP pre-emphasized input samples per channel.
    in_mem: Vec<Vec<f32>>,
    old_ebands: [[f32; MAX_BANDS]; 2],
}

impl CeltEncoder {
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: Channels,
    ) -> Result<Self, EncoderError> {
        let upsample = SamplingRate::Hz48000 as usize / sampling_rate as usize;
        let channels = channels as usize;

        Ok(Self {
            channels,
            stream_channels: channels,
            upsample,
            start_band: 0,
            end_band: MAX_BANDS,
            bitrate: 64000,
            vbr: false,
            complexity: 5,
            rng: 0,
            force_intra: true,
            consec_transient: 0,
            intensity: MAX_BANDS,
            prev_coded_bands: MAX_BANDS,
            spread_average: 256,
            spread_decision_last: SPREAD_NORMAL,
            hf_average: 0,
            tapset_decision: 0,
            preemph_mem: [0.0; 2],
            in_mem: vec![vec![0.0; OVERLAP]; channels],
            old_ebands: [[0.0; MAX_BANDS]; 2],
        })
    }

    pub(crate) fn reset(&mut self) {
        self.rng = 0;
        self.force_intra = true;
        self.consec_transient = 0;
        self.intensity = MAX_BANDS;
        self.prev_coded_bands = MAX_BANDS;
        self.spread_average = 256;
        self.spread_decision_last = SPREAD_NORMAL;
        self.hf_average = 0;
        self.tapset_decision = 0;
        self.preemph_mem = [0.0; 2];
        self.in_mem
            .iter_mut()
            .for_each(|mem| mem.iter_mut().for_each(|v| *v = 0.0));
        self.old_ebands = [[0.0; MAX_BANDS]; 2];
    }

    pub(crate) fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = bitrate;
    }

    pub(crate) fn set_vbr(&mut self, vbr: bool) {
        self.vbr = vbr;
    }

    pub(crate) fn set_complexity(&mut self, complexity: u32) {
        self.complexity = complexity;
    }

    pub(crate) fn set_end_band(&mut self, band: usize) {
        debug_assert!(band > 0 && band <= MAX_BANDS);
        self.end_band = band;
    }

    pub(crate) fn set_stream_channels(&mut self, channels: usize) {
        self.stream_channels = channels;
    }

    pub(crate) fn final_range(&self) -> u32 {
        self.rng
    }

    /// Encodes one frame of `frame_size` samples (at 48 kHz) per channel
    /// into `output`. In CBR operation the whole buffer is used; with VBR
    /// the written prefix is returned.
    pub(crate) fn encode(
        &mut self,
        input: &[f32],
        frame_size: usize,
        output: &mut [u8],
    ) -> Result<usize, EncoderError> {
        let lm = match frame_size / SHORT_BLOCKSIZE {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => return Err(EncoderError::InvalidConfiguration("bad frame size")),
        };
        if SHORT_BLOCKSIZE << lm != frame_size {
            return Err(EncoderError::InvalidConfiguration("bad frame size"));
        }
        let n = frame_size;
        let channels = self.stream_channels;
        let start = self.start_band;
        let end = self.end_band;
        let nb_bytes = output.len();
        if nb_bytes < 2 || nb_bytes > 1275 {
            return Err(EncoderError::BufferTooSmall);
        }
        let total_bits = (nb_bytes * 8) as i32;
        let effective_bytes = nb_bytes;

        let mut enc = RangeEncoder::new(output);

        // Pre-emphasis over the zero stuffed input, and the window history.
        let mut in_buf = vec![0.0_f32; channels * (n + OVERLAP)];
        let in_samples = n / self.upsample;
        for c in 0..channels {
            let source = c.min(self.channels - 1);
            in_buf[c * (n + OVERLAP)..c * (n + OVERLAP) + OVERLAP]
                .copy_from_slice(&self.in_mem[c]);
            let mut mem = self.preemph_mem[source];
            for i in 0..n {
                let x = if i % self.upsample == 0 && i / self.upsample < in_samples {
                    input[(i / self.upsample) * self.channels + source] * self.upsample as f32
                } else {
                    0.0
                };
                in_buf[c * (n + OVERLAP) + OVERLAP + i] = x - mem;
                mem = PREEMPHASIS * x;
            }
            self.preemph_mem[source] = mem;
            let base = c * (n + OVERLAP);
            self.in_mem[c].copy_from_slice(&in_buf[base + n..base + n + OVERLAP]);
        }

        // Transient analysis decides between one long or M short MDCTs.
        let (mut is_transient, tf_estimate) = transient_analysis(&in_buf, n + OVERLAP, channels);
        if lm == 0 || effective_bytes < 15 * channels {
            is_transient = false;
        }
        let short_blocks = is_transient;
        let m = 1 << lm;

        // Forward MDCTs.
        let (blocks, block_size, shift) = if is_transient {
            (m, SHORT_BLOCKSIZE, MAX_LM)
        } else {
            (1, n, MAX_LM - lm)
        };
        let mut freq = vec![0.0_f32; channels * n];
        for c in 0..channels {
            let inp = &in_buf[c * (n + OVERLAP)..(c + 1) * (n + OVERLAP)];
            (0..blocks).for_each(|b| {
                MDCT.forward(
                    shift,
                    &inp[b * block_size..],
                    &mut freq[c * n + b..],
                    blocks,
                );
            });
        }

        let mut band_e = [[0.0_f32; MAX_BANDS]; 2];
        compute_band_energies(&freq, &mut band_e, end, channels, m, n);
        let mut band_log_e = [[0.0_f32; MAX_BANDS]; 2];
        amp2_log2(&band_e, &mut band_log_e, end, end, channels);

        // A frame with no meaningful energy is coded as silence.
        let silence = band_log_e
            .iter()
            .take(channels)
            .all(|ch| ch[start..end].iter().all(|&e| e < -25.0));

        let mut x = freq.clone();
        normalise_bands(&mut x, &band_e, end, channels, m, n);

        let tell = enc.tell();
        debug_assert!(tell == 1);
        enc.encode_bit_logp(u32::from(silence), 15)?;
        if silence {
            // The decoder reads zeros from here on; the frame is all
            // padding after the silence flag.
            self.old_ebands = [[-28.0; MAX_BANDS]; 2];
            self.force_intra = true;
            enc.done()?;
            self.rng = enc.range();
            let used = if self.vbr {
                enc.shrink(2);
                2
            } else {
                nb_bytes
            };
            return Ok(used);
        }

        // The pitch pre-filter of the reference encoder is not run; signal
        // an unmodified frame so the decoder keeps its comb filter flat.
        if start == 0 && enc.tell() + 16 <= total_bits as u32 {
            enc.encode_bit_logp(0, 1)?;
        }

        if lm > 0 && enc.tell() + 3 <= total_bits as u32 {
            enc.encode_bit_logp(u32::from(is_transient), 3)?;
        }

        let intra = self.force_intra;
        if enc.tell() + 3 <= total_bits as u32 {
            enc.encode_bit_logp(u32::from(intra), 3)?;
        }

        let mut error = [[0.0_f32; MAX_BANDS]; 2];
        quant_coarse_energy(
            &band_log_e,
            &mut self.old_ebands,
            &mut error,
            start,
            end,
            intra,
            channels,
            lm,
            total_bits as u32,
            effective_bytes as u32,
            &mut enc,
        )?;

        // Time-frequency analysis.
        let mut tf_res = [0_i8; MAX_BANDS];
        let mut tf_select = 0;
        if effective_bytes >= 15 * channels && start == 0 && self.complexity >= 2 {
            let lambda = i32::max(5, 1280 / effective_bytes as i32 + 2);
            tf_select = tf_analysis(
                &x,
                end,
                is_transient,
                &mut tf_res,
                lambda,
                lm,
                tf_estimate,
            );
        }
        tf_encode(start, end, is_transient, &mut tf_res, lm, tf_select, &mut enc)?;

        let spread = if enc.tell() + 4 <= total_bits as u32 {
            let decision = if self.complexity >= 3 {
                spreading_decision(
                    &x,
                    n,
                    &mut self.spread_average,
                    self.spread_decision_last,
                    &mut self.hf_average,
                    &mut self.tapset_decision,
                    true,
                    end,
                    channels,
                    m,
                )
            } else {
                SPREAD_NORMAL
            };
            self.spread_decision_last = decision;
            enc.encode_icdf(decision, &SPREAD_ICDF, 5)?;
            decision
        } else {
            SPREAD_NORMAL
        };

        let cap = init_caps(lm, channels);

        // Dynalloc boosts from the band energy contour.
        let boost_steps = dynalloc_analysis(&band_log_e, end, channels);
        let mut offsets = [0_i32; MAX_BANDS];
        let mut total_boost = 0_i32;
        {
            let mut dynalloc_logp = 6_i32;
            let total_bits_q3 = total_bits << BITRES;
            let mut tell_q3 = enc.tell_frac() as i32;
            for i in start..end {
                let width = (channels * band_width(i) << lm) as i32;
                let quanta = i32::min(width << BITRES, i32::max(6 << BITRES, width));
                let mut dynalloc_loop_logp = dynalloc_logp;
                let mut boost = 0;
                let mut j = 0;
                while tell_q3 + (dynalloc_loop_logp << BITRES) < total_bits_q3 - total_boost
                    && boost < cap[i]
                {
                    let flag = j < boost_steps[i];
                    enc.encode_bit_logp(u32::from(flag), dynalloc_loop_logp as u32)?;
                    tell_q3 = enc.tell_frac() as i32;
                    if !flag {
                        break;
                    }
                    boost += quanta;
                    total_boost += quanta;
                    dynalloc_loop_logp = 1;
                    j += 1;
                }
                if j > 0 {
                    dynalloc_logp = i32::max(2, dynalloc_logp - 1);
                }
                offsets[i] = boost;
            }
        }

        let alloc_trim = if enc.tell_frac() as i32 + (6 << BITRES)
            <= (total_bits << BITRES) - total_boost
        {
            let trim = alloc_trim_analysis(&band_log_e, end, lm);
            enc.encode_icdf(trim as usize, &TRIM_ICDF, 7)?;
            trim
        } else {
            5
        };

        // Stereo decisions.
        if channels == 2 {
            let equiv_kbps = (self.bitrate / 1000) as f32;
            const INTENSITY_THRESHOLDS: [f32; MAX_BANDS] = [
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 16.0, 24.0, 36.0, 44.0, 50.0, 56.0, 62.0,
                67.0, 72.0, 79.0, 88.0, 106.0, 134.0,
            ];
            const INTENSITY_HISTERESIS: [f32; MAX_BANDS] = [
                1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 4.0, 5.0, 6.0,
                8.0, 8.0, 8.0, 8.0, 8.0,
            ];
            self.intensity = hysteresis_decision(
                equiv_kbps,
                &INTENSITY_THRESHOLDS,
                &INTENSITY_HISTERESIS,
                self.intensity.min(MAX_BANDS),
            );
        }

        let mut bits = (total_bits << BITRES) - enc.tell_frac() as i32 - 1;
        let anti_collapse_rsv = if is_transient && lm >= 2 && bits >= ((lm as i32 + 2) << BITRES)
        {
            1 << BITRES
        } else {
            0
        };
        bits -= anti_collapse_rsv;

        let request = AllocationRequest {
            start,
            end,
            offsets: &offsets,
            cap: &cap,
            alloc_trim,
            intensity: usize::max(start, self.intensity.min(end)),
            dual_stereo: false,
            total: bits,
            channels,
            lm,
            prev_coded_bands: self.prev_coded_bands,
            signal_bandwidth: end - 1,
        };
        let alloc = {
            let mut coder = EntropyCoder::Encoder(&mut enc);
            compute_allocation(&request, &mut coder)?
        };
        self.prev_coded_bands = alloc.coded_bands;

        quant_fine_energy(
            &mut self.old_ebands,
            &mut error,
            &alloc.fine_bits,
            start,
            end,
            channels,
            &mut enc,
        )?;

        let mut collapse_masks = [0_u8; 2 * MAX_BANDS];
        {
            let params = BandQuantParams {
                start,
                end,
                eff_ebands: MAX_BANDS,
                band_e: &band_e,
                pulses: &alloc.pulses,
                short_blocks,
                spread,
                dual_stereo: alloc.dual_stereo,
                intensity: alloc.intensity,
                tf_res: &tf_res,
                total_bits: (total_bits << BITRES) - anti_collapse_rsv,
                balance: alloc.balance,
                lm,
                coded_bands: alloc.coded_bands,
                disable_inv: self.channels == 1,
            };
            let mut coder = EntropyCoder::Encoder(&mut enc);
            let (x0, x1) = x.split_at_mut(n);
            quant_all_bands(
                &params,
                x0,
                if channels == 2 { Some(x1) } else { None },
                &mut collapse_masks,
                &mut coder,
                &mut self.rng,
            )?;
        }

        if anti_collapse_rsv > 0 {
            let anti_collapse_on = u32::from(self.consec_transient < 2);
            enc.encode_bits(anti_collapse_on, 1)?;
        }

        quant_energy_finalise(
            &mut self.old_ebands,
            &mut error,
            &alloc.fine_bits,
            &alloc.fine_priority,
            start,
            end,
            channels,
            total_bits - enc.tell() as i32,
            &mut enc,
        )?;

        if is_transient {
            self.consec_transient += 1;
        } else {
            self.consec_transient = 0;
        }
        self.force_intra = false;

        // Finalize, optionally shrinking the payload for VBR operation.
        let used_bytes = if self.vbr {
            let wanted = usize::min(nb_bytes, ((enc.tell() + 7) / 8) as usize + 1);
            let wanted = usize::max(wanted, 2);
            enc.done()?;
            enc.shrink(wanted);
            wanted
        } else {
            enc.done()?;
            nb_bytes
        };

        self.rng = enc.range();
        Ok(used_bytes)
    }
}

/// A compact transient detector: compares short term energy peaks of the
/// high-passed input against the frame average.
fn transient_analysis(input: &[f32], len_per_channel: usize, channels: usize) -> (bool, f32) {
    const SUB_BLOCKS: usize = 8;
    let block = len_per_channel / SUB_BLOCKS;
    let mut max_ratio = 0.0_f32;

    (0..channels).for_each(|c| {
        let x = &input[c * len_per_channel..(c + 1) * len_per_channel];
        let mut energies = [0.0_f32; SUB_BLOCKS];
        let mut mem = 0.0_f32;
        x.iter().enumerate().for_each(|(i, &v)| {
            // First order high-pass to ignore the spectral tilt.
            let hp = v - 0.95 * mem;
            mem = v;
            let idx = usize::min(i / block, SUB_BLOCKS - 1);
            energies[idx] += hp * hp;
        });
        let mean: f32 = 1e-15 + energies.iter().sum::<f32>() / SUB_BLOCKS as f32;
        energies.iter().for_each(|&e| {
            max_ratio = f32::max(max_ratio, e / mean);
        });
    });

    let is_transient = max_ratio > 4.5;
    let tf_estimate = f32::min(1.0, max_ratio / 8.0);
    (is_transient, tf_estimate)
}

/// Sum of magnitudes with a bias that prefers frequency resolution.
fn l1_metric(x: &[f32], lm: i32, bias: f32) -> f32 {
    let l1: f32 = x.iter().map(|v| v.abs()).sum();
    l1 + lm as f32 * bias * l1
}

/// Per band time-frequency resolution search: measures the L1 norm of each
/// band at the candidate Haar levels, then a two state Viterbi picks the
/// cheapest switching pattern under the `lambda` penalty.
#[allow(clippy::too_many_arguments)]
fn tf_analysis(
    x: &[f32],
    len: usize,
    is_transient: bool,
    tf_res: &mut [i8; MAX_BANDS],
    lambda: i32,
    lm: usize,
    tf_estimate: f32,
) -> usize {
    let bias = 0.04 * f32::max(-0.25, 0.5 - tf_estimate);
    let transient = usize::from(is_transient);
    let mut metric = [0_i32; MAX_BANDS];

    for i in 0..len {
        let band_n = band_width(i) << lm;
        let narrow = band_width(i) == 1;
        let lo = E_BANDS[i] << lm;
        let mut tmp = x[lo..lo + band_n].to_vec();

        let mut best_l1 = l1_metric(&tmp, if is_transient { lm as i32 } else { 0 }, bias);
        let mut best_level = 0_i32;

        // Check the -1 case for transients.
        if is_transient && !narrow {
            let mut tmp1 = tmp.clone();
            haar1(&mut tmp1, band_n >> lm, 1 << lm);
            let l1 = l1_metric(&tmp1, lm as i32 + 1, bias);
            if l1 < best_l1 {
                best_l1 = l1;
                best_level = -1;
            }
        }

        let extra = usize::from(!(is_transient || narrow));
        for k in 0..lm + extra {
            let level = if is_transient {
                lm as i32 - k as i32 - 1
            } else {
                k as i32 + 1
            };
            haar1(&mut tmp, band_n >> k, 1 << k);
            let l1 = l1_metric(&tmp, level, bias);
            if l1 < best_l1 {
                best_l1 = l1;
                best_level = k as i32 + 1;
            }
        }

        // Metric is in Q1 to be able to select the mid-point for narrower
        // bands.
        metric[i] = if is_transient {
            2 * best_level
        } else {
            -2 * best_level
        };
        if narrow && (metric[i] == 0 || metric[i] == -2 * lm as i32) {
            metric[i] -= 1;
        }
    }

    // Choose tf_select by evaluating both tables.
    let mut selcost = [0_i32; 2];
    (0..2).for_each(|sel| {
        let mut cost0 = if is_transient { 0 } else { lambda };
        let mut cost1 = 0;
        (1..len).for_each(|i| {
            let curr0 = i32::min(cost0, cost1 + lambda);
            let curr1 = i32::min(cost0 + lambda, cost1);
            cost0 = curr0
                + (metric[i] - 2 * i32::from(TF_SELECT_TABLE[lm][transient][sel][0])).abs();
            cost1 = curr1
                + (metric[i] - 2 * i32::from(TF_SELECT_TABLE[lm][transient][sel][1])).abs();
        });
        selcost[sel] = i32::min(cost0, cost1);
    });
    // Only allow tf_select = 1 for transients.
    let tf_select = usize::from(selcost[1] < selcost[0] && is_transient);

    // Viterbi forward pass.
    let mut path0 = [0_u8; MAX_BANDS];
    let mut path1 = [0_u8; MAX_BANDS];
    let mut cost0 = if is_transient { 0 } else { lambda };
    let mut cost1 = 0;
    (1..len).for_each(|i| {
        let from0 = cost0;
        let from1 = cost1 + lambda;
        let curr0 = if from0 < from1 {
            path0[i] = 0;
            from0
        } else {
            path0[i] = 1;
            from1
        };

        let from0 = cost0 + lambda;
        let from1 = cost1;
        let curr1 = if from0 < from1 {
            path1[i] = 0;
            from0
        } else {
            path1[i] = 1;
            from1
        };

        cost0 = curr0
            + (metric[i] - 2 * i32::from(TF_SELECT_TABLE[lm][transient][tf_select][0])).abs();
        cost1 = curr1
            + (metric[i] - 2 * i32::from(TF_SELECT_TABLE[lm][transient][tf_select][1])).abs();
    });
    tf_res[len - 1] = i8::from(cost0 >= cost1);

    // Viterbi backward pass to trace the decisions.
    (0..len - 1).rev().for_each(|i| {
        tf_res[i] = if tf_res[i + 1] == 1 {
            path1[i + 1] as i8
        } else {
            path0[i + 1] as i8
        };
    });

    tf_select
}

/// Writes the per band tf switches as differential flags.
fn tf_encode(
    start: usize,
    end: usize,
    is_transient: bool,
    tf_res: &mut [i8; MAX_BANDS],
    lm: usize,
    mut tf_select: usize,
    enc: &mut RangeEncoder<'_>,
) -> Result<(), EncoderError> {
    let mut budget = enc.storage_bits();
    let mut tell = enc.tell();
    let mut logp: u32 = if is_transient { 2 } else { 4 };
    let tf_select_rsv = lm > 0 && tell + logp + 1 <= budget;
    if tf_select_rsv {
        budget -= 1;
    }
    let mut curr: i8 = 0;
    let mut tf_changed = false;
    for i in start..end {
        if tell + logp <= budget {
            enc.encode_bit_logp((tf_res[i] ^ curr) as u32, logp)?;
            tell = enc.tell();
            curr = tf_res[i];
            tf_changed |= curr != 0;
        } else {
            tf_res[i] = curr;
        }
        logp = if is_transient { 4 } else { 5 };
    }
    let transient = usize::from(is_transient);
    if tf_select_rsv
        && TF_SELECT_TABLE[lm][transient][0][usize::from(tf_changed)]
            != TF_SELECT_TABLE[lm][transient][1][usize::from(tf_changed)]
    {
        enc.encode_bit_logp(tf_select as u32, 1)?;
    } else {
        tf_select = 0;
    }
    for i in start..end {
        tf_res[i] = TF_SELECT_TABLE[lm][transient][tf_select][tf_res[i] as usize];
    }
    Ok(())
}

/// Counts boost steps per band where the energy pokes out of the smoothed
/// spectral envelope.
fn dynalloc_analysis(
    band_log_e: &[[f32; MAX_BANDS]; 2],
    end: usize,
    channels: usize,
) -> [usize; MAX_BANDS] {
    let mut steps = [0_usize; MAX_BANDS];
    let mut follower = [0.0_f32; MAX_BANDS];

    (0..end).for_each(|i| {
        let mut e = band_log_e[0][i];
        if channels == 2 {
            e = f32::max(e, band_log_e[1][i]);
        }
        follower[i] = e;
    });
    // Two-sided smoothing caps how fast the envelope may rise.
    (1..end).for_each(|i| {
        follower[i] = f32::min(follower[i], follower[i - 1] + 1.5);
    });
    (0..end - 1).rev().for_each(|i| {
        follower[i] = f32::min(follower[i], follower[i + 1] + 2.0);
    });

    (0..end).for_each(|i| {
        let mut e = band_log_e[0][i];
        if channels == 2 {
            e = f32::max(e, band_log_e[1][i]);
        }
        let excess = e - follower[i] - 1.0;
        if excess > 0.0 {
            steps[i] = usize::min(4, excess as usize);
        }
    });
    steps
}

/// Allocation tilt from the spectral slope: tilted-down spectra move bits
/// towards the low bands.
fn alloc_trim_analysis(band_log_e: &[[f32; MAX_BANDS]; 2], end: usize, lm: usize) -> i32 {
    let mut diff = 0.0_f32;
    (0..end).for_each(|i| {
        diff += band_log_e[0][i] * (2 * i as i32 + 1 - end as i32) as f32;
    });
    diff /= (end * (end - 1)) as f32 / 2.0;
    let mut trim = 5.0 - 2.0 * diff;
    // Milder tilt for short frames.
    trim += (lm as f32 - 3.0) * 0.2;
    i32::max(0, i32::min(10, (trim + 0.5).floor() as i32))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;

    use super::*;
    use crate::celt::decoder::CeltDecoder;
    use crate::range_coder::RangeDecoder;

    fn sine(frequency: f32, length: usize, channels: usize) -> Vec<f32> {
        (0..length * channels)
            .map(|i| {
                let n = i / channels;
                0.5 * (2.0 * std::f32::consts::PI * frequency * n as f32 / 48000.0).sin()
            })
            .collect()
    }

    fn correlation(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let mut xy = 0.0_f64;
        let mut xx = 1e-12_f64;
        let mut yy = 1e-12_f64;
        (0..n).for_each(|i| {
            xy += f64::from(a[i]) * f64::from(b[i]);
            xx += f64::from(a[i]) * f64::from(a[i]);
            yy += f64::from(b[i]) * f64::from(b[i]);
        });
        (xy / (xx * yy).sqrt()) as f32
    }

    /// Encode and decode a stream of frames, returning the decoded signal.
    fn round_trip(
        input: &[f32],
        frame_size: usize,
        channels: Channels,
        bytes_per_frame: usize,
    ) -> Vec<f32> {
        let ch = channels as usize;
        let mut encoder = CeltEncoder::new(SamplingRate::Hz48000, channels).unwrap();
        let mut decoder = CeltDecoder::new(SamplingRate::Hz48000, channels).unwrap();
        let mut decoded = Vec::new();

        let frames = input.len() / (frame_size * ch);
        (0..frames).for_each(|f| {
            let mut packet = vec![0_u8; bytes_per_frame];
            let written = encoder
                .encode(
                    &input[f * frame_size * ch..(f + 1) * frame_size * ch],
                    frame_size,
                    &mut packet,
                )
                .unwrap();
            assert_eq!(written, bytes_per_frame);

            let mut dec = RangeDecoder::new(&packet);
            let mut output = vec![0.0_f32; frame_size * ch];
            let samples = decoder.decode(&mut dec, frame_size, &mut output).unwrap();
            assert_eq!(samples, frame_size);
            assert_eq!(decoder.final_range(), encoder.final_range());
            decoded.extend_from_slice(&output);
        });
        decoded
    }

    #[test]
    fn test_sine_round_trip_mono() {
        let frame_size = 960;
        let input = sine(440.0, frame_size * 25, 1);
        let decoded = round_trip(&input, frame_size, Channels::Mono, 160);

        // Skip the first two frames: codec delay plus energy convergence.
        let skip = 2 * frame_size;
        let r = correlation(
            &input[skip..input.len() - OVERLAP],
            &decoded[skip + OVERLAP..],
        );
        assert!(r > 0.99, "correlation = {}", r);
    }

    #[test]
    fn test_sine_round_trip_stereo() {
        let frame_size = 960;
        let input = sine(440.0, frame_size * 15, 2);
        let decoded = round_trip(&input, frame_size, Channels::Stereo, 260);

        let skip = 2 * frame_size * 2;
        let r = correlation(
            &input[skip..input.len() - 2 * OVERLAP],
            &decoded[skip + 2 * OVERLAP..],
        );
        assert!(r > 0.98, "correlation = {}", r);
    }

    #[test]
    fn test_short_frames_round_trip() {
        [120_usize, 240, 480].iter().for_each(|&frame_size| {
            let input = sine(1000.0, frame_size * 40, 1);
            let decoded = round_trip(&input, frame_size, Channels::Mono, 80);
            let skip = 8 * frame_size;
            let r = correlation(
                &input[skip..input.len() - OVERLAP],
                &decoded[skip + OVERLAP..],
            );
            assert!(r > 0.9, "frame {} correlation = {}", frame_size, r);
        });
    }

    #[test]
    fn test_silence_frames() {
        let frame_size = 960;
        let input = vec![0.0_f32; frame_size * 4];
        let decoded = round_trip(&input, frame_size, Channels::Mono, 60);
        decoded.iter().for_each(|&v| {
            assert!(v.abs() < 1e-3);
        });
    }

    #[test]
    fn test_noise_round_trip_is_stable() {
        let mut rnd = nanorand::WyRand::new_seed(22222);
        let frame_size = 960;
        let input: Vec<f32> = (0..frame_size * 10)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 65536.0 - 0.5)
            .collect();
        let decoded = round_trip(&input, frame_size, Channels::Mono, 160);
        decoded.iter().for_each(|&v| {
            assert!(v.is_finite());
            assert!(v.abs() < 4.0, "sample {}", v);
        });
    }

    #[test]
    fn test_two_decoders_agree() {
        let frame_size = 960;
        let input = sine(330.0, frame_size * 6, 1);
        let a = round_trip(&input, frame_size, Channels::Mono, 120);
        let b = round_trip(&input, frame_size, Channels::Mono, 120);
        a.iter().zip(b.iter()).for_each(|(x, y)| {
            assert!((x - y).abs() < 1e-9);
        });
    }

    #[test]
    fn test_plc_produces_bounded_output() {
        let frame_size = 960;
        let input = sine(220.0, frame_size * 4, 1);
        let mut encoder = CeltEncoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();
        let mut decoder = CeltDecoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();

        (0..4).for_each(|f| {
            let mut packet = vec![0_u8; 120];
            encoder
                .encode(&input[f * frame_size..(f + 1) * frame_size], frame_size, &mut packet)
                .unwrap();
            let mut dec = RangeDecoder::new(&packet);
            let mut output = vec![0.0_f32; frame_size];
            decoder.decode(&mut dec, frame_size, &mut output).unwrap();
        });

        // Conceal three lost frames.
        (0..3).for_each(|_| {
            let mut output = vec![0.0_f32; frame_size];
            let samples = decoder.decode_lost(frame_size, &mut output);
            assert_eq!(samples, frame_size);
            output.iter().for_each(|&v| {
                assert!(v.is_finite());
                assert!(v.abs() < 2.0);
            });
        });
    }

    #[test]
    fn test_truncated_packet_does_not_crash() {
        let frame_size = 960;
        let input = sine(440.0, frame_size, 1);
        let mut encoder = CeltEncoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();
        let mut packet = vec![0_u8; 100];
        encoder.encode(&input, frame_size, &mut packet).unwrap();

        // Chop off the tail; the decoder must still produce a frame.
        let truncated = &packet[..packet.len() - 1];
        let mut decoder = CeltDecoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();
        let mut dec = RangeDecoder::new(truncated);
        let mut output = vec![0.0_f32; frame_size];
        let samples = decoder.decode(&mut dec, frame_size, &mut output).unwrap();
        assert_eq!(samples, frame_size);
        output.iter().for_each(|&v| assert!(v.is_finite()));
    }
}
