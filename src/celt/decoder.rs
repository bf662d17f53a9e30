//! Implements the CELT decoder.

use once_cell::sync::Lazy;

use crate::celt::bands::{
    anti_collapse, denormalise_bands, quant_all_bands, BandQuantParams,
};
use crate::celt::coder::EntropyCoder;
use crate::celt::comb_filter::comb_filter_inplace;
use crate::celt::lpc::{
    autocorr, celt_fir, celt_iir_inplace, celt_lpc, pitch_search, PLC_LPC_ORDER,
};
use crate::celt::mdct::Mdct;
use crate::celt::quant_energy::{
    unquant_coarse_energy, unquant_energy_finalise, unquant_fine_energy,
};
use crate::celt::rate::{compute_allocation, init_caps, AllocationRequest};
use crate::celt::tables::{SPREAD_ICDF, TAPSET_ICDF, TF_SELECT_TABLE, TRIM_ICDF};
use crate::celt::vq::SPREAD_NORMAL;
use crate::celt::{
    band_width, COMBFILTER_MAXPERIOD, COMBFILTER_MINPERIOD, MAX_BANDS, MAX_LM, SHORT_BLOCKSIZE,
    WINDOW,
};
use crate::decoder_error::DecoderError;
use crate::range_coder::{RangeDecoder, Tell, BITRES};
use crate::{Channels, SamplingRate};

/// History kept for the post-filter and the concealment, per channel.
pub(crate) const DECODE_BUFFER_SIZE: usize = 2048;
const OVERLAP: usize = SHORT_BLOCKSIZE;

use crate::celt::PREEMPHASIS;

static MDCT: Lazy<Mdct> = Lazy::new(Mdct::new);

/// The CELT decoder.
pub(crate) struct CeltDecoder {
    /// Output channel count.
    channels: usize,
    /// Channels coded in the stream, may differ from the output count.
    stream_channels: usize,
    /// 48 kHz divided by the output rate.
    downsample: usize,
    start_band: usize,
    end_band: usize,
    /// Forbid the stereo phase inversion flag (mono downmix compatibility).
    disable_inv: bool,

    rng: u32,
    loss_count: u32,
    last_pitch_index: usize,
    postfilter_period: usize,
    postfilter_gain: f32,
    postfilter_tapset: usize,
    postfilter_period_old: usize,
    postfilter_gain_old: f32,
    postfilter_tapset_old: usize,
    preemph_mem: [f32; 2],
    /// Synthesis history plus the pending windowed overlap tail.
    decode_mem: Vec<Vec<f32>>,
    plc_lpc: [[f32; PLC_LPC_ORDER]; 2],
    old_ebands: [[f32; MAX_BANDS]; 2],
    old_log_e: [[f32; MAX_BANDS]; 2],
    old_log_e2: [[f32; MAX_BANDS]; 2],
    background_log_e: [[f32; MAX_BANDS]; 2],
}

impl CeltDecoder {
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: Channels,
    ) -> Result<Self, DecoderError> {
        let downsample = SamplingRate::Hz48000 as usize / sampling_rate as usize;
        let channels = channels as usize;

        Ok(Self {
            channels,
            stream_channels: channels,
            downsample,
            start_band: 0,
            end_band: MAX_BANDS,
            disable_inv: channels == 1,
            rng: 0,
            loss_count: 0,
            last_pitch_index: COMBFILTER_MINPERIOD,
            postfilter_period: 0,
            postfilter_gain: 0.0,
            postfilter_tapset: 0,
            postfilter_period_old: 0,
            postfilter_gain_old: 0.0,
            postfilter_tapset_old: 0,
            preemph_mem: [0.0; 2],
            decode_mem: vec![vec![0.0; DECODE_BUFFER_SIZE + OVERLAP]; channels],
            plc_lpc: [[0.0; PLC_LPC_ORDER]; 2],
            old_ebands: [[0.0; MAX_BANDS]; 2],
            old_log_e: [[-28.0; MAX_BANDS]; 2],
            old_log_e2: [[-28.0; MAX_BANDS]; 2],
            background_log_e: [[-28.0; MAX_BANDS]; 2],
        })
    }

    /// Resets the CELT decoder.
    pub(crate) fn reset(&mut self) {
        self.rng = 0;
        self.loss_count = 0;
        self.last_pitch_index = COMBFILTER_MINPERIOD;
        self.postfilter_period = 0;
        self.postfilter_gain = 0.0;
        self.postfilter_tapset = 0;
        self.postfilter_period_old = 0;
        self.postfilter_gain_old = 0.0;
        self.postfilter_tapset_old = 0;
        self.preemph_mem = [0.0; 2];
        self.decode_mem
            .iter_mut()
            .for_each(|mem| mem.iter_mut().for_each(|v| *v = 0.0));
        self.plc_lpc = [[0.0; PLC_LPC_ORDER]; 2];
        self.old_ebands = [[0.0; MAX_BANDS]; 2];
        self.old_log_e = [[-28.0; MAX_BANDS]; 2];
        self.old_log_e2 = [[-28.0; MAX_BANDS]; 2];
        self.background_log_e = [[-28.0; MAX_BANDS]; 2];
    }

    pub(crate) fn set_start_band(&mut self, band: usize) {
        debug_assert!(band < MAX_BANDS);
        self.start_band = band;
    }

    pub(crate) fn set_end_band(&mut self, band: usize) {
        debug_assert!(band > 0 && band <= MAX_BANDS);
        self.end_band = band;
    }

    pub(crate) fn set_stream_channels(&mut self, channels: usize) {
        self.stream_channels = channels;
    }

    /// The final range coder state of the last decoded frame.
    pub(crate) fn final_range(&self) -> u32 {
        self.rng
    }

    /// The pitch period of the current post-filter, in samples at 48 kHz.
    pub(crate) fn pitch(&self) -> u32 {
        self.postfilter_period as u32
    }

    /// The gain of the current post-filter.
    pub(crate) fn postfilter_gain(&self) -> f32 {
        self.postfilter_gain
    }

    /// Flushes the synthesis overlap. Used when the Opus controller enters
    /// or leaves a mode that bypasses CELT.
    pub(crate) fn flush_overlap(&mut self) {
        self.decode_mem.iter_mut().for_each(|mem| {
            mem[DECODE_BUFFER_SIZE..].iter_mut().for_each(|v| *v = 0.0);
        });
    }

    /// Decodes one CELT frame from the shared range decoder.
    ///
    /// `frame_size` is in samples at 48 kHz; the number of samples written
    /// per channel is `frame_size / downsample`.
    pub(crate) fn decode(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        frame_size: usize,
        output: &mut [f32],
    ) -> Result<usize, DecoderError> {
        let lm = match frame_size / SHORT_BLOCKSIZE {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => return Err(DecoderError::InvalidPacket),
        };
        if SHORT_BLOCKSIZE << lm != frame_size {
            return Err(DecoderError::InvalidPacket);
        }
        let n = frame_size;
        let channels = self.stream_channels;
        let start = self.start_band;
        let end = self.end_band;
        if end <= start {
            return Err(DecoderError::InternalError("no bands to decode"));
        }

        let total_bits = dec.storage_bits() as i32;

        // The two channels share the energy envelope when the stream turns
        // mono.
        if channels == 1 {
            (0..MAX_BANDS).for_each(|i| {
                self.old_ebands[0][i] = f32::max(self.old_ebands[0][i], self.old_ebands[1][i]);
            });
        }

        let mut tell = dec.tell() as i32;
        let silence = if tell >= total_bits {
            true
        } else if tell == 1 {
            dec.decode_bit_logp(15)
        } else {
            false
        };
        if silence {
            // Pretend we've read all the remaining bits.
            dec.skip_to_end();
            tell = dec.tell() as i32;
        }

        let mut postfilter_pitch = 0;
        let mut postfilter_gain = 0.0;
        let mut postfilter_tapset = 0;
        if start == 0 && tell + 16 <= total_bits {
            if dec.decode_bit_logp(1) {
                let octave = dec.decode_uint(6);
                postfilter_pitch = ((16 << octave) + dec.decode_bits(4 + octave) - 1) as usize;
                let qg = dec.decode_bits(3);
                if dec.tell() as i32 + 2 <= total_bits {
                    postfilter_tapset = dec.decode_icdf(&TAPSET_ICDF, 2) as usize;
                }
                postfilter_gain = 0.09375 * (qg + 1) as f32;
            }
            tell = dec.tell() as i32;
        }

        let is_transient = if lm > 0 && tell + 3 <= total_bits {
            let value = dec.decode_bit_logp(3);
            tell = dec.tell() as i32;
            value
        } else {
            false
        };
        let short_blocks = is_transient;

        let intra = if tell + 3 <= total_bits {
            dec.decode_bit_logp(3)
        } else {
            false
        };

        unquant_coarse_energy(&mut self.old_ebands, start, end, intra, channels, lm, dec);

        let mut tf_res = [0_i8; MAX_BANDS];
        tf_decode(start, end, is_transient, &mut tf_res, lm, dec);

        tell = dec.tell() as i32;
        let spread = if tell + 4 <= total_bits {
            dec.decode_icdf(&SPREAD_ICDF, 5) as usize
        } else {
            SPREAD_NORMAL
        };

        let cap = init_caps(lm, channels);

        // Dynamic allocation boosts.
        let mut offsets = [0_i32; MAX_BANDS];
        let mut dynalloc_logp = 6;
        let mut total_bits_q3 = total_bits << BITRES;
        let mut tell_q3 = dec.tell_frac() as i32;
        for i in start..end {
            let width = (channels * band_width(i) << lm) as i32;
            // Quanta is 6 bits, but no more than 1 bit/sample and no less
            // than 1/8 bit/sample.
            let quanta = i32::min(width << BITRES, i32::max(6 << BITRES, width));
            let mut dynalloc_loop_logp = dynalloc_logp;
            let mut boost = 0;
            while tell_q3 + (dynalloc_loop_logp << BITRES) < total_bits_q3 && boost < cap[i] {
                let flag = dec.decode_bit_logp(dynalloc_loop_logp as u32);
                tell_q3 = dec.tell_frac() as i32;
                if !flag {
                    break;
                }
                boost += quanta;
                total_bits_q3 -= quanta;
                dynalloc_loop_logp = 1;
            }
            offsets[i] = boost;
            // Making dynalloc more likely.
            if boost > 0 {
                dynalloc_logp = i32::max(2, dynalloc_logp - 1);
            }
        }

        let alloc_trim = if tell_q3 + (6 << BITRES) <= total_bits_q3 {
            dec.decode_icdf(&TRIM_ICDF, 7) as i32
        } else {
            5
        };

        let mut bits = (total_bits << BITRES) - dec.tell_frac() as i32 - 1;
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
            intensity: 0,
            dual_stereo: false,
            total: bits,
            channels,
            lm,
            prev_coded_bands: 0,
            signal_bandwidth: 0,
        };
        let alloc = {
            let mut coder = EntropyCoder::Decoder(dec);
            compute_allocation(&request, &mut coder)
                .map_err(|_| DecoderError::InternalError("allocation failed"))?
        };
        if alloc.coded_bands <= start {
            return Err(DecoderError::InvalidPacket);
        }

        unquant_fine_energy(&mut self.old_ebands, &alloc.fine_bits, start, end, channels, dec);

        // Make room for this frame in the synthesis history.
        self.decode_mem.iter_mut().for_each(|mem| {
            mem.copy_within(n.., 0);
        });

        // Decode the shapes.
        let mut x = vec![0.0_f32; channels * n];
        let mut collapse_masks = [0_u8; 2 * MAX_BANDS];
        let band_e_dummy = [[0.0_f32; MAX_BANDS]; 2];
        {
            let params = BandQuantParams {
                start,
                end,
                eff_ebands: MAX_BANDS,
                band_e: &band_e_dummy,
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
                disable_inv: self.disable_inv,
            };
            let mut coder = EntropyCoder::Decoder(dec);
            let (x0, x1) = x.split_at_mut(n);
            quant_all_bands(
                &params,
                x0,
                if channels == 2 { Some(x1) } else { None },
                &mut collapse_masks,
                &mut coder,
                &mut self.rng,
            )
            .map_err(|_| DecoderError::InternalError("band decode failed"))?;
        }

        let anti_collapse_on = if anti_collapse_rsv > 0 {
            dec.decode_bits(1) != 0
        } else {
            false
        };

        unquant_energy_finalise(
            &mut self.old_ebands,
            &alloc.fine_bits,
            &alloc.fine_priority,
            start,
            end,
            channels,
            total_bits - dec.tell() as i32,
            dec,
        );

        if anti_collapse_on {
            let old_ebands = self.old_ebands;
            anti_collapse(
                &mut x,
                &collapse_masks,
                lm,
                channels,
                n,
                start,
                end,
                &old_ebands,
                &self.old_log_e,
                &self.old_log_e2,
                &alloc.pulses,
                &mut self.rng,
            );
        }

        if silence {
            self.old_ebands = [[-28.0; MAX_BANDS]; 2];
        }

        self.synthesis(&x, is_transient, lm, silence, end);

        // Apply the post-filter with a cross-fade from last frame's
        // parameters over the first short block.
        self.postfilter_period = usize::max(self.postfilter_period, COMBFILTER_MINPERIOD);
        self.postfilter_period_old = usize::max(self.postfilter_period_old, COMBFILTER_MINPERIOD);
        let postfilter_pitch = usize::min(postfilter_pitch, COMBFILTER_MAXPERIOD - 2);
        for c in 0..self.channels {
            let mem = &mut self.decode_mem[c];
            let offset = DECODE_BUFFER_SIZE - n;
            comb_filter_inplace(
                mem,
                offset,
                self.postfilter_period_old,
                self.postfilter_period,
                SHORT_BLOCKSIZE,
                self.postfilter_gain_old,
                self.postfilter_gain,
                self.postfilter_tapset_old,
                self.postfilter_tapset,
                OVERLAP,
            );
            if lm != 0 {
                comb_filter_inplace(
                    mem,
                    offset + SHORT_BLOCKSIZE,
                    self.postfilter_period,
                    postfilter_pitch,
                    n - SHORT_BLOCKSIZE,
                    self.postfilter_gain,
                    postfilter_gain,
                    self.postfilter_tapset,
                    postfilter_tapset,
                    OVERLAP,
                );
            }
        }
        self.postfilter_period_old = self.postfilter_period;
        self.postfilter_gain_old = self.postfilter_gain;
        self.postfilter_tapset_old = self.postfilter_tapset;
        self.postfilter_period = postfilter_pitch;
        self.postfilter_gain = postfilter_gain;
        self.postfilter_tapset = postfilter_tapset;
        if lm != 0 {
            self.postfilter_period_old = self.postfilter_period;
            self.postfilter_gain_old = self.postfilter_gain;
            self.postfilter_tapset_old = self.postfilter_tapset;
        }

        if channels == 1 {
            self.old_ebands[1] = self.old_ebands[0];
        }

        // Energy history for the anti-collapse of the next frames.
        if !is_transient {
            self.old_log_e2 = self.old_log_e;
            self.old_log_e = self.old_ebands;
        } else {
            (0..2).for_each(|c| {
                (0..MAX_BANDS).for_each(|i| {
                    self.old_log_e[c][i] = f32::min(self.old_log_e[c][i], self.old_ebands[c][i]);
                });
            });
        }
        // Bands outside the coded range stay pinned.
        (0..2).for_each(|c| {
            (0..start).chain(end..MAX_BANDS).for_each(|i| {
                self.old_ebands[c][i] = 0.0;
                self.old_log_e[c][i] = -28.0;
                self.old_log_e2[c][i] = -28.0;
            });
            (0..MAX_BANDS).for_each(|i| {
                self.old_ebands[c][i] = f32::min(self.old_ebands[c][i], 32.0);
            });
        });

        self.rng = dec.range();
        self.loss_count = 0;

        Ok(self.deemphasis_output(n, output))
    }

    /// Synthesizes the time domain signal from the decoded shapes.
    fn synthesis(&mut self, x: &[f32], is_transient: bool, lm: usize, silence: bool, eff_end: usize) {
        let n = SHORT_BLOCKSIZE << lm;
        let m = 1 << lm;
        let cc = self.channels;
        let c_stream = self.stream_channels;
        let (blocks, block_size, shift) = if is_transient {
            (m, SHORT_BLOCKSIZE, MAX_LM)
        } else {
            (1, n, MAX_LM - lm)
        };

        let mut freq = vec![0.0_f32; n];
        if c_stream == 2 && cc == 1 {
            // Downmix the two coded channels in the frequency domain.
            let mut freq2 = vec![0.0_f32; n];
            denormalise_bands(
                &x[..n],
                &mut freq,
                &self.old_ebands[0],
                self.start_band,
                eff_end,
                m,
                self.downsample,
                silence,
            );
            denormalise_bands(
                &x[n..],
                &mut freq2,
                &self.old_ebands[1],
                self.start_band,
                eff_end,
                m,
                self.downsample,
                silence,
            );
            freq.iter_mut().zip(freq2.iter()).for_each(|(a, &b)| {
                *a = 0.5 * (*a + b);
            });
            self.imdct_blocks(0, &freq, blocks, block_size, shift, n);
        } else if c_stream == 1 && cc == 2 {
            // Upmix: synthesize the single coded channel into both outputs.
            denormalise_bands(
                &x[..n],
                &mut freq,
                &self.old_ebands[0],
                self.start_band,
                eff_end,
                m,
                self.downsample,
                silence,
            );
            self.imdct_blocks(0, &freq, blocks, block_size, shift, n);
            self.imdct_blocks(1, &freq, blocks, block_size, shift, n);
        } else {
            for c in 0..cc {
                denormalise_bands(
                    &x[c * n..(c + 1) * n],
                    &mut freq,
                    &self.old_ebands[c],
                    self.start_band,
                    eff_end,
                    m,
                    self.downsample,
                    silence,
                );
                self.imdct_blocks(c, &freq, blocks, block_size, shift, n);
            }
        }
    }

    fn imdct_blocks(
        &mut self,
        channel: usize,
        freq: &[f32],
        blocks: usize,
        block_size: usize,
        shift: usize,
        n: usize,
    ) {
        let mem = &mut self.decode_mem[channel];
        let offset = DECODE_BUFFER_SIZE - n;
        // The pending overlap tail from the previous frame sits at the head
        // of the target region; clear the rest before overlap-add.
        mem[offset + OVERLAP..].iter_mut().for_each(|v| *v = 0.0);
        (0..blocks).for_each(|b| {
            MDCT.backward(
                shift,
                &freq[b..],
                &mut mem[offset + b * block_size..],
                blocks,
            );
        });
    }

    /// De-emphasis, downsampling and interleaving into the output buffer.
    fn deemphasis_output(&mut self, n: usize, output: &mut [f32]) -> usize {
        let out_samples = n / self.downsample;
        let cc = self.channels;
        for c in 0..cc {
            let mem = &self.decode_mem[c];
            let mut state = self.preemph_mem[c];
            let base = DECODE_BUFFER_SIZE - n;
            let mut j = 0;
            for i in 0..n {
                let tmp = mem[base + i] + state;
                state = PREEMPHASIS * tmp;
                if i % self.downsample == 0 {
                    output[j * cc + c] = tmp;
                    j += 1;
                }
            }
            self.preemph_mem[c] = state;
        }
        out_samples
    }

    /// Produces one concealment frame after a packet loss.
    pub(crate) fn decode_lost(&mut self, frame_size: usize, output: &mut [f32]) -> usize {
        let n = frame_size;
        let cc = self.channels;
        let fade = if self.loss_count == 0 {
            1.0
        } else {
            0.8_f32.powi(self.loss_count as i32)
        };

        // Estimate the pitch once per loss burst.
        if self.loss_count == 0 {
            let history = &self.decode_mem[0][..DECODE_BUFFER_SIZE];
            self.last_pitch_index =
                pitch_search(history, COMBFILTER_MINPERIOD, COMBFILTER_MAXPERIOD);
        }
        let period = usize::max(self.last_pitch_index, COMBFILTER_MINPERIOD);

        for c in 0..cc {
            let mem = &mut self.decode_mem[c];
            mem.copy_within(n.., 0);

            // Whiten the last period, extend it, and re-shape with the LPC
            // filter so the extrapolation keeps the spectral envelope.
            let exc_len = usize::min(2 * period, DECODE_BUFFER_SIZE - n);
            let exc_start = DECODE_BUFFER_SIZE - n - exc_len;
            if self.loss_count == 0 {
                let mut ac = [0.0_f32; PLC_LPC_ORDER + 1];
                autocorr(&mem[exc_start..DECODE_BUFFER_SIZE - n], &mut ac);
                // Noise floor and lag windowing keep the filter stable.
                ac[0] *= 1.0001;
                ac.iter_mut().enumerate().skip(1).for_each(|(i, a)| {
                    *a -= *a * (0.008 * i as f32) * (0.008 * i as f32);
                });
                celt_lpc(&mut self.plc_lpc[c], &ac);
            }

            let lead = usize::min(PLC_LPC_ORDER, exc_start);
            let mut residual = vec![0.0_f32; exc_len + lead];
            celt_fir(
                &mem[exc_start - lead..DECODE_BUFFER_SIZE - n],
                &self.plc_lpc[c],
                &mut residual,
            );

            // Periodic extension of the residual, one overlap beyond the
            // frame for the next overlap-add.
            let src = &residual[lead..];
            let tail = usize::min(period, src.len());
            let mut synth = vec![0.0_f32; n + OVERLAP];
            (0..n + OVERLAP).for_each(|i| {
                synth[i] = fade * src[src.len() - tail + (i % tail)];
            });

            // Back through the synthesis filter, seeded with real history.
            let mut lpc_mem = [0.0_f32; PLC_LPC_ORDER];
            (0..PLC_LPC_ORDER).for_each(|j| {
                lpc_mem[PLC_LPC_ORDER - 1 - j] = mem[DECODE_BUFFER_SIZE - n - 1 - j];
            });
            celt_iir_inplace(&mut synth, &self.plc_lpc[c], &mut lpc_mem);

            // Cross-fade against the pending overlap and install the frame.
            let offset = DECODE_BUFFER_SIZE - n;
            (0..n).for_each(|i| {
                mem[offset + i] = if i < OVERLAP {
                    let w = WINDOW[i];
                    mem[offset + i] + w * w * synth[i]
                } else {
                    synth[i]
                };
            });
            // Queue a windowed tail for the next frame's overlap-add.
            (0..OVERLAP).for_each(|i| {
                let w = WINDOW[OVERLAP - 1 - i];
                mem[DECODE_BUFFER_SIZE + i] = w * w * synth[n + i];
            });
        }

        self.loss_count += 1;
        self.deemphasis_output(n, output)
    }
}

/// Decodes the per band time-frequency resolution switches.
fn tf_decode(
    start: usize,
    end: usize,
    is_transient: bool,
    tf_res: &mut [i8; MAX_BANDS],
    lm: usize,
    dec: &mut RangeDecoder<'_>,
) {
    let mut budget = dec.storage_bits();
    let mut tell = dec.tell();
    let mut logp: u32 = if is_transient { 2 } else { 4 };
    let tf_select_rsv = lm > 0 && tell + logp + 1 <= budget;
    if tf_select_rsv {
        budget -= 1;
    }
    let mut tf_changed = false;
    let mut curr = false;
    for i in start..end {
        if tell + logp <= budget {
            curr ^= dec.decode_bit_logp(logp);
            tell = dec.tell();
            tf_changed |= curr;
        }
        tf_res[i] = i8::from(curr);
        logp = if is_transient { 4 } else { 5 };
    }
    let transient = usize::from(is_transient);
    let mut tf_select = 0;
    if tf_select_rsv
        && TF_SELECT_TABLE[lm][transient][0][usize::from(tf_changed)]
            != TF_SELECT_TABLE[lm][transient][1][usize::from(tf_changed)]
    {
        tf_select = usize::from(dec.decode_bit_logp(1));
    }
    for i in start..end {
        tf_res[i] = TF_SELECT_TABLE[lm][transient][tf_select][tf_res[i] as usize];
    }
}
