//! Implements the bandwidth converting resamplers.
//!
//! Every path is a short chain: a high quality 2x allpass upsampler when
//! the rate goes up, an AR lowpass when it goes down, and a 12 phase
//! fractional FIR interpolator that produces the output grid. All state
//! lives in the instance and persists across frames; a bandwidth switch
//! resets it.

use once_cell::sync::Lazy;

use crate::silk::math::{rshift_round, sat16, smlawb, smulwb};

/// Allpass coefficients of the even output phase, Q16.
const UP2_HQ_0: [i32; 3] = [1746, 14986, 39083 - 65536];
/// Allpass coefficients of the odd output phase, Q16.
const UP2_HQ_1: [i32; 3] = [6854, 25769, 55542 - 65536];

/// Number of fractional interpolation phases.
const FIR_PHASES: usize = 12;
/// Taps of the fractional interpolator.
const FIR_TAPS: usize = 8;

/// Windowed sinc interpolation filters, one per fractional phase, Q15.
static FRAC_FIR: Lazy<[[i16; FIR_TAPS]; FIR_PHASES]> = Lazy::new(|| {
    let mut table = [[0_i16; FIR_TAPS]; FIR_PHASES];
    table.iter_mut().enumerate().for_each(|(phase, taps)| {
        let delay = 3.0 + (phase as f64 + 0.5) / FIR_PHASES as f64;
        let mut sum = 0.0_f64;
        let mut values = [0.0_f64; FIR_TAPS];
        (0..FIR_TAPS).for_each(|j| {
            let t = j as f64 - delay;
            let sinc = if t.abs() < 1e-9 {
                1.0
            } else {
                (std::f64::consts::PI * t * 0.9).sin() / (std::f64::consts::PI * t)
            };
            // Hann window over the 8 tap support.
            let w = 0.5
                - 0.5
                    * (2.0 * std::f64::consts::PI * (j as f64 + 0.5) / FIR_TAPS as f64).cos();
            values[j] = sinc * w;
            sum += values[j];
        });
        // Normalize to unit DC gain.
        (0..FIR_TAPS).for_each(|j| {
            taps[j] = (values[j] / sum * 32767.0).round() as i16;
        });
    });
    table
});

/// A stateful converter between two of the supported rates.
#[derive(Clone, Debug)]
pub(crate) struct Resampler {
    fs_in_khz: usize,
    fs_out_khz: usize,
    /// States of the three allpass sections per phase.
    s_iir: [i32; 6],
    /// Tail of the intermediate signal for the interpolator.
    s_fir: [i16; FIR_TAPS],
    /// Read position carried between frames, a rational in units of
    /// `1 / fs_out` intermediate samples.
    position: u64,
    /// Biquad lowpass state and coefficients for decimation.
    lp_state: [i64; 2],
    lp_coefs: Option<[i64; 5]>,
}

impl Resampler {
    pub(crate) fn new(fs_in_khz: usize, fs_out_khz: usize) -> Self {
        let lp_coefs = if fs_out_khz < fs_in_khz {
            Some(biquad_lowpass(fs_in_khz, fs_out_khz))
        } else {
            None
        };
        Self {
            fs_in_khz,
            fs_out_khz,
            s_iir: [0; 6],
            s_fir: [0; FIR_TAPS],
            position: 0,
            lp_state: [0; 2],
            lp_coefs,
        }
    }

    /// Zeroes all filter state. Used on bandwidth switches.
    pub(crate) fn reset(&mut self) {
        self.s_iir = [0; 6];
        self.s_fir = [0; FIR_TAPS];
        self.position = 0;
        self.lp_state = [0; 2];
    }

    pub(crate) fn fs_in_khz(&self) -> usize {
        self.fs_in_khz
    }

    pub(crate) fn fs_out_khz(&self) -> usize {
        self.fs_out_khz
    }

    /// Converts `input` and appends the produced samples to `output`.
    /// Returns the number of samples written.
    pub(crate) fn process(&mut self, input: &[i16], output: &mut [i16]) -> usize {
        let out_len = input.len() * self.fs_out_khz / self.fs_in_khz;
        debug_assert!(output.len() >= out_len);

        if self.fs_in_khz == self.fs_out_khz {
            output[..input.len()].copy_from_slice(input);
            return input.len();
        }

        // Optional lowpass when decimating.
        let filtered: Vec<i16> = match self.lp_coefs {
            Some(coefs) => input
                .iter()
                .map(|&x| {
                    let y = biquad_step(&mut self.lp_state, &coefs, i64::from(x));
                    sat16(y as i32)
                })
                .collect(),
            None => input.to_vec(),
        };

        // Intermediate signal: 2x upsampled when the rate goes up.
        let upsample2 = self.fs_out_khz > self.fs_in_khz;
        let inter_khz = if upsample2 {
            2 * self.fs_in_khz
        } else {
            self.fs_in_khz
        };
        let mut inter = vec![0_i16; FIR_TAPS + filtered.len() * if upsample2 { 2 } else { 1 }];
        inter[..FIR_TAPS].copy_from_slice(&self.s_fir);
        if upsample2 {
            self.up2_hq(&filtered, &mut inter[FIR_TAPS..]);
        } else {
            inter[FIR_TAPS..].copy_from_slice(&filtered);
        }

        // Fractional interpolation onto the output grid. The read position
        // advances by `inter_khz / fs_out_khz` intermediate samples per
        // output sample, tracked as an exact rational.
        let denom = self.fs_out_khz as u64;
        let mut produced = 0;
        while produced < out_len {
            let index = (self.position / denom) as usize;
            let frac = self.position % denom;
            let phase = (frac * FIR_PHASES as u64 / denom) as usize;
            let taps = &FRAC_FIR[phase];
            let window = &inter[index..index + FIR_TAPS];
            let mut acc = 0_i32;
            (0..FIR_TAPS).for_each(|j| {
                acc += i32::from(window[j]) * i32::from(taps[j]);
            });
            output[produced] = sat16(rshift_round(acc, 15));
            produced += 1;
            self.position += inter_khz as u64;
        }

        // Keep the interpolator tail and rebase the read position. The
        // rebase is exact: every frame spans a whole number of samples at
        // both rates.
        let consumed = (inter.len() - FIR_TAPS) as u64;
        self.s_fir.copy_from_slice(&inter[inter.len() - FIR_TAPS..]);
        self.position = self.position.saturating_sub(consumed * denom);

        out_len
    }

    /// The three section allpass 2x upsampler.
    fn up2_hq(&mut self, input: &[i16], output: &mut [i16]) {
        let s = &mut self.s_iir;
        input.iter().enumerate().for_each(|(k, &sample)| {
            let in32 = i32::from(sample) << 10;

            // First all-pass section for the even output sample.
            let y = in32.wrapping_sub(s[0]);
            let x = smulwb(y, UP2_HQ_0[0]);
            let out1 = s[0].wrapping_add(x);
            s[0] = in32.wrapping_add(x);

            // Second all-pass section.
            let y = out1.wrapping_sub(s[1]);
            let x = smulwb(y, UP2_HQ_0[1]);
            let out2 = s[1].wrapping_add(x);
            s[1] = out1.wrapping_add(x);

            // Third all-pass section.
            let y = out2.wrapping_sub(s[2]);
            let x = smlawb(y, y, UP2_HQ_0[2]);
            let even = s[2].wrapping_add(x);
            s[2] = out2.wrapping_add(x);

            output[2 * k] = sat16(rshift_round(even, 10));

            // The same cascade with the odd phase coefficients.
            let y = in32.wrapping_sub(s[3]);
            let x = smulwb(y, UP2_HQ_1[0]);
            let out1 = s[3].wrapping_add(x);
            s[3] = in32.wrapping_add(x);

            let y = out1.wrapping_sub(s[4]);
            let x = smulwb(y, UP2_HQ_1[1]);
            let out2 = s[4].wrapping_add(x);
            s[4] = out1.wrapping_add(x);

            let y = out2.wrapping_sub(s[5]);
            let x = smlawb(y, y, UP2_HQ_1[2]);
            let odd = s[5].wrapping_add(x);
            s[5] = out2.wrapping_add(x);

            output[2 * k + 1] = sat16(rshift_round(odd, 10));
        });
    }
}

/// Butterworth-style biquad lowpass at 0.4 of the output Nyquist, Q28.
fn biquad_lowpass(fs_in_khz: usize, fs_out_khz: usize) -> [i64; 5] {
    let cutoff = 0.4 * fs_out_khz as f64 / fs_in_khz as f64;
    let k = (std::f64::consts::PI * cutoff).tan();
    let q = std::f64::consts::FRAC_1_SQRT_2;
    let norm = 1.0 / (1.0 + k / q + k * k);
    let b0 = k * k * norm;
    let b1 = 2.0 * b0;
    let a1 = 2.0 * (k * k - 1.0) * norm;
    let a2 = (1.0 - k / q + k * k) * norm;
    let scale = (1 << 28) as f64;
    [
        (b0 * scale) as i64,
        (b1 * scale) as i64,
        (b0 * scale) as i64,
        (a1 * scale) as i64,
        (a2 * scale) as i64,
    ]
}

/// Transposed direct form II biquad step.
#[inline(always)]
fn biquad_step(state: &mut [i64; 2], coefs: &[i64; 5], x: i64) -> i64 {
    let y = (coefs[0] * x + state[0]) >> 28;
    state[0] = coefs[1] * x - coefs[3] * y + state[1];
    state[1] = coefs[2] * x - coefs[4] * y;
    y
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn sine(freq_hz: f64, fs_khz: usize, length: usize) -> Vec<i16> {
        (0..length)
            .map(|n| {
                (8000.0 * (2.0 * std::f64::consts::PI * freq_hz * n as f64 / (fs_khz * 1000) as f64)
                    .sin()) as i16
            })
            .collect()
    }

    fn zero_crossings(x: &[i16]) -> usize {
        x.windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count()
    }

    #[test]
    fn test_upsample_preserves_frequency() {
        for &(fs_in, fs_out) in [(16_usize, 48_usize), (8, 48), (12, 48), (8, 24), (16, 24)]
            .iter()
        {
            let mut resampler = Resampler::new(fs_in, fs_out);
            let input = sine(1000.0, fs_in, fs_in * 100);
            let mut output = vec![0_i16; input.len() * fs_out / fs_in];
            let produced = resampler.process(&input, &mut output);
            assert_eq!(produced, output.len());

            // A 1 kHz tone has two zero crossings per millisecond; allow
            // some slack at the edges for the filter startup.
            let expected = 2 * (produced / fs_out);
            let got = zero_crossings(&output);
            assert!(
                (got as i32 - expected as i32).abs() <= 6,
                "{} -> {}: {} crossings, expected {}",
                fs_in,
                fs_out,
                got,
                expected
            );
        }
    }

    #[test]
    fn test_downsample_preserves_frequency() {
        for &(fs_in, fs_out) in [(16_usize, 8_usize), (12, 8), (16, 12)].iter() {
            let mut resampler = Resampler::new(fs_in, fs_out);
            let input = sine(1000.0, fs_in, fs_in * 100);
            let mut output = vec![0_i16; input.len() * fs_out / fs_in];
            let produced = resampler.process(&input, &mut output);
            assert_eq!(produced, output.len());

            let expected = 2 * (produced / fs_out);
            let got = zero_crossings(&output);
            assert!(
                (got as i32 - expected as i32).abs() <= 8,
                "{} -> {}: {} crossings, expected {}",
                fs_in,
                fs_out,
                got,
                expected
            );
        }
    }

    #[test]
    fn test_state_persists_across_frames() {
        // Processing one long frame and two half frames must agree exactly.
        let input = sine(440.0, 16, 960);
        let mut full = Resampler::new(16, 48);
        let mut split = Resampler::new(16, 48);

        let mut out_full = vec![0_i16; 2880];
        full.process(&input, &mut out_full);

        let mut out_split = vec![0_i16; 2880];
        let half = split.process(&input[..480], &mut out_split);
        split.process(&input[480..], &mut out_split[half..]);

        assert_eq!(out_full, out_split);
    }

    #[test]
    fn test_reset_clears_state() {
        let input = sine(440.0, 16, 320);
        let mut a = Resampler::new(16, 48);
        let mut warm = vec![0_i16; 960];
        a.process(&input, &mut warm);
        a.reset();

        let mut b = Resampler::new(16, 48);
        let mut out_a = vec![0_i16; 960];
        let mut out_b = vec![0_i16; 960];
        a.process(&input, &mut out_a);
        b.process(&input, &mut out_b);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_passthrough() {
        let input = sine(440.0, 16, 320);
        let mut resampler = Resampler::new(16, 16);
        let mut output = vec![0_i16; 320];
        assert_eq!(resampler.process(&input, &mut output), 320);
        assert_eq!(output, input);
    }
}
