//! Implements the modified discrete cosine transform.
//!
//! This is a simple MDCT implementation that uses a N/4 complex FFT
//! to do most of the work. The windowed time domain block is folded into
//! half its length, transformed with a DCT-IV expressed over the FFT, and
//! the inverse path mirrors the same steps.
//!
//! The forward transform is scaled by `2 / N` so that a forward/backward
//! pair together with the power complementary window reconstructs the
//! input exactly.

use num_complex::Complex32;

use crate::celt::kiss_fft::KissFft;
use crate::celt::{MAX_LM, SHORT_BLOCKSIZE, WINDOW};

/// The window overlap of every block size.
const OVERLAP: usize = SHORT_BLOCKSIZE;

/// One plan per block size.
struct MdctPlan {
    /// Output bins of this block size.
    m: usize,
    /// Scaled FFT for the forward transform.
    fft_forward: KissFft,
    /// Unscaled FFT for the backward transform.
    fft_backward: KissFft,
    /// Pre rotation, `exp(-i * pi * r / m)`.
    pre: Vec<Complex32>,
    /// Post rotation, `exp(-i * pi * (k + 0.25) / m)`.
    post: Vec<Complex32>,
}

/// Forward and inverse MDCT for all block sizes of the 48 kHz mode.
///
/// The block sizes are the frame sizes 120, 240, 480 and 960, selected with
/// the same `shift` convention as the mode: `m = 960 >> shift`.
pub(crate) struct Mdct {
    plans: Vec<MdctPlan>,
}

impl Mdct {
    pub(crate) fn new() -> Self {
        let plans = (0..=MAX_LM)
            .map(|shift| {
                let m = (SHORT_BLOCKSIZE << MAX_LM) >> shift;
                let nfft = m / 2;
                let pre = (0..nfft)
                    .map(|r| {
                        let phase = -std::f32::consts::PI * r as f32 / m as f32;
                        Complex32::new(phase.cos(), phase.sin())
                    })
                    .collect();
                let post = (0..nfft)
                    .map(|k| {
                        let phase = -std::f32::consts::PI * (k as f32 + 0.25) / m as f32;
                        Complex32::new(phase.cos(), phase.sin())
                    })
                    .collect();
                MdctPlan {
                    m,
                    fft_forward: KissFft::new(nfft, false),
                    fft_backward: KissFft::new_unscaled(nfft),
                    pre,
                    post,
                }
            })
            .collect();
        Self { plans }
    }

    /// The window weight of the conceptual full length block at support
    /// position `s` of a block with `m` bins.
    #[inline(always)]
    fn window_at(m: usize, s: usize) -> f32 {
        if s < OVERLAP {
            WINDOW[s]
        } else if s < m {
            1.0
        } else {
            WINDOW[m + OVERLAP - 1 - s]
        }
    }

    /// Forward MDCT of one block.
    ///
    /// # Arguments
    /// * `shift`  - Selects the block size, `m = 960 >> shift`.
    /// * `input`  - `m + OVERLAP` time samples. The block body is preceded
    ///              and followed by half an overlap of its neighbours.
    /// * `output` - Receives the `m` frequency bins at `output[k * stride]`.
    /// * `stride` - Output stride, the number of interleaved short blocks.
    pub(crate) fn forward(&self, shift: usize, input: &[f32], output: &mut [f32], stride: usize) {
        let plan = &self.plans[shift];
        let m = plan.m;
        let nfft = m / 2;
        debug_assert!(input.len() >= m + OVERLAP);

        // Window and fold the conceptual 2m samples into m.
        let mut t = vec![0.0_f32; m];
        let half_overlap = OVERLAP / 2;
        (0..m / 2).for_each(|n| {
            let s1 = m - 1 - n + half_overlap;
            let a = Self::window_at(m, s1) * input[s1];
            let b = if n < half_overlap {
                let s2 = m + n + half_overlap;
                Self::window_at(m, s2) * input[s2]
            } else {
                0.0
            };
            t[n] = -a - b;
        });
        (m / 2..m).for_each(|n| {
            let s1 = m - 1 - n + half_overlap;
            let a = Self::window_at(m, s1) * input[s1];
            let c = if n >= m - half_overlap {
                let s3 = n + half_overlap - m;
                Self::window_at(m, s3) * input[s3]
            } else {
                0.0
            };
            t[n] = c - a;
        });

        // DCT-IV via the scaled FFT.
        let mut v = vec![Complex32::new(0.0, 0.0); nfft];
        v.iter_mut().enumerate().for_each(|(r, value)| {
            *value = Complex32::new(t[2 * r], t[m - 1 - 2 * r]) * plan.pre[r];
        });
        let mut spectrum = vec![Complex32::new(0.0, 0.0); nfft];
        plan.fft_forward.process(&v, &mut spectrum);

        spectrum.iter().enumerate().for_each(|(k, value)| {
            let rotated = value * plan.post[k];
            output[2 * k * stride] = rotated.re;
            output[(m - 1 - 2 * k) * stride] = -rotated.im;
        });
    }

    /// Inverse MDCT of one block, with windowing and overlap-add.
    ///
    /// # Arguments
    /// * `shift`  - Selects the block size, `m = 960 >> shift`.
    /// * `input`  - The `m` frequency bins at `input[k * stride]`.
    /// * `output` - `m + OVERLAP` samples. The first OVERLAP samples are
    ///              overlap-added onto the existing contents, the rest is
    ///              overwritten. The final OVERLAP samples are the windowed
    ///              tail to be completed by the next block.
    /// * `stride` - Input stride, the number of interleaved short blocks.
    pub(crate) fn backward(&self, shift: usize, input: &[f32], output: &mut [f32], stride: usize) {
        let plan = &self.plans[shift];
        let m = plan.m;
        let nfft = m / 2;
        debug_assert!(output.len() >= m + OVERLAP);

        // Unscaled DCT-IV.
        let mut v = vec![Complex32::new(0.0, 0.0); nfft];
        v.iter_mut().enumerate().for_each(|(r, value)| {
            *value = Complex32::new(input[2 * r * stride], input[(m - 1 - 2 * r) * stride])
                * plan.pre[r];
        });
        let mut spectrum = vec![Complex32::new(0.0, 0.0); nfft];
        plan.fft_backward.process(&v, &mut spectrum);

        let mut t = vec![0.0_f32; m];
        spectrum.iter().enumerate().for_each(|(k, value)| {
            let rotated = value * plan.post[k];
            t[2 * k] = rotated.re;
            t[m - 1 - 2 * k] = -rotated.im;
        });

        // Unfold back to the m + OVERLAP support, apply the synthesis window
        // and overlap-add the head onto the caller's buffer.
        let half_overlap = OVERLAP / 2;
        let mut head = [0.0_f32; OVERLAP];
        (0..m + OVERLAP).for_each(|s| {
            let value = if s < half_overlap {
                t[s + m - half_overlap]
            } else if s < m + half_overlap {
                -t[m - 1 - s + half_overlap]
            } else {
                -t[s - m - half_overlap]
            };
            let windowed = Self::window_at(m, s) * value;
            if s < OVERLAP {
                head[s] = windowed;
            } else {
                output[s] = windowed;
            }
        });
        (0..OVERLAP).for_each(|s| {
            output[s] += head[s];
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;

    use super::*;

    fn random_samples(n: usize, seed: u64) -> Vec<f32> {
        let mut rnd = nanorand::WyRand::new_seed(seed);
        (0..n)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
            .collect()
    }

    /// Forward then backward over a stream of blocks must reconstruct the
    /// input where blocks fully overlap.
    fn round_trip(shift: usize) {
        let mdct = Mdct::new();
        let m = (SHORT_BLOCKSIZE << MAX_LM) >> shift;
        let blocks = 6;
        let input = random_samples(m * blocks + OVERLAP, shift as u64 + 1);

        let mut freq = vec![0.0_f32; m * blocks];
        (0..blocks).for_each(|b| {
            mdct.forward(shift, &input[b * m..], &mut freq[b * m..(b + 1) * m], 1);
        });

        let mut output = vec![0.0_f32; m * blocks + OVERLAP];
        (0..blocks).for_each(|b| {
            mdct.backward(shift, &freq[b * m..(b + 1) * m], &mut output[b * m..], 1);
        });

        // The first block's head and the last block's tail lack a neighbour,
        // everything in between must match.
        (OVERLAP..m * blocks).for_each(|i| {
            assert!(
                (output[i] - input[i]).abs() < 1e-3,
                "shift {}: sample {}: {} != {}",
                shift,
                i,
                output[i],
                input[i]
            );
        });
    }

    #[test]
    fn test_round_trip_long_blocks() {
        round_trip(0);
        round_trip(1);
    }

    #[test]
    fn test_round_trip_short_blocks() {
        round_trip(2);
        round_trip(3);
    }

    #[test]
    fn test_sinusoid_concentrates() {
        let mdct = Mdct::new();
        let m = SHORT_BLOCKSIZE << MAX_LM;
        // A bin centered sinusoid: frequency (k + 0.5) bins.
        let bin = 37;
        let input: Vec<f32> = (0..m + OVERLAP)
            .map(|j| {
                let phase = std::f32::consts::PI / m as f32
                    * (bin as f32 + 0.5)
                    * (j as f32 + 0.5 - (OVERLAP / 2) as f32 + (m / 2) as f32);
                phase.cos()
            })
            .collect();

        let mut freq = vec![0.0_f32; m];
        mdct.forward(0, &input, &mut freq, 1);

        let peak = freq[bin].abs();
        let rest: f32 = freq
            .iter()
            .enumerate()
            .filter(|(k, _)| (*k as i32 - bin as i32).abs() > 2)
            .map(|(_, x)| x * x)
            .sum::<f32>()
            .sqrt();
        assert!(peak > 0.2, "peak = {}", peak);
        assert!(rest < peak, "rest = {}, peak = {}", rest, peak);
    }
}
