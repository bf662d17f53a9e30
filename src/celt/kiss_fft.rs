//! Implements the FFT used for the MDCT.

use num_complex::Complex32;
use num_traits::Zero;

/// A mixed-radix Fast Fourier Transform based up on the principle, "Keep It Simple, Stupid."
///
/// This code is originally from Mark Borgerding's KISS-FFT but has been
/// heavily modified to better suit Opus. Only the radices 2, 3, 4 and 5 are
/// needed, since every MDCT size of the 48 kHz mode factors into them.
pub(crate) struct KissFft {
    n: usize,
    /// Radix of each decimation stage, innermost last.
    factors: Vec<usize>,
    /// `exp(-2i * pi * k / n)` for the forward transform, conjugated for the
    /// inverse transform.
    twiddles: Vec<Complex32>,
    /// Scaling applied while reading the input. The forward transform is
    /// scaled by `1 / n` so that a forward/inverse pair is the identity.
    scale: f32,
}

impl KissFft {
    /// Creates a transform plan for the given size.
    ///
    /// The size must factor into the radices 2, 3, 4 and 5.
    pub(crate) fn new(n: usize, inverse: bool) -> Self {
        let mut factors = Vec::new();
        let mut remaining = n;
        // Prefer radix 4 like the original, then sweep up the rest.
        for p in [4_usize, 2, 3, 5].iter().copied() {
            while remaining % p == 0 {
                remaining /= p;
                factors.push(p);
            }
        }
        debug_assert!(remaining == 1, "FFT size must be 2^a * 3^b * 5^c");

        let sign = if inverse { 2.0 } else { -2.0 };
        let twiddles = (0..n)
            .map(|k| {
                let phase = sign * std::f32::consts::PI * k as f32 / n as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();

        let scale = if inverse { 1.0 } else { 1.0 / n as f32 };

        Self {
            n,
            factors,
            twiddles,
            scale,
        }
    }

    /// Creates a forward plan without the `1 / n` scaling.
    pub(crate) fn new_unscaled(n: usize) -> Self {
        let mut fft = Self::new(n, false);
        fft.scale = 1.0;
        fft
    }

    /// The transform size.
    pub(crate) fn len(&self) -> usize {
        self.n
    }

    /// Transforms `input` into `output`. Both must be `n` long.
    pub(crate) fn process(&self, input: &[Complex32], output: &mut [Complex32]) {
        debug_assert_eq!(input.len(), self.n);
        debug_assert_eq!(output.len(), self.n);
        self.work(output, input, 1, 1, &self.factors);
    }

    /// Recursive decimation in time.
    ///
    /// Splits the input into `p` interleaved sub-transforms of size `m`,
    /// transforms them into consecutive blocks of the output and merges the
    /// blocks with a generic butterfly.
    fn work(
        &self,
        out: &mut [Complex32],
        input: &[Complex32],
        in_stride: usize,
        fstride: usize,
        factors: &[usize],
    ) {
        let p = factors[0];
        let m = out.len() / p;

        if m == 1 {
            out.iter_mut().enumerate().for_each(|(q, o)| {
                *o = input[q * in_stride] * self.scale;
            });
        } else {
            (0..p).for_each(|q| {
                self.work(
                    &mut out[q * m..(q + 1) * m],
                    &input[q * in_stride..],
                    in_stride * p,
                    fstride * p,
                    &factors[1..],
                );
            });
        }

        // Merge the p blocks of length m.
        let mut scratch = [Complex32::zero(); 5];
        (0..m).for_each(|u| {
            (0..p).for_each(|q| {
                scratch[q] = out[u + q * m];
            });
            let mut k = u;
            (0..p).for_each(|_| {
                let mut acc = scratch[0];
                let mut twidx = 0;
                (1..p).for_each(|q| {
                    twidx += fstride * k;
                    while twidx >= self.n {
                        twidx -= self.n;
                    }
                    acc += scratch[q] * self.twiddles[twidx];
                });
                out[k] = acc;
                k += m;
            });
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;
    use num_complex::Complex32;

    use super::*;

    /// Slow direct DFT used as the ground truth.
    fn dft(input: &[Complex32], inverse: bool) -> Vec<Complex32> {
        let n = input.len();
        let sign = if inverse { 2.0 } else { -2.0 };
        (0..n)
            .map(|k| {
                let mut acc = Complex32::new(0.0, 0.0);
                input.iter().enumerate().for_each(|(j, x)| {
                    let phase = sign * std::f32::consts::PI * (j * k % n) as f32 / n as f32;
                    acc += x * Complex32::new(phase.cos(), phase.sin());
                });
                if inverse {
                    acc
                } else {
                    acc / n as f32
                }
            })
            .collect()
    }

    fn random_signal(n: usize, seed: u64) -> Vec<Complex32> {
        let mut rnd = nanorand::WyRand::new_seed(seed);
        (0..n)
            .map(|_| {
                let re = rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0;
                let im = rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0;
                Complex32::new(re, im)
            })
            .collect()
    }

    #[test]
    fn test_matches_direct_dft() {
        [30, 60, 120, 240, 480].iter().for_each(|&n| {
            let input = random_signal(n, 42);
            let expected = dft(&input, false);

            let fft = KissFft::new(n, false);
            let mut output = vec![Complex32::new(0.0, 0.0); n];
            fft.process(&input, &mut output);

            output.iter().zip(expected.iter()).for_each(|(got, want)| {
                assert!(
                    (got - want).norm() < 1e-3,
                    "size {}: {} != {}",
                    n,
                    got,
                    want
                );
            });
        });
    }

    #[test]
    fn test_round_trip() {
        [60, 120, 240].iter().for_each(|&n| {
            let input = random_signal(n, 7);
            let fft = KissFft::new(n, false);
            let ifft = KissFft::new(n, true);

            let mut freq = vec![Complex32::new(0.0, 0.0); n];
            let mut back = vec![Complex32::new(0.0, 0.0); n];
            fft.process(&input, &mut freq);
            ifft.process(&freq, &mut back);

            input.iter().zip(back.iter()).for_each(|(x, y)| {
                assert!((x - y).norm() < 1e-3);
            });
        });
    }
}
