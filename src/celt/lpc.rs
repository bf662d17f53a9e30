//! Linear prediction helpers for the packet loss concealment.

/// Prediction order used by the concealment.
pub(crate) const PLC_LPC_ORDER: usize = 24;

/// Windowless autocorrelation of `x` up to `ac.len() - 1` lags.
pub(crate) fn autocorr(x: &[f32], ac: &mut [f32]) {
    let n = x.len();
    ac.iter_mut().enumerate().for_each(|(lag, value)| {
        let mut sum = 0.0;
        (lag..n).for_each(|i| {
            sum += x[i] * x[i - lag];
        });
        *value = sum;
    });
}

/// Levinson-Durbin recursion. The coefficients use the sign convention of
/// the whitening filter: `e[n] = x[n] + sum(lpc[j] * x[n - 1 - j])`.
pub(crate) fn celt_lpc(lpc: &mut [f32], ac: &[f32]) {
    let p = lpc.len();
    lpc.iter_mut().for_each(|c| *c = 0.0);
    let mut error = ac[0];
    if ac[0] == 0.0 {
        return;
    }
    for i in 0..p {
        // Sum up this iteration's reflection coefficient.
        let mut rr = 0.0;
        (0..i).for_each(|j| {
            rr += lpc[j] * ac[i - j];
        });
        rr += ac[i + 1];
        let r = -rr / error;
        // Update LPC coefficients and total error.
        lpc[i] = r;
        (0..(i + 1) >> 1).for_each(|j| {
            let tmp1 = lpc[j];
            let tmp2 = lpc[i - 1 - j];
            lpc[j] = tmp1 + r * tmp2;
            lpc[i - 1 - j] = tmp2 + r * tmp1;
        });
        error -= r * r * error;
        // Bail out once we get 30 dB gain.
        if error < 0.001 * ac[0] {
            break;
        }
    }
}

/// Applies the whitening filter `A(z)` to `x`, writing into `y`.
pub(crate) fn celt_fir(x: &[f32], num: &[f32], y: &mut [f32]) {
    let order = num.len();
    let n = x.len();
    debug_assert!(y.len() >= n);
    (0..n).rev().for_each(|i| {
        let mut sum = x[i];
        (0..order.min(i)).for_each(|j| {
            sum += num[j] * x[i - 1 - j];
        });
        y[i] = sum;
    });
}

/// Applies the synthesis filter `1 / A(z)` in place, with `mem` carrying the
/// filter history (most recent output last).
pub(crate) fn celt_iir_inplace(x: &mut [f32], den: &[f32], mem: &mut [f32]) {
    let order = den.len();
    debug_assert_eq!(mem.len(), order);
    (0..x.len()).for_each(|i| {
        let mut sum = x[i];
        (0..order).for_each(|j| {
            let past = if i > j {
                x[i - 1 - j]
            } else {
                mem[order - 1 - (j - i)]
            };
            sum -= den[j] * past;
        });
        x[i] = sum;
    });
    // Refresh the memory with the last outputs.
    let n = x.len();
    (0..order).for_each(|j| {
        if n > j {
            mem[order - 1 - j] = x[n - 1 - j];
        }
    });
}

/// A compact pitch estimator for concealment: normalized cross correlation
/// over a 2x decimated history, refined at full resolution.
pub(crate) fn pitch_search(history: &[f32], min_period: usize, max_period: usize) -> usize {
    let n = history.len();
    if n < 2 * max_period {
        return min_period;
    }
    let target = &history[n - max_period..];

    // Coarse search on every other lag.
    let mut best_lag = min_period;
    let mut best_score = -1.0_f32;
    let mut lag = min_period;
    while lag <= max_period {
        let past = &history[n - max_period - lag..n - lag];
        let mut xy = 0.0_f32;
        let mut yy = 1e-15_f32;
        let mut i = 0;
        while i < max_period {
            xy += target[i] * past[i];
            yy += past[i] * past[i];
            i += 2;
        }
        let score = xy * xy.abs() / yy;
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
        lag += 2;
    }

    // Refine around the coarse winner.
    let lo = usize::max(min_period, best_lag.saturating_sub(2));
    let hi = usize::min(max_period, best_lag + 2);
    let mut refined = best_lag;
    let mut best_score = -1.0_f32;
    (lo..=hi).for_each(|lag| {
        let past = &history[n - max_period - lag..n - lag];
        let mut xy = 0.0_f32;
        let mut yy = 1e-15_f32;
        target.iter().zip(past.iter()).for_each(|(&a, &b)| {
            xy += a * b;
            yy += b * b;
        });
        let score = xy * xy.abs() / yy;
        if score > best_score {
            best_score = score;
            refined = lag;
        }
    });
    refined
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_lpc_predicts_decaying_exponential() {
        // x[n] = 0.9^n is perfectly predicted by a one tap filter.
        let x: Vec<f32> = (0..256).map(|n| 0.9_f32.powi(n)).collect();
        let mut ac = [0.0_f32; 5];
        autocorr(&x, &mut ac);
        let mut lpc = [0.0_f32; 4];
        celt_lpc(&mut lpc, &ac);
        assert!((lpc[0] + 0.9).abs() < 0.05, "lpc[0] = {}", lpc[0]);
    }

    #[test]
    fn test_fir_iir_are_inverses() {
        use nanorand::RNG;
        let mut rnd = nanorand::WyRand::new_seed(9);
        let x: Vec<f32> = (0..128)
            .map(|_| rnd.generate_range::<u32>(0, 65536) as f32 / 32768.0 - 1.0)
            .collect();
        let lpc = [-0.5_f32, 0.2, -0.1, 0.05];

        let mut white = vec![0.0_f32; 128];
        celt_fir(&x, &lpc, &mut white);
        let mut mem = [0.0_f32; 4];
        celt_iir_inplace(&mut white, &lpc, &mut mem);

        // The first `order` samples differ because of the zero history.
        x.iter().zip(white.iter()).skip(4).for_each(|(a, b)| {
            assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
        });
    }

    #[test]
    fn test_pitch_search_finds_period() {
        let period = 120;
        let history: Vec<f32> = (0..2048)
            .map(|n| (2.0 * std::f32::consts::PI * n as f32 / period as f32).sin())
            .collect();
        let found = pitch_search(&history, 15, 1024);
        // Any multiple of the period correlates perfectly.
        assert!(
            found % period < 3 || period - (found % period) < 3,
            "found {}",
            found
        );
    }
}
