//! Implements the CELT transform codec layer.
//!
//! CELT is an MDCT based transform codec. Each frame is split into up to 21
//! frequency bands following a rough approximation of the Bark scale. The
//! band shapes are coded as unit norm pulse vectors, the band energies are
//! coded separately in a log domain, and a dynamic bit allocation distributes
//! the frame budget over both.

#[cfg(feature = "decoder")]
pub(crate) use decoder::CeltDecoder;
#[cfg(feature = "encoder")]
pub(crate) use encoder::CeltEncoder;

pub(crate) mod bands;
pub(crate) mod coder;
#[cfg(feature = "decoder")]
mod comb_filter;
pub(crate) mod cwrs;
#[cfg(feature = "decoder")]
mod decoder;
#[cfg(feature = "encoder")]
mod encoder;
mod kiss_fft;
#[cfg(feature = "decoder")]
mod lpc;
mod mdct;
pub(crate) mod quant_energy;
pub(crate) mod rate;
pub(crate) mod tables;
pub(crate) mod vq;

use once_cell::sync::Lazy;

/// Number of frequency bands of the 48 kHz mode.
pub(crate) const MAX_BANDS: usize = 21;
/// Size of the shortest MDCT block. This is also the window overlap.
pub(crate) const SHORT_BLOCKSIZE: usize = 120;
/// log2 of the largest number of short blocks inside a frame.
pub(crate) const MAX_LM: usize = 3;
/// The longest pitch period the post-filter can use.
pub(crate) const COMBFILTER_MAXPERIOD: usize = 1024;
/// The shortest pitch period the post-filter can use.
pub(crate) const COMBFILTER_MINPERIOD: usize = 15;
/// First order pre-emphasis coefficient of the 48 kHz mode.
pub(crate) const PREEMPHASIS: f32 = 0.85;

/// The band layout of the 48 kHz mode. A band `b` covers the MDCT bins
/// `E_BANDS[b] * M..E_BANDS[b + 1] * M` where `M = 1 << LM`. The unit is
/// one bin of the 2.5 ms frame (200 Hz).
pub(crate) const E_BANDS: [usize; MAX_BANDS + 1] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// Returns the number of MDCT bins band `band` spans at `LM = 0`.
#[inline(always)]
pub(crate) fn band_width(band: usize) -> usize {
    E_BANDS[band + 1] - E_BANDS[band]
}

/// The analysis and synthesis half window. The full window of a block is the
/// rising half, a flat middle section and the mirrored falling half.
///
/// This is the power complementary Vorbis window,
/// `sin(pi/2 * sin(pi/2 * (i + 0.5) / overlap)^2)`.
pub(crate) static WINDOW: Lazy<[f32; SHORT_BLOCKSIZE]> = Lazy::new(|| {
    let mut window = [0.0; SHORT_BLOCKSIZE];
    window.iter_mut().enumerate().for_each(|(i, w)| {
        let x = std::f32::consts::FRAC_PI_2 * (i as f32 + 0.5) / SHORT_BLOCKSIZE as f32;
        *w = (std::f32::consts::FRAC_PI_2 * x.sin() * x.sin()).sin();
    });
    window
});

/// The last band coded for each bandwidth, in order narrowband, mediumband,
/// wideband, superwideband and fullband.
pub(crate) const BANDWIDTH_END_BANDS: [usize; 5] = [13, 17, 17, 19, 21];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_power_complementary() {
        (0..SHORT_BLOCKSIZE).for_each(|i| {
            let rising = WINDOW[i];
            let falling = WINDOW[SHORT_BLOCKSIZE - 1 - i];
            let sum = rising * rising + falling * falling;
            assert!((sum - 1.0).abs() < 1e-6, "i = {}, sum = {}", i, sum);
        });
    }

    #[test]
    fn test_band_geometry() {
        assert_eq!(E_BANDS[MAX_BANDS], 100);
        (0..MAX_BANDS).for_each(|b| {
            assert!(band_width(b) > 0);
        });
        // A fullband 20 ms frame covers 800 of the 960 bins.
        let covered: usize = (0..MAX_BANDS).map(|b| band_width(b) << MAX_LM).sum();
        assert_eq!(covered, 800);
    }
}
