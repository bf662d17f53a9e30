//! Implements the quantization of the band energies.
//!
//! Energies are coded in the base-2 log domain in two layers: a coarse
//! 6 dB resolution layer using a Laplace model with inter-frame and
//! inter-band prediction, and a fine uniform refinement whose resolution
//! the bit allocation decides per band. Leftover bits at the end of the
//! frame buy one extra halving step for selected bands.

use crate::celt::tables::{
    ALPHA_COEF, BETA_COEF, BETA_INTRA, E_PROB_MODEL, MAX_FINE_BITS, SMALL_ENERGY_ICDF,
};
use crate::celt::MAX_BANDS;
use crate::encoder_error::EncoderError;
use crate::range_coder::{RangeDecoder, RangeEncoder, Tell};

/// Energy floor of a just coded band in the log domain.
const E_MIN: f32 = -9.0;
/// The hard lower clamp of the stored energies.
const E_LOWER_CLAMP: f32 = -28.0;

fn prediction_parameters(lm: usize, intra: bool) -> (f32, f32) {
    if intra {
        (0.0, BETA_INTRA)
    } else {
        (ALPHA_COEF[lm], BETA_COEF[lm])
    }
}

/// Encodes the coarse energy of all coded bands.
///
/// `energies` holds the measured band energies in the log domain with the
/// mean removed; `old` is the prediction state which afterwards holds the
/// quantized energies. The quantization error is returned through `error`
/// for the fine layers.
#[allow(clippy::too_many_arguments)]
pub(crate) fn quant_coarse_energy(
    energies: &[[f32; MAX_BANDS]; 2],
    old: &mut [[f32; MAX_BANDS]; 2],
    error: &mut [[f32; MAX_BANDS]; 2],
    start: usize,
    end: usize,
    intra: bool,
    channels: usize,
    lm: usize,
    budget: u32,
    available_bytes: u32,
    enc: &mut RangeEncoder<'_>,
) -> Result<(), EncoderError> {
    let prob_model = &E_PROB_MODEL[lm][usize::from(intra)];
    let (coef, beta) = prediction_parameters(lm, intra);

    let mut max_decay = 16.0_f32;
    if end - start > 10 {
        max_decay = f32::min(max_decay, 0.125 * available_bytes as f32);
    }

    let mut prev = [0.0_f32; 2];
    for i in start..end {
        for c in 0..channels {
            let x = energies[c][i];
            let old_e = f32::max(E_MIN, old[c][i]);
            let f = x - coef * old_e - prev[c];
            // Rounding to nearest integer here is really important.
            let mut qi = (0.5 + f).floor() as i32;
            let decay_bound = f32::max(E_LOWER_CLAMP, old[c][i] - max_decay);
            // Prevent the energy from going down too quickly (e.g. for
            // bands that have just one bin).
            if qi < 0 && x < decay_bound {
                qi += (decay_bound - x) as i32;
                if qi > 0 {
                    qi = 0;
                }
            }

            // If we don't have enough bits to encode all the energy, just
            // assume something safe.
            let tell = enc.tell();
            let bits_left = budget as i32 - tell as i32 - 3 * channels as i32 * (end - i) as i32;
            if i != start && bits_left < 30 {
                if bits_left < 24 {
                    qi = i32::min(1, qi);
                }
                if bits_left < 16 {
                    qi = i32::max(-1, qi);
                }
            }

            let left = budget as i32 - tell as i32;
            if left >= 15 {
                let pi = 2 * usize::min(i, 20);
                enc.encode_laplace(
                    &mut qi,
                    u32::from(prob_model[pi]) << 7,
                    u32::from(prob_model[pi + 1]) << 6,
                )?;
            } else if left >= 2 {
                qi = i32::max(-1, i32::min(qi, 1));
                enc.encode_icdf(
                    (2 * qi ^ -i32::from(qi < 0)) as usize,
                    &SMALL_ENERGY_ICDF,
                    2,
                )?;
            } else if left >= 1 {
                qi = i32::min(0, qi);
                enc.encode_bit_logp((-qi) as u32, 1)?;
            } else {
                qi = -1;
            }
            error[c][i] = f - qi as f32;

            let q = qi as f32;
            old[c][i] = f32::max(E_LOWER_CLAMP, coef * old_e + prev[c] + q);
            prev[c] += beta * q;
        }
    }
    Ok(())
}

/// Decodes the coarse energy of all coded bands into `old`.
pub(crate) fn unquant_coarse_energy(
    old: &mut [[f32; MAX_BANDS]; 2],
    start: usize,
    end: usize,
    intra: bool,
    channels: usize,
    lm: usize,
    dec: &mut RangeDecoder<'_>,
) {
    let prob_model = &E_PROB_MODEL[lm][usize::from(intra)];
    let (coef, beta) = prediction_parameters(lm, intra);
    let budget = dec.storage_bits();

    let mut prev = [0.0_f32; 2];
    for i in start..end {
        for c in 0..channels {
            let left = budget as i32 - dec.tell() as i32;
            let qi = if left >= 15 {
                let pi = 2 * usize::min(i, 20);
                dec.decode_laplace(
                    u32::from(prob_model[pi]) << 7,
                    u32::from(prob_model[pi + 1]) << 6,
                )
            } else if left >= 2 {
                let q = dec.decode_icdf(&SMALL_ENERGY_ICDF, 2) as i32;
                (q >> 1) ^ -(q & 1)
            } else if left >= 1 {
                -(i32::from(dec.decode_bit_logp(1)))
            } else {
                -1
            };

            let old_e = f32::max(E_MIN, old[c][i]);
            let q = qi as f32;
            old[c][i] = f32::max(E_LOWER_CLAMP, coef * old_e + prev[c] + q);
            prev[c] += beta * q;
        }
    }
}

/// Encodes the fine energy refinement decided by the allocation.
pub(crate) fn quant_fine_energy(
    old: &mut [[f32; MAX_BANDS]; 2],
    error: &mut [[f32; MAX_BANDS]; 2],
    fine_quant: &[i32; MAX_BANDS],
    start: usize,
    end: usize,
    channels: usize,
    enc: &mut RangeEncoder<'_>,
) -> Result<(), EncoderError> {
    for i in start..end {
        if fine_quant[i] <= 0 {
            continue;
        }
        let frac = 1 << fine_quant[i];
        for c in 0..channels {
            let mut q2 = ((error[c][i] + 0.5) * frac as f32).floor() as i32;
            q2 = i32::min(q2, frac - 1);
            q2 = i32::max(q2, 0);
            enc.encode_bits(q2 as u32, fine_quant[i] as u32)?;
            let offset = (q2 as f32 + 0.5) / frac as f32 - 0.5;
            old[c][i] += offset;
            error[c][i] -= offset;
        }
    }
    Ok(())
}

/// Decodes the fine energy refinement.
pub(crate) fn unquant_fine_energy(
    old: &mut [[f32; MAX_BANDS]; 2],
    fine_quant: &[i32; MAX_BANDS],
    start: usize,
    end: usize,
    channels: usize,
    dec: &mut RangeDecoder<'_>,
) {
    for i in start..end {
        if fine_quant[i] <= 0 {
            continue;
        }
        let frac = 1 << fine_quant[i];
        for c in 0..channels {
            let q2 = dec.decode_bits(fine_quant[i] as u32) as i32;
            let offset = (q2 as f32 + 0.5) / frac as f32 - 0.5;
            old[c][i] += offset;
        }
    }
}

/// Spends the last few bits of the frame on one extra halving step for the
/// bands the allocation marked.
#[allow(clippy::too_many_arguments)]
pub(crate) fn quant_energy_finalise(
    old: &mut [[f32; MAX_BANDS]; 2],
    error: &mut [[f32; MAX_BANDS]; 2],
    fine_quant: &[i32; MAX_BANDS],
    fine_priority: &[bool; MAX_BANDS],
    start: usize,
    end: usize,
    channels: usize,
    mut bits_left: i32,
    enc: &mut RangeEncoder<'_>,
) -> Result<(), EncoderError> {
    for prio in 0..2 {
        let wanted = prio == 1;
        for i in start..end {
            if bits_left < channels as i32 {
                break;
            }
            if fine_quant[i] >= MAX_FINE_BITS || fine_priority[i] != wanted {
                continue;
            }
            for c in 0..channels {
                let q2 = i32::from(error[c][i] >= 0.0);
                enc.encode_bits(q2 as u32, 1)?;
                let offset = (q2 as f32 - 0.5) / (1 << (fine_quant[i] + 1)) as f32;
                error[c][i] -= offset;
                old[c][i] += offset;
                bits_left -= 1;
            }
        }
    }
    Ok(())
}

/// Decoder mirror of [`quant_energy_finalise`].
#[allow(clippy::too_many_arguments)]
pub(crate) fn unquant_energy_finalise(
    old: &mut [[f32; MAX_BANDS]; 2],
    fine_quant: &[i32; MAX_BANDS],
    fine_priority: &[bool; MAX_BANDS],
    start: usize,
    end: usize,
    channels: usize,
    mut bits_left: i32,
    dec: &mut RangeDecoder<'_>,
) {
    for prio in 0..2 {
        let wanted = prio == 1;
        for i in start..end {
            if bits_left < channels as i32 {
                break;
            }
            if fine_quant[i] >= MAX_FINE_BITS || fine_priority[i] != wanted {
                continue;
            }
            for c in 0..channels {
                let q2 = dec.decode_bits(1) as i32;
                let offset = (q2 as f32 - 0.5) / (1 << (fine_quant[i] + 1)) as f32;
                old[c][i] += offset;
                bits_left -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use nanorand::RNG;

    use super::*;

    fn random_energies(rnd: &mut nanorand::WyRand) -> [[f32; MAX_BANDS]; 2] {
        let mut energies = [[0.0_f32; MAX_BANDS]; 2];
        energies.iter_mut().for_each(|channel| {
            channel.iter_mut().for_each(|e| {
                *e = rnd.generate_range::<u32>(0, 32) as f32 - 12.0;
            });
        });
        energies
    }

    #[test]
    fn test_coarse_round_trip() {
        let mut rnd = nanorand::WyRand::new_seed(11);
        for &(channels, lm, intra) in [(1, 3, true), (1, 0, false), (2, 2, false), (2, 3, true)]
            .iter()
        {
            let energies = random_energies(&mut rnd);
            let mut enc_state = [[0.0_f32; MAX_BANDS]; 2];
            let mut error = [[0.0_f32; MAX_BANDS]; 2];

            let mut buffer = vec![0_u8; 256];
            let budget = (buffer.len() * 8) as u32;
            let mut enc = RangeEncoder::new(&mut buffer);
            quant_coarse_energy(
                &energies,
                &mut enc_state,
                &mut error,
                0,
                MAX_BANDS,
                intra,
                channels,
                lm,
                budget,
                256,
                &mut enc,
            )
            .unwrap();
            enc.done().unwrap();
            drop(enc);

            let mut dec_state = [[0.0_f32; MAX_BANDS]; 2];
            let mut dec = RangeDecoder::new(&buffer);
            unquant_coarse_energy(&mut dec_state, 0, MAX_BANDS, intra, channels, lm, &mut dec);

            (0..channels).for_each(|c| {
                (0..MAX_BANDS).for_each(|i| {
                    assert!(
                        (enc_state[c][i] - dec_state[c][i]).abs() < 1e-4,
                        "band {} channel {}: {} != {}",
                        i,
                        c,
                        enc_state[c][i],
                        dec_state[c][i]
                    );
                    // Coarse quantization is within half a step plus the
                    // prediction leakage.
                    assert!((enc_state[c][i] - energies[c][i]).abs() < 6.0);
                });
            });
        }
    }

    #[test]
    fn test_fine_refinement_converges() {
        let mut rnd = nanorand::WyRand::new_seed(12);
        let energies = random_energies(&mut rnd);
        let mut enc_state = [[0.0_f32; MAX_BANDS]; 2];
        let mut error = [[0.0_f32; MAX_BANDS]; 2];
        let mut fine_quant = [0_i32; MAX_BANDS];
        fine_quant.iter_mut().for_each(|q| {
            *q = rnd.generate_range::<u32>(0, 5) as i32;
        });

        let mut buffer = vec![0_u8; 512];
        let budget = (buffer.len() * 8) as u32;
        let mut enc = RangeEncoder::new(&mut buffer);
        quant_coarse_energy(
            &energies,
            &mut enc_state,
            &mut error,
            0,
            MAX_BANDS,
            true,
            1,
            3,
            budget,
            512,
            &mut enc,
        )
        .unwrap();
        quant_fine_energy(&mut enc_state, &mut error, &fine_quant, 0, MAX_BANDS, 1, &mut enc)
            .unwrap();
        enc.done().unwrap();
        drop(enc);

        let mut dec_state = [[0.0_f32; MAX_BANDS]; 2];
        let mut dec = RangeDecoder::new(&buffer);
        unquant_coarse_energy(&mut dec_state, 0, MAX_BANDS, true, 1, 3, &mut dec);
        unquant_fine_energy(&mut dec_state, &fine_quant, 0, MAX_BANDS, 1, &mut dec);

        (0..MAX_BANDS).for_each(|i| {
            assert!((enc_state[0][i] - dec_state[0][i]).abs() < 1e-4);
            if fine_quant[i] >= 2 {
                // With fine bits the reconstruction must be tighter than
                // the bare coarse step.
                assert!(
                    (dec_state[0][i] - energies[0][i]).abs() < 1.0,
                    "band {}: {} vs {}",
                    i,
                    dec_state[0][i],
                    energies[0][i]
                );
            }
        });
    }

    #[test]
    fn test_energy_stays_clamped() {
        // Feed energies far below the floor; the state must never fall
        // under the lower clamp.
        let energies = [[-40.0_f32; MAX_BANDS]; 2];
        let mut enc_state = [[0.0_f32; MAX_BANDS]; 2];
        let mut error = [[0.0_f32; MAX_BANDS]; 2];

        let mut buffer = vec![0_u8; 256];
        let budget = (buffer.len() * 8) as u32;
        let mut enc = RangeEncoder::new(&mut buffer);
        quant_coarse_energy(
            &energies,
            &mut enc_state,
            &mut error,
            0,
            MAX_BANDS,
            false,
            1,
            3,
            budget,
            256,
            &mut enc,
        )
        .unwrap();
        enc_state[0].iter().for_each(|&e| {
            assert!(e >= E_LOWER_CLAMP);
        });
    }
}
