//! Implements the shell coder for the excitation pulses.
//!
//! Each 16 sample block codes the total pulse count, then recursively
//! splits it in half down to single samples, followed by optional LSB
//! refinements and the signs.

use crate::range_coder::RangeDecoder;
use crate::silk::tables::{
    LSB_ICDF, LOG2_SHELL_CODEC_FRAME_LENGTH, MAX_NB_SHELL_BLOCKS, N_RATE_LEVELS,
    PULSES_PER_BLOCK_ICDF, RATE_LEVELS_ICDF, SHELL_CODE_TABLES, SHELL_CODE_TABLE_OFFSETS,
    SHELL_CODEC_FRAME_LENGTH, SIGN_ICDF, SILK_MAX_PULSES,
};

/// Splits `pulses` between two children using the given table.
fn decode_split(
    dec: &mut RangeDecoder<'_>,
    pulses: i32,
    table: &[u8],
) -> (i32, i32) {
    if pulses > 0 {
        let offset = SHELL_CODE_TABLE_OFFSETS[pulses as usize];
        let child1 = dec.decode_icdf(&table[offset..offset + pulses as usize + 1], 8) as i32;
        (child1, pulses - child1)
    } else {
        (0, 0)
    }
}

/// Decodes the pulse positions of one 16 sample shell block.
fn shell_decoder(pulses: &mut [i32], dec: &mut RangeDecoder<'_>, total: i32) {
    debug_assert_eq!(pulses.len(), SHELL_CODEC_FRAME_LENGTH);
    let tables = &*SHELL_CODE_TABLES;

    let p8 = decode_split(dec, total, &tables[3]);
    let p4_0 = decode_split(dec, p8.0, &tables[2]);
    let p2_00 = decode_split(dec, p4_0.0, &tables[1]);
    let p1 = decode_split(dec, p2_00.0, &tables[0]);
    pulses[0] = p1.0;
    pulses[1] = p1.1;
    let p1 = decode_split(dec, p2_00.1, &tables[0]);
    pulses[2] = p1.0;
    pulses[3] = p1.1;
    let p2_01 = decode_split(dec, p4_0.1, &tables[1]);
    let p1 = decode_split(dec, p2_01.0, &tables[0]);
    pulses[4] = p1.0;
    pulses[5] = p1.1;
    let p1 = decode_split(dec, p2_01.1, &tables[0]);
    pulses[6] = p1.0;
    pulses[7] = p1.1;
    let p4_1 = decode_split(dec, p8.1, &tables[2]);
    let p2_10 = decode_split(dec, p4_1.0, &tables[1]);
    let p1 = decode_split(dec, p2_10.0, &tables[0]);
    pulses[8] = p1.0;
    pulses[9] = p1.1;
    let p1 = decode_split(dec, p2_10.1, &tables[0]);
    pulses[10] = p1.0;
    pulses[11] = p1.1;
    let p2_11 = decode_split(dec, p4_1.1, &tables[1]);
    let p1 = decode_split(dec, p2_11.0, &tables[0]);
    pulses[12] = p1.0;
    pulses[13] = p1.1;
    let p1 = decode_split(dec, p2_11.1, &tables[0]);
    pulses[14] = p1.0;
    pulses[15] = p1.1;
}

/// Decodes the full excitation magnitude/sign signal of one frame.
pub(crate) fn decode_pulses(
    dec: &mut RangeDecoder<'_>,
    pulses: &mut [i32],
    signal_type: i32,
    quant_offset_type: i32,
    frame_length: usize,
) {
    // Rate level.
    let rate_level_index =
        dec.decode_icdf(&RATE_LEVELS_ICDF[(signal_type >> 1) as usize], 8) as usize;

    // Number of shell blocks.
    let mut iter = frame_length >> LOG2_SHELL_CODEC_FRAME_LENGTH;
    if iter * SHELL_CODEC_FRAME_LENGTH < frame_length {
        // Only happens for 10 ms frames at 12 kHz.
        debug_assert_eq!(frame_length, 120);
        iter += 1;
    }
    debug_assert!(iter <= MAX_NB_SHELL_BLOCKS);

    // Pulse counts, with the LSB escape.
    let mut sum_pulses = [0_i32; MAX_NB_SHELL_BLOCKS];
    let mut n_lshifts = [0_i32; MAX_NB_SHELL_BLOCKS];
    (0..iter).for_each(|i| {
        n_lshifts[i] = 0;
        sum_pulses[i] = dec.decode_icdf(&PULSES_PER_BLOCK_ICDF[rate_level_index], 8) as i32;
        while sum_pulses[i] == SILK_MAX_PULSES + 1 {
            n_lshifts[i] += 1;
            // When we've already got 10 LSBs, shift the table to not allow
            // another escape.
            let skip = usize::from(n_lshifts[i] == 10);
            sum_pulses[i] =
                dec.decode_icdf(&PULSES_PER_BLOCK_ICDF[N_RATE_LEVELS - 1][skip..], 8) as i32;
        }
    });

    // Shell decoding.
    (0..iter).for_each(|i| {
        let block = &mut pulses[i * SHELL_CODEC_FRAME_LENGTH..(i + 1) * SHELL_CODEC_FRAME_LENGTH];
        if sum_pulses[i] > 0 {
            shell_decoder(block, dec, sum_pulses[i]);
        } else {
            block.iter_mut().for_each(|p| *p = 0);
        }
    });

    // LSBs.
    (0..iter).for_each(|i| {
        if n_lshifts[i] > 0 {
            let n_ls = n_lshifts[i];
            let block =
                &mut pulses[i * SHELL_CODEC_FRAME_LENGTH..(i + 1) * SHELL_CODEC_FRAME_LENGTH];
            block.iter_mut().for_each(|p| {
                let mut abs_q = *p;
                (0..n_ls).for_each(|_| {
                    abs_q <<= 1;
                    abs_q += dec.decode_icdf(&LSB_ICDF, 8) as i32;
                });
                *p = abs_q;
            });
            sum_pulses[i] |= n_ls << 5;
        }
    });

    // Signs.
    decode_signs(
        dec,
        pulses,
        frame_length,
        signal_type,
        quant_offset_type,
        &sum_pulses,
    );
}

/// Attaches signs to the non-zero pulses.
fn decode_signs(
    dec: &mut RangeDecoder<'_>,
    pulses: &mut [i32],
    frame_length: usize,
    signal_type: i32,
    quant_offset_type: i32,
    sum_pulses: &[i32; MAX_NB_SHELL_BLOCKS],
) {
    let group = (7 * (quant_offset_type + (signal_type << 1))) as usize;
    let icdf_base = &SIGN_ICDF[group..group + 7];
    let blocks = (frame_length + SHELL_CODEC_FRAME_LENGTH / 2) >> LOG2_SHELL_CODEC_FRAME_LENGTH;

    let mut icdf = [0_u8; 2];
    (0..blocks).for_each(|i| {
        let p = sum_pulses[i];
        if p > 0 {
            icdf[0] = icdf_base[usize::min((p & 0x1F) as usize, 6)];
            pulses[i * SHELL_CODEC_FRAME_LENGTH..(i + 1) * SHELL_CODEC_FRAME_LENGTH]
                .iter_mut()
                .for_each(|q| {
                    if *q > 0 && dec.decode_icdf(&icdf, 8) == 0 {
                        *q = -*q;
                    }
                });
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use nanorand::RNG;

    /// Decoding arbitrary bytes must always produce a structurally valid
    /// excitation: bounded magnitudes, all blocks filled.
    #[test]
    fn test_decode_from_random_bytes_is_sane() {
        let mut rnd = nanorand::WyRand::new_seed(13);
        (0..200).for_each(|_| {
            let len = rnd.generate_range::<usize>(4, 64);
            let data: Vec<u8> = (0..len)
                .map(|_| rnd.generate_range::<u32>(0, 256) as u8)
                .collect();
            let mut dec = crate::range_coder::RangeDecoder::new(&data);

            let frame_length = 320;
            let mut pulses = vec![0_i32; frame_length];
            decode_pulses(&mut dec, &mut pulses, 2, 0, frame_length);

            pulses.iter().for_each(|&p| {
                assert!(p.abs() <= SILK_MAX_PULSES << 10);
            });
        });
    }

    /// An empty buffer yields the all zero excitation: the range decoder
    /// returns zeros and the zero pulse count path must hold.
    #[test]
    fn test_decode_from_empty_buffer() {
        let data = [0_u8; 2];
        let mut dec = crate::range_coder::RangeDecoder::new(&data);
        let frame_length = 160;
        let mut pulses = vec![99_i32; frame_length];
        decode_pulses(&mut dec, &mut pulses, 0, 0, frame_length);
        // All blocks decoded, no stale values left behind.
        pulses.iter().for_each(|&p| {
            assert!(p.abs() <= SILK_MAX_PULSES << 1);
        });
    }
}
