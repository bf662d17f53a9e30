//! Probability models and codebooks of the Silk layer.
//!
//! All distributions are in the "inverse" CDF form the range coder consumes:
//! monotonically non-increasing, last entry zero, resolution 8 bits.

use once_cell::sync::Lazy;

/// Number of quantization levels for the subframe gains.
pub(crate) const N_LEVELS_QGAIN: i32 = 64;
/// Largest admissible gain delta index.
pub(crate) const MAX_DELTA_GAIN_QUANT: i32 = 36;
pub(crate) const MIN_DELTA_GAIN_QUANT: i32 = -4;

/// Samples per shell coder block.
pub(crate) const SHELL_CODEC_FRAME_LENGTH: usize = 16;
pub(crate) const LOG2_SHELL_CODEC_FRAME_LENGTH: usize = 4;
/// The largest pulse count the block tables carry before LSB extension.
pub(crate) const SILK_MAX_PULSES: i32 = 16;
pub(crate) const N_RATE_LEVELS: usize = 10;
pub(crate) const MAX_NB_SHELL_BLOCKS: usize = 8;

/// Order of the long term predictor.
pub(crate) const LTP_ORDER: usize = 5;
/// Largest short term prediction order.
pub(crate) const MAX_LPC_ORDER: usize = 16;
pub(crate) const MIN_LPC_ORDER: usize = 10;

/// Pitch lag limits in milliseconds.
pub(crate) const PE_MIN_LAG_MS: usize = 2;
pub(crate) const PE_MAX_LAG_MS: usize = 18;

/// Stereo prediction interpolation duration.
pub(crate) const STEREO_INTERP_LEN_MS: usize = 8;

/// Per frame header: signal type and quantization offset, conditioned on
/// the VAD flag.
pub(crate) const TYPE_OFFSET_VAD_ICDF: [u8; 4] = [232, 158, 10, 0];
pub(crate) const TYPE_OFFSET_NO_VAD_ICDF: [u8; 2] = [230, 0];

/// Most significant bits of the first gain index, by signal type.
pub(crate) const GAIN_ICDF: [[u8; 8]; 3] = [
    [224, 112, 44, 15, 3, 2, 1, 0],
    [254, 237, 192, 132, 70, 23, 4, 0],
    [255, 252, 226, 155, 61, 11, 2, 0],
];

/// Delta coded gain indices.
pub(crate) const DELTA_GAIN_ICDF: [u8; 41] = [
    250, 245, 234, 203, 71, 50, 42, 38, 35, 33, 31, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19,
    18, 17, 16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
];

/// Uniform distributions of various sizes.
pub(crate) const UNIFORM3_ICDF: [u8; 3] = [171, 85, 0];
pub(crate) const UNIFORM4_ICDF: [u8; 4] = [192, 128, 64, 0];
pub(crate) const UNIFORM5_ICDF: [u8; 5] = [205, 154, 102, 51, 0];
pub(crate) const UNIFORM6_ICDF: [u8; 6] = [213, 171, 128, 85, 43, 0];
pub(crate) const UNIFORM8_ICDF: [u8; 8] = [224, 192, 160, 128, 96, 64, 32, 0];

/// LBRR flags for 40 and 60 ms packets (joint distribution over the
/// per frame bits, minus the all-zero word).
pub(crate) const LBRR_FLAGS_2_ICDF: [u8; 3] = [203, 150, 0];
pub(crate) const LBRR_FLAGS_3_ICDF: [u8; 7] = [215, 195, 166, 125, 110, 82, 0];

/// Interpolation weight of the first half NLSFs of 20 ms frames.
pub(crate) const NLSF_INTERPOLATION_FACTOR_ICDF: [u8; 5] = [243, 221, 192, 181, 0];

/// Extension of saturated NLSF stage-2 indices.
pub(crate) const NLSF_EXT_ICDF: [u8; 7] = [100, 40, 16, 7, 3, 1, 0];

/// Stage-2 residual levels fit into `[-4, 4]` before extension.
pub(crate) const NLSF_QUANT_MAX_AMPLITUDE: i32 = 4;

/// Rate level of the excitation, by signal type (unvoiced/voiced).
pub(crate) const RATE_LEVELS_ICDF: [[u8; 9]; 2] = [
    [241, 190, 178, 132, 87, 74, 41, 14, 0],
    [223, 193, 157, 140, 106, 57, 39, 18, 0],
];

/// Sum of pulses per shell block, by rate level. Symbol 17 escapes into the
/// LSB extension.
pub(crate) const PULSES_PER_BLOCK_ICDF: [[u8; 18]; N_RATE_LEVELS] = [
    [
        255, 254, 252, 249, 244, 235, 221, 199, 169, 132, 94, 60, 35, 19, 10, 5, 2, 0,
    ],
    [
        254, 251, 245, 233, 212, 182, 144, 104, 69, 42, 24, 13, 7, 4, 2, 1, 1, 0,
    ],
    [
        253, 247, 236, 215, 183, 140, 98, 62, 36, 20, 11, 6, 3, 2, 1, 1, 1, 0,
    ],
    [
        250, 240, 220, 186, 141, 97, 60, 35, 19, 10, 5, 3, 2, 1, 1, 1, 1, 0,
    ],
    [
        245, 228, 196, 150, 101, 62, 35, 19, 10, 5, 3, 2, 1, 1, 1, 1, 1, 0,
    ],
    [
        238, 211, 167, 115, 71, 40, 21, 11, 6, 3, 2, 1, 1, 1, 1, 1, 1, 0,
    ],
    [
        228, 191, 137, 87, 49, 26, 13, 7, 4, 2, 1, 1, 1, 1, 1, 1, 1, 0,
    ],
    [
        215, 167, 109, 63, 33, 17, 9, 4, 2, 1, 1, 1, 1, 1, 1, 1, 1, 0,
    ],
    [
        199, 142, 85, 45, 22, 11, 5, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 0,
    ],
    [
        180, 117, 64, 32, 15, 7, 4, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0,
    ],
];

/// LSB refinement bit.
pub(crate) const LSB_ICDF: [u8; 2] = [120, 0];

/// Sign probability by signal type, quantization offset and pulse count.
pub(crate) const SIGN_ICDF: [u8; 42] = [
    // Inactive, low offset.
    254, 124, 110, 101, 98, 97, 97, // Inactive, high offset.
    210, 108, 104, 101, 100, 99, 98, // Unvoiced, low offset.
    220, 110, 105, 101, 99, 98, 98, // Unvoiced, high offset.
    190, 108, 103, 100, 99, 98, 98, // Voiced, low offset.
    132, 104, 101, 100, 99, 99, 98, // Voiced, high offset.
    120, 102, 100, 99, 98, 98, 97,
];

/// Offsets into the shell split tables, by parent pulse count.
pub(crate) const SHELL_CODE_TABLE_OFFSETS: [usize; SILK_MAX_PULSES as usize + 1] = [
    0, 0, 2, 5, 9, 14, 20, 27, 35, 44, 54, 65, 77, 90, 104, 119, 135,
];

/// Builds one shell split table: for every parent pulse count `p`, the
/// distribution of how many of the `p` pulses land in the first half. The
/// underlying model is a binomial sharpened towards the center for the
/// wider splits.
fn build_shell_table(sharpness: u32) -> Vec<u8> {
    let mut table = Vec::with_capacity(152);
    (1..=SILK_MAX_PULSES as usize).for_each(|p| {
        // Binomial weights C(p, k), sharpened.
        let mut weights = vec![0_u64; p + 1];
        let mut c: u64 = 1;
        (0..=p).for_each(|k| {
            weights[k] = c.pow(sharpness);
            c = c * (p - k) as u64 / (k + 1) as u64;
        });
        let total: u64 = weights.iter().sum();

        // Convert to an inverse CDF with every symbol kept codable.
        let mut cum = 0_u64;
        let mut icdf = vec![0_u8; p + 1];
        (0..=p).for_each(|k| {
            cum += weights[k];
            let remaining = (256 - (cum * 256 / total) as i32).clamp(0, 255) as u8;
            icdf[k] = remaining.max((p - k) as u8);
        });
        icdf[p] = 0;
        // Enforce strict monotonicity so every symbol has probability mass.
        (0..p).rev().for_each(|k| {
            if icdf[k] <= icdf[k + 1] {
                icdf[k] = icdf[k + 1] + 1;
            }
        });
        table.extend_from_slice(&icdf);
    });
    table
}

/// The four shell split tables, from the two sample leaves up to the
/// sixteen sample root.
pub(crate) static SHELL_CODE_TABLES: Lazy<[Vec<u8>; 4]> = Lazy::new(|| {
    [
        build_shell_table(1),
        build_shell_table(1),
        build_shell_table(2),
        build_shell_table(2),
    ]
});

/// Excitation quantization offsets in Q10, by signal type and offset type.
pub(crate) const QUANTIZATION_OFFSETS_Q10: [[i32; 2]; 2] = [[100, 240], [32, 100]];
pub(crate) const QUANT_LEVEL_ADJUST_Q10: i32 = 80;

/// Primary pitch lag, most significant part.
pub(crate) const PITCH_LAG_ICDF: [u8; 32] = [
    253, 250, 244, 233, 212, 182, 150, 131, 120, 110, 98, 85, 72, 60, 49, 40, 32, 25, 19, 15, 13,
    11, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
];

/// Pitch contour codebook selection, 20 ms narrowband.
pub(crate) const PITCH_CONTOUR_NB_ICDF: [u8; 11] = [223, 201, 160, 117, 100, 73, 61, 45, 26, 9, 0];
/// Pitch contour, 20 ms medium/wideband.
pub(crate) const PITCH_CONTOUR_ICDF: [u8; 34] = [
    249, 244, 239, 231, 221, 211, 199, 187, 175, 163, 151, 138, 125, 112, 99, 86, 73, 61, 50, 40,
    32, 25, 19, 15, 12, 10, 8, 6, 5, 4, 3, 2, 1, 0,
];
/// Pitch contour, 10 ms narrowband.
pub(crate) const PITCH_CONTOUR_10_MS_NB_ICDF: [u8; 3] = [165, 64, 0];
/// Pitch contour, 10 ms medium/wideband.
pub(crate) const PITCH_CONTOUR_10_MS_ICDF: [u8; 12] =
    [230, 188, 159, 134, 111, 90, 71, 54, 38, 24, 11, 0];

/// Delta coded pitch lag of the later frames in a packet.
pub(crate) const PITCH_DELTA_ICDF: [u8; 21] = [
    176, 169, 158, 144, 122, 96, 81, 71, 61, 52, 43, 34, 26, 19, 14, 10, 7, 5, 3, 1, 0,
];

/// Subframe lag offsets around the primary lag: 20 ms narrowband.
pub(crate) const CB_LAGS_STAGE2: [[i8; 11]; 4] = [
    [0, 2, -1, -1, -1, 0, 0, 1, 1, 0, 1],
    [0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0],
    [0, 0, 1, 0, 0, 0, 1, 0, 1, 1, 0],
    [0, -1, 2, 1, 0, 1, 1, 1, 0, 2, 2],
];
/// 10 ms narrowband.
pub(crate) const CB_LAGS_STAGE2_10_MS: [[i8; 3]; 2] = [[0, 1, 0], [0, 0, 1]];
/// 20 ms medium/wideband.
pub(crate) const CB_LAGS_STAGE3: [[i8; 34]; 4] = [
    [
        0, 0, 1, -1, 0, 1, -1, 0, -1, 1, -2, 2, -2, -2, 2, -3, 2, 3, -3, -4, 3, -4, 4, 4, -5, 5,
        -6, -5, 6, -7, 6, 5, 8, -9,
    ],
    [
        0, 0, 1, 0, 0, 0, 0, 0, 0, 0, -1, 1, 0, 0, 1, -1, 0, 1, -1, -1, 1, -1, 2, 1, -1, 2, -2,
        -2, 2, -2, 2, 2, 3, -3,
    ],
    [
        0, 1, 0, 0, 1, 0, 1, -1, 2, -1, 2, -1, 2, 3, -2, 3, -2, -2, 4, 4, -3, 5, -4, -4, 5, -4,
        6, 5, -5, 8, -6, -5, -7, 9,
    ],
    [
        0, 1, 0, 1, 2, 1, 2, 2, 4, 3, 5, 4, 5, 6, 5, 8, 6, 7, 9, 9, 10, 11, 11, 12, 13, 14, 15,
        16, 16, 18, 19, 20, 21, 22,
    ],
];
/// 10 ms medium/wideband.
pub(crate) const CB_LAGS_STAGE3_10_MS: [[i8; 12]; 2] = [
    [0, 0, 1, -1, 1, -1, 2, -2, 2, -2, 3, -3],
    [0, 1, 0, 1, 1, -1, 2, -1, 2, -1, 3, 0],
];

/// LTP filter codebook selection.
pub(crate) const LTP_PER_INDEX_ICDF: [u8; 3] = [179, 99, 0];

/// LTP filter index, per codebook size.
pub(crate) const LTP_GAIN_ICDF_0: [u8; 8] = [241, 225, 211, 199, 187, 175, 113, 0];
pub(crate) const LTP_GAIN_ICDF_1: [u8; 16] = [
    210, 190, 178, 157, 135, 116, 100, 80, 67, 56, 47, 36, 27, 18, 9, 0,
];
pub(crate) const LTP_GAIN_ICDF_2: [u8; 32] = [
    223, 209, 199, 191, 183, 176, 168, 161, 154, 148, 141, 135, 128, 121, 114, 108, 102, 96, 89,
    83, 77, 71, 65, 58, 52, 46, 39, 32, 26, 20, 12, 0,
];

/// LTP filter taps in Q7, per codebook.
pub(crate) const LTP_VQ_Q7_0: [[i8; LTP_ORDER]; 8] = [
    [4, 6, 24, 7, 5],
    [0, 0, 2, 0, 0],
    [12, 28, 41, 13, -4],
    [-9, 15, 42, 25, 14],
    [1, -2, 62, 41, -9],
    [-10, 37, 65, -4, 3],
    [-6, 4, 66, 7, -8],
    [16, 14, 38, -3, 33],
];
pub(crate) const LTP_VQ_Q7_1: [[i8; LTP_ORDER]; 16] = [
    [13, 22, 39, 23, 12],
    [-1, 36, 64, 27, -6],
    [-7, 10, 55, 43, 17],
    [1, 1, 8, 1, 1],
    [6, -11, 74, 53, -9],
    [-12, 55, 76, -12, 8],
    [-3, 3, 93, 27, -4],
    [26, 39, 59, 3, -8],
    [2, 0, 77, 11, 9],
    [-8, 22, 44, -6, 7],
    [40, 9, 26, 3, 9],
    [-7, 20, 101, -7, 4],
    [3, -8, 42, 26, 0],
    [-15, 33, 68, 2, 23],
    [-2, 55, 46, -2, 15],
    [3, -1, 21, 16, 41],
];
pub(crate) const LTP_VQ_Q7_2: [[i8; LTP_ORDER]; 32] = [
    [-6, 27, 61, 39, 5],
    [-11, 42, 88, 4, 1],
    [-2, 60, 65, 6, -4],
    [-1, -5, 73, 56, 1],
    [-9, 19, 94, 29, -9],
    [0, 12, 99, 6, 4],
    [8, -19, 102, 46, -13],
    [3, 2, 13, 3, 2],
    [9, -21, 84, 72, -18],
    [-11, 46, 104, -22, 8],
    [18, 38, 48, 23, 0],
    [-16, 70, 83, -21, 11],
    [5, -11, 117, 22, -8],
    [-6, 23, 117, -12, 3],
    [3, -8, 95, 28, 4],
    [-10, 15, 77, 60, -15],
    [-1, 4, 124, 2, -4],
    [3, 38, 84, 24, -25],
    [2, 13, 42, 13, 31],
    [21, -4, 56, 46, -1],
    [-1, 35, 79, -13, 19],
    [-7, 65, 88, -9, -14],
    [20, 4, 81, 49, -29],
    [20, 0, 75, 3, -17],
    [5, -9, 44, 92, -8],
    [1, -3, 22, 69, 31],
    [-6, 95, 41, -12, 5],
    [39, 67, 16, -4, 1],
    [0, -6, 120, 55, -36],
    [-13, 44, 122, 4, -24],
    [81, 5, 11, 3, 7],
    [2, 0, 9, 10, 88],
];

/// LTP scaling selection and values.
pub(crate) const LTP_SCALE_ICDF: [u8; 3] = [128, 64, 0];
pub(crate) const LTP_SCALES_TABLE_Q14: [i32; 3] = [15565, 12288, 8192];

/// Stereo weight codebook in Q13.
pub(crate) const STEREO_PRED_QUANT_Q13: [i32; 16] = [
    -13732, -10050, -8266, -7526, -6500, -5000, -2950, -820, 820, 2950, 5000, 6500, 7526, 8266,
    10050, 13732,
];
/// Joint distribution of the two stereo weight MSB indices.
pub(crate) const STEREO_PRED_JOINT_ICDF: [u8; 25] = [
    249, 247, 246, 245, 244, 234, 210, 202, 201, 200, 197, 174, 82, 59, 56, 55, 54, 46, 22, 14,
    13, 12, 11, 9, 0,
];
/// Mid-only flag of a stereo packet.
pub(crate) const STEREO_ONLY_CODE_MID_ICDF: [u8; 2] = [64, 0];
pub(crate) const STEREO_QUANT_SUB_STEPS: i32 = 5;

/// Cosine table for the NLSF to LPC conversion: `cos(pi * i / 128)` in Q12.
pub(crate) static LSF_COS_TAB_Q12: Lazy<[i32; 129]> = Lazy::new(|| {
    let mut table = [0_i32; 129];
    table.iter_mut().enumerate().for_each(|(i, value)| {
        *value = (f64::cos(std::f64::consts::PI * i as f64 / 128.0) * 4096.0).round() as i32;
    });
    table
});

/// NLSF codebook for narrowband and mediumband, order 10.
pub(crate) struct NlsfCodebook {
    pub(crate) n_vectors: usize,
    pub(crate) order: usize,
    pub(crate) quant_step_size_q16: i32,
    pub(crate) inv_quant_step_size_q6: i32,
    pub(crate) cb1_nlsf_q8: &'static [u8],
    pub(crate) cb1_icdf: &'static [u8],
    pub(crate) pred_q8: &'static [u8],
    pub(crate) ec_sel: &'static [u8],
    pub(crate) ec_icdf: &'static [u8],
    pub(crate) delta_min_q15: &'static [i32],
}

#[rustfmt::skip]
const NLSF_CB1_NB_MB_Q8: [u8; 320] = [
     12,  35,  60,  83, 108, 132, 157, 180, 206, 228,
     15,  32,  55,  77, 101, 125, 151, 175, 201, 225,
     19,  42,  66,  89, 114, 137, 162, 184, 209, 230,
     12,  25,  50,  72,  97, 120, 147, 172, 200, 223,
     26,  44,  69,  90, 114, 135, 159, 180, 205, 225,
     13,  22,  53,  80, 106, 130, 156, 180, 205, 228,
     15,  25,  44,  64,  90, 115, 142, 168, 196, 222,
     19,  24,  62,  82, 100, 120, 145, 168, 190, 214,
     22,  31,  50,  79, 103, 120, 151, 170, 203, 227,
     21,  29,  45,  65,  106, 124, 150, 171, 196, 224,
     30,  49,  75,  97, 121, 142, 165, 186, 209, 229,
     19,  25,  52,  70,  93, 116, 143, 166, 192, 219,
     26,  34,  62,  75, 97, 118, 145, 167, 194, 217,
     25,  33,  56,  70,  91, 113, 143, 165, 196, 223,
     21,  34,  51,  72, 97, 117, 145, 171, 196, 222,
     20,  29,  50,  67,  90, 117, 144, 168, 197, 221,
     22,  31,  48,  66,  95, 117, 146, 168, 196, 222,
     24,  33,  51,  77,  116, 134, 158, 180, 200, 224,
     21,  28,  70,  87, 106, 124, 149, 170, 194, 217,
     26,  33,  53,  64, 83, 117, 152, 173, 204, 225,
     27,  34,  65,  95, 108, 129, 155, 174, 210, 225,
     20,  26,  72, 99, 113, 131, 154, 176, 200, 219,
     34,  43,  61,  78, 93, 114, 155, 177, 205, 229,
     23,  29,  54,  97, 124, 138, 163, 179, 209, 229,
     30,  38,  56,  89, 118, 129, 158, 178, 200, 231,
     21,  29,  49,  63, 85, 111, 142, 163, 193, 222,
     27,  48,  77, 103, 133, 158, 179, 196, 215, 232,
     29,  47,  74,  99, 124, 151, 176, 198, 220, 237,
     33,  42,  61,  76,  93, 121, 155, 174, 207, 225,
     29,  53,  87, 112, 136, 154, 170, 188, 208, 227,
     24,  30,  52,  84, 131, 150, 166, 186, 203, 229,
     37,  48,  64,  84, 104, 118, 156, 177, 201, 230,
];

#[rustfmt::skip]
const NLSF_CB1_ICDF_NB_MB: [u8; 64] = [
    // Voiced half.
    212, 178, 148, 129, 108, 96, 85, 82, 79, 77, 61, 59, 57, 56, 51, 49,
    48, 45, 42, 41, 40, 38, 36, 34, 31, 30, 21, 12, 10, 3, 1, 0,
    // Unvoiced half.
    223, 193, 166, 141, 125, 110, 100, 91, 83, 78, 64, 53, 52, 50, 48, 47,
    46, 45, 43, 42, 40, 38, 36, 35, 33, 31, 25, 18, 10, 3, 1, 0,
];

#[rustfmt::skip]
const NLSF_PRED_NB_MB_Q8: [u8; 18] = [
    179, 138, 140, 148, 151, 149, 153, 151, 163,
    116, 67, 82, 59, 92, 72, 100, 89, 92,
];

#[rustfmt::skip]
const NLSF_EC_SEL_NB_MB: [u8; 160] = [
     16,  35,  50,  51,  52,  16,  33,  50,  51,  52,  16,  51,  50,  51,  52,
     16,  17,  50,  51,  52,  32,  51,  50,  51,  52,  16,  17,  50,  51,  52,
     16,  17,  34,  51,  52,  16,  49,  50,  51,  52,  16,  17,  50,  51,  52,
     16,  17,  50,  51,  52,  32,  33,  50,  51,  52,  16,  17,  50,  51,  52,
     16,  17,  50,  51,  52,  16,  33,  50,  51,  52,  16,  17,  50,  51,  52,
     16,  17,  50,  51,  52,  16,  17,  50,  51,  52,  16,  35,  50,  51,  52,
     16,  17,  50,  51,  52,  16,  17,  50,  51,  52,  32,  17,  50,  51,  52,
     16,  17,  50,  51,  52,  16,  17,  50,  51,  52,  16,  33,  50,  51,  52,
     16,  17,  50,  51,  52,  16,  17,  50,  51,  52,  16,  17,  50,  51,  52,
     16,  35,  50,  51,  52,  16,  17,  50,  51,  52,  16,  17,  50,  51,  52,
     32,  17,  50,  51,  52,  16,  17,  50,  51,  52,
];

#[rustfmt::skip]
const NLSF_EC_ICDF_NB_MB: [u8; 72] = [
    // Eight stage-2 distributions over [-4, 4].
    254, 249, 235, 180,  72,  26,  9,  3, 0,
    253, 245, 220, 158,  82,  35, 13,  4, 0,
    253, 244, 215, 144,  72,  26,  9,  2, 0,
    254, 248, 231, 168,  74,  23,  8,  2, 0,
    254, 249, 236, 186,  94,  34, 12,  3, 0,
    252, 241, 208, 133,  66,  27, 10,  3, 0,
    255, 251, 240, 202, 126,  52, 18,  5, 0,
    255, 253, 246, 220, 158,  80, 26,  6, 0,
];

const NLSF_DELTA_MIN_NB_MB_Q15: [i32; 11] = [250, 3, 6, 3, 3, 3, 4, 3, 3, 3, 461];

pub(crate) const NLSF_CB_NB_MB: NlsfCodebook = NlsfCodebook {
    n_vectors: 32,
    order: 10,
    quant_step_size_q16: 7209,     // 0.11
    inv_quant_step_size_q6: 582,   // 1 / 0.11
    cb1_nlsf_q8: &NLSF_CB1_NB_MB_Q8,
    cb1_icdf: &NLSF_CB1_ICDF_NB_MB,
    pred_q8: &NLSF_PRED_NB_MB_Q8,
    ec_sel: &NLSF_EC_SEL_NB_MB,
    ec_icdf: &NLSF_EC_ICDF_NB_MB,
    delta_min_q15: &NLSF_DELTA_MIN_NB_MB_Q15,
};

#[rustfmt::skip]
const NLSF_CB1_WB_Q8: [u8; 512] = [
      7,  23,  38,  54,  69,  85, 100, 116, 131, 147, 162, 178, 193, 208, 223, 239,
     13,  25,  41,  55,  69,  83,  98, 112, 127, 142, 157, 171, 187, 203, 220, 236,
     15,  21,  34,  51,  61,  78,  92, 106, 126, 136, 152, 167, 185, 205, 225, 240,
     10,  21,  36,  50,  63,  79,  95, 110, 126, 141, 157, 173, 189, 205, 221, 237,
     17,  20,  37,  51,  59,  78,  89, 107, 123, 134, 150, 164, 184, 205, 224, 240,
     10,  15,  32,  51,  67,  81,  96, 112, 129, 142, 158, 173, 189, 204, 220, 236,
      8,  21,  37,  51,  65,  79,  98, 113, 126, 138, 155, 168, 179, 192, 209, 218,
     12,  15,  34,  55,  63,  78,  87, 108, 118, 131, 148, 167, 185, 203, 219, 236,
     16,  19,  32,  36,  56,  79,  91, 108, 118, 136, 154, 171, 186, 204, 220, 237,
     11,  28,  43,  58,  74,  89, 105, 120, 135, 150, 165, 180, 196, 211, 226, 241,
      6,  16,  33,  46,  60,  75,  92, 107, 123, 137, 156, 169, 185, 199, 214, 225,
     11,  19,  30,  44,  57,  74,  89, 105, 121, 135, 152, 169, 186, 202, 218, 234,
     12,  19,  29,  46,  57,  71,  88, 100, 120, 132, 148, 165, 182, 199, 216, 233,
     17,  23,  35,  46,  56,  77,  92, 106, 123, 134, 152, 167, 185, 204, 222, 237,
     14,  17,  45,  53,  63,  75,  89, 107, 115, 132, 151, 171, 188, 206, 221, 240,
      9,  16,  29,  40,  56,  71,  88, 103, 119, 137, 154, 171, 189, 205, 222, 237,
     16,  19,  36,  48,  57,  76,  87, 105, 118, 132, 150, 167, 185, 202, 218, 236,
     12,  17,  29,  54,  71,  81,  94, 104, 126, 136, 149, 164, 182, 201, 221, 237,
     15,  28,  47,  62,  79,  97, 115, 129, 142, 155, 168, 180, 194, 208, 223, 238,
      8,  14,  30,  45,  62,  78,  94, 111, 127, 143, 159, 175, 192, 207, 223, 239,
     17,  30,  49,  62,  79,  92, 107, 119, 132, 145, 160, 174, 190, 204, 220, 235,
     14,  19,  36,  45,  61,  76,  91, 108, 121, 138, 154, 172, 189, 205, 222, 238,
     12,  18,  31,  45,  60,  76,  91, 107, 123, 138, 154, 171, 187, 204, 221, 236,
     13,  17,  31,  43,  53,  70,  83, 103, 114, 131, 149, 167, 185, 203, 220, 237,
     17,  22,  35,  42,  58,  78,  93, 110, 125, 139, 155, 170, 188, 206, 224, 240,
      8,  15,  34,  50,  67,  83,  99, 115, 131, 146, 162, 178, 193, 209, 224, 239,
     13,  16,  41,  66,  73,  86,  95, 111, 128, 137, 150, 163, 183, 206, 225, 241,
     17,  25,  37,  52,  63,  75,  92, 102, 119, 132, 148, 162, 182, 204, 224, 243,
     19,  31,  49,  65,  83, 100, 117, 133, 147, 161, 174, 187, 200, 213, 227, 240,
     11,  17,  32,  40,  51,  78,  97, 109, 119, 128, 143, 163, 185, 205, 224, 240,
     14,  18,  33,  49,  66,  80,  90, 109, 119, 133, 152, 165, 180, 196, 215, 229,
     13,  17,  31,  59,  82,  93, 104, 115, 130, 142, 154, 167, 184, 202, 222, 238,
];

#[rustfmt::skip]
const NLSF_CB1_ICDF_WB: [u8; 64] = [
    // Voiced half.
    225, 204, 201, 184, 183, 175, 158, 154, 153, 135, 119, 115, 113, 110, 109, 99,
    98, 95, 79, 68, 52, 50, 48, 45, 43, 32, 31, 27, 18, 10, 3, 0,
    // Unvoiced half.
    198, 183, 179, 167, 159, 145, 138, 124, 110, 91, 82, 71, 53, 45, 40, 38,
    36, 34, 32, 30, 28, 26, 24, 22, 20, 18, 16, 14, 12, 8, 4, 0,
];

#[rustfmt::skip]
const NLSF_PRED_WB_Q8: [u8; 30] = [
    175, 148, 160, 176, 178, 173, 174, 164, 177, 174, 196, 182, 198, 192, 182,
     68,  62,  66,  60,  72,  117,  85,  90,  118,  136,  151,  142,  160,  142,  155,
];

#[rustfmt::skip]
const NLSF_EC_SEL_WB: [u8; 256] = [
     16,  17,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  35,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     32,  17,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  17,  34,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  49,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  16,  33,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  32,  17,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  35,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     32,  17,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  33,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  16,  35,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  49,  50,  51,  52,  53,  54,  55,  16,  17,  50,  51,  52,  53,  54,  55,
     16,  17,  50,  51,  52,  53,  54,  55,  32,  17,  50,  51,  52,  53,  54,  55,
];

#[rustfmt::skip]
const NLSF_EC_ICDF_WB: [u8; 72] = [
    254, 249, 235, 180,  72,  26,  9,  3, 0,
    253, 245, 220, 158,  82,  35, 13,  4, 0,
    253, 244, 215, 144,  72,  26,  9,  2, 0,
    254, 248, 231, 168,  74,  23,  8,  2, 0,
    254, 249, 236, 186,  94,  34, 12,  3, 0,
    252, 241, 208, 133,  66,  27, 10,  3, 0,
    255, 251, 240, 202, 126,  52, 18,  5, 0,
    255, 253, 246, 220, 158,  80, 26,  6, 0,
];

const NLSF_DELTA_MIN_WB_Q15: [i32; 17] = [
    100, 3, 40, 3, 3, 3, 5, 14, 14, 10, 11, 3, 8, 9, 7, 3, 347,
];

pub(crate) const NLSF_CB_WB: NlsfCodebook = NlsfCodebook {
    n_vectors: 32,
    order: 16,
    quant_step_size_q16: 9830,     // 0.15
    inv_quant_step_size_q6: 427,   // 1 / 0.15
    cb1_nlsf_q8: &NLSF_CB1_WB_Q8,
    cb1_icdf: &NLSF_CB1_ICDF_WB,
    pred_q8: &NLSF_PRED_WB_Q8,
    ec_sel: &NLSF_EC_SEL_WB,
    ec_icdf: &NLSF_EC_ICDF_WB,
    delta_min_q15: &NLSF_DELTA_MIN_WB_Q15,
};

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn assert_icdf(table: &[u8]) {
        assert_eq!(*table.last().unwrap(), 0);
        table.windows(2).for_each(|w| {
            assert!(w[0] >= w[1], "icdf not monotone: {:?}", table);
        });
    }

    #[test]
    fn test_icdf_tables_are_valid() {
        assert_icdf(&TYPE_OFFSET_VAD_ICDF);
        assert_icdf(&TYPE_OFFSET_NO_VAD_ICDF);
        GAIN_ICDF.iter().for_each(|t| assert_icdf(t));
        assert_icdf(&DELTA_GAIN_ICDF);
        assert_icdf(&UNIFORM3_ICDF);
        assert_icdf(&UNIFORM4_ICDF);
        assert_icdf(&UNIFORM5_ICDF);
        assert_icdf(&UNIFORM6_ICDF);
        assert_icdf(&UNIFORM8_ICDF);
        RATE_LEVELS_ICDF.iter().for_each(|t| assert_icdf(t));
        PULSES_PER_BLOCK_ICDF.iter().for_each(|t| assert_icdf(t));
        assert_icdf(&LSB_ICDF);
        assert_icdf(&PITCH_LAG_ICDF);
        assert_icdf(&PITCH_CONTOUR_ICDF);
        assert_icdf(&PITCH_CONTOUR_NB_ICDF);
        assert_icdf(&PITCH_CONTOUR_10_MS_ICDF);
        assert_icdf(&PITCH_CONTOUR_10_MS_NB_ICDF);
        assert_icdf(&PITCH_DELTA_ICDF);
        assert_icdf(&LTP_PER_INDEX_ICDF);
        assert_icdf(&LTP_GAIN_ICDF_0);
        assert_icdf(&LTP_GAIN_ICDF_1);
        assert_icdf(&LTP_GAIN_ICDF_2);
        assert_icdf(&LTP_SCALE_ICDF);
        assert_icdf(&STEREO_PRED_JOINT_ICDF);
        assert_icdf(&STEREO_ONLY_CODE_MID_ICDF);
        assert_icdf(&NLSF_EXT_ICDF);
        assert_icdf(&NLSF_INTERPOLATION_FACTOR_ICDF);
        assert_icdf(&LBRR_FLAGS_2_ICDF);
        assert_icdf(&LBRR_FLAGS_3_ICDF);
    }

    #[test]
    fn test_shell_tables_cover_all_splits() {
        SHELL_CODE_TABLES.iter().for_each(|table| {
            assert_eq!(table.len(), 152);
            (1..=SILK_MAX_PULSES as usize).for_each(|p| {
                let offset = SHELL_CODE_TABLE_OFFSETS[p];
                let row = &table[offset..offset + p + 1];
                assert_eq!(row[p], 0);
                row.windows(2).for_each(|w| {
                    assert!(w[0] > w[1], "split {} loses a symbol: {:?}", p, row);
                });
            });
        });
    }

    #[test]
    fn test_nlsf_codebook_shapes() {
        [&NLSF_CB_NB_MB, &NLSF_CB_WB].iter().for_each(|cb| {
            assert_eq!(cb.cb1_nlsf_q8.len(), cb.n_vectors * cb.order);
            assert_eq!(cb.cb1_icdf.len(), 2 * cb.n_vectors);
            assert_eq!(cb.pred_q8.len(), 2 * (cb.order - 1));
            assert_eq!(cb.ec_sel.len(), cb.n_vectors * cb.order / 2);
            assert_eq!(cb.delta_min_q15.len(), cb.order + 1);
            assert_eq!(cb.ec_icdf.len(), 72);
            // Every codebook vector must be strictly increasing.
            (0..cb.n_vectors).for_each(|v| {
                let row = &cb.cb1_nlsf_q8[v * cb.order..(v + 1) * cb.order];
                row.windows(2).for_each(|w| {
                    assert!(w[0] < w[1], "vector {} not sorted: {:?}", v, row);
                });
            });
            assert_icdf(&cb.cb1_icdf[..cb.n_vectors]);
            assert_icdf(&cb.cb1_icdf[cb.n_vectors..]);
        });
    }

    #[test]
    fn test_cos_table_shape() {
        assert_eq!(LSF_COS_TAB_Q12[0], 4096);
        assert_eq!(LSF_COS_TAB_Q12[64], 0);
        assert_eq!(LSF_COS_TAB_Q12[128], -4096);
        LSF_COS_TAB_Q12.windows(2).for_each(|w| {
            assert!(w[0] >= w[1]);
        });
    }
}
