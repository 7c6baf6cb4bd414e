// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entropy-coding tables of the WMA bitstream.
//!
//! All codebooks are stored as canonical code-length tables; the codewords themselves are
//! synthesized at startup. Coefficient codebooks come in pairs (a primary table and a lower
//! energy table for the second channel in mid-side stereo blocks), one pair per rate class.

use lazy_static::lazy_static;

use symphonia_core::errors::{decode_error, Result};
use symphonia_core::io::vlc::{BitOrder, Codebook, CodebookBuilder, Entry16x16};

/// A coefficient codebook together with the run and level values of its symbols.
///
/// Symbol 0 is the escape code, symbol 1 ends the block, and every symbol `i >= 2` stands for a
/// zero-run of `run[i]` followed by a coefficient of magnitude `level[i]`.
pub struct CoefCodebook {
    pub codebook: Codebook<Entry16x16>,
    pub run: Vec<u16>,
    pub level: Vec<f32>,
    /// First symbol of each magnitude level. Symbol for `(level, run)` is `idx[level - 1] + run`.
    pub idx: Vec<u16>,
}

/// Generate the canonical codeword for every code length, in symbol order.
///
/// This is the codeword synthesis algorithm of the vorbis decoder's codebook setup; WMA codes
/// are read most-significant-bit first, so the synthesized words are used verbatim.
pub fn synthesize_codewords(code_lens: &[u8]) -> Result<Vec<u32>> {
    let mut codewords = Vec::with_capacity(code_lens.len());

    let mut next_codeword = [0u32; 33];

    for &len in code_lens.iter() {
        debug_assert!(len > 0 && len <= 32);

        let codeword_len = usize::from(len);
        let codeword = next_codeword[codeword_len];

        if len < 32 && (codeword >> len) > 0 {
            return decode_error("wma: codebook overspecified");
        }

        for i in (0..codeword_len + 1).rev() {
            if next_codeword[i] & 1 == 1 {
                next_codeword[i] = next_codeword[i - 1] << 1;
                break;
            }
            next_codeword[i] += 1;
        }

        let branch = next_codeword[codeword_len];

        for (i, next) in next_codeword[codeword_len..].iter_mut().enumerate().skip(1) {
            if *next == codeword << i {
                *next = branch << i;
            }
            else {
                break;
            }
        }

        codewords.push(codeword);
    }

    Ok(codewords)
}

fn make_codebook(code_lens: &[u8]) -> Codebook<Entry16x16> {
    let code_words = synthesize_codewords(code_lens).expect("codebook is canonical");
    let values: Vec<u16> = (0..code_lens.len() as u16).collect();

    let mut builder = CodebookBuilder::new(BitOrder::Verbatim);
    builder.bits_per_read(8);
    builder.make::<Entry16x16>(&code_words, code_lens, &values).expect("codebook is valid")
}

fn make_coef_codebook(code_lens: &[u8], levels: &[u16]) -> CoefCodebook {
    let n = code_lens.len();

    let mut run = vec![0u16; n];
    let mut level = vec![0f32; n];
    let mut idx = Vec::with_capacity(levels.len());

    // Symbols 0 and 1 are the escape and end-of-block codes and carry no run/level.
    let mut i = 2;

    for (k, &runs) in levels.iter().enumerate() {
        idx.push(i as u16);
        for j in 0..runs {
            run[i] = j;
            level[i] = (k + 1) as f32;
            i += 1;
        }
    }

    assert_eq!(i, n);
    debug_assert_eq!(idx.first().copied(), Some(2));

    CoefCodebook { codebook: make_codebook(code_lens), run, level, idx }
}

lazy_static! {
    /// Exponent delta codebook. The decoded symbol minus 60 is the scale-factor delta.
    pub static ref EXP_CODEBOOK: Codebook<Entry16x16> = make_codebook(&EXP_HUFF_LENS);

    /// High-band noise gain delta codebook. The decoded symbol minus 18 is the gain delta.
    pub static ref HGAIN_CODEBOOK: Codebook<Entry16x16> = make_codebook(&HGAIN_HUFF_LENS);

    /// Coefficient codebook pairs, ordered (primary, mid-side secondary) per rate class.
    pub static ref COEF_CODEBOOKS: [CoefCodebook; 6] = [
        make_coef_codebook(&COEF0_HUFF_LENS, &COEF0_LEVELS),
        make_coef_codebook(&COEF1_HUFF_LENS, &COEF1_LEVELS),
        make_coef_codebook(&COEF2_HUFF_LENS, &COEF2_LEVELS),
        make_coef_codebook(&COEF3_HUFF_LENS, &COEF3_LEVELS),
        make_coef_codebook(&COEF4_HUFF_LENS, &COEF4_LEVELS),
        make_coef_codebook(&COEF5_HUFF_LENS, &COEF5_LEVELS),
    ];
}

/// Select the coefficient codebook pair for a stream. `bps` is the stereo-adjusted
/// bits-per-sample figure.
pub fn coef_codebook_pair(sample_rate: u32, bps: f32) -> usize {
    if sample_rate >= 32000 {
        if bps < 0.72 {
            return 0;
        }
        else if bps < 1.16 {
            return 1;
        }
    }
    2
}

pub(crate) const EXP_HUFF_LENS: [u8; 121] = [
    19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 18, 18, 17, 17, 16, 15, 15, 14, 13, 12, 12, 11,
    10, 10, 9, 8, 8, 7, 6, 6, 5, 4, 4, 3, 2, 3, 3, 4,
    5, 5, 6, 7, 7, 8, 9, 9, 10, 11, 11, 12, 13, 14, 14, 15,
    16, 17, 17, 18, 18, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
    19, 19, 19, 19, 19, 19, 19, 19, 19,
];

pub(crate) const HGAIN_HUFF_LENS: [u8; 37] = [
    13, 13, 13, 12, 12, 11, 10, 10, 9, 8, 8, 7, 6, 6, 5, 4,
    4, 3, 2, 3, 3, 4, 5, 5, 6, 7, 7, 8, 9, 9, 10, 11,
    11, 12, 13, 13, 13,
];

pub(crate) const COEF0_LEVELS: [u16; 20] = [
    96, 48, 32, 24, 18, 14, 10, 8, 8, 6, 6, 4, 4, 4, 2, 2,
    2, 2, 2, 2,
];

pub(crate) const COEF0_HUFF_LENS: [u8; 296] = [
    21, 5, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6, 7, 7, 7,
    7, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12,
    12, 12, 13, 13, 13, 13, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16,
    16, 17, 17, 17, 18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 21, 21,
    21, 21, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 5, 5, 5, 5, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8,
    9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 13,
    13, 14, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16, 17, 17, 17, 18,
    18, 18, 6, 6, 6, 7, 7, 7, 8, 8, 8, 8, 9, 9, 9, 10,
    10, 10, 10, 11, 11, 11, 12, 12, 12, 12, 13, 13, 13, 14, 14, 14,
    14, 15, 7, 7, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 11, 11,
    11, 11, 12, 12, 12, 13, 13, 13, 13, 14, 8, 9, 9, 9, 10, 10,
    10, 10, 11, 11, 11, 12, 12, 12, 12, 13, 13, 13, 10, 10, 10, 10,
    11, 11, 11, 12, 12, 12, 12, 13, 13, 13, 11, 11, 11, 12, 12, 12,
    13, 13, 13, 13, 12, 12, 13, 13, 13, 14, 14, 14, 13, 14, 14, 14,
    15, 15, 15, 15, 15, 15, 15, 15, 16, 16, 16, 16, 16, 17, 17, 17,
    17, 17, 18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 21, 21, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22,
];

pub(crate) const COEF1_LEVELS: [u16; 14] = [
    64, 32, 20, 12, 10, 8, 6, 4, 4, 2, 2, 2, 2, 2,
];

pub(crate) const COEF1_HUFF_LENS: [u8; 172] = [
    21, 5, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6, 6, 7, 7,
    7, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 12,
    12, 12, 13, 13, 13, 13, 14, 14, 14, 15, 15, 15, 16, 16, 16, 17,
    17, 17, 17, 18, 18, 18, 18, 19, 19, 19, 20, 20, 20, 21, 21, 21,
    21, 21, 5, 5, 5, 5, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8,
    9, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 13,
    13, 14, 6, 6, 6, 7, 7, 7, 8, 8, 8, 8, 9, 9, 9, 10,
    10, 10, 10, 11, 11, 11, 7, 7, 8, 8, 8, 9, 9, 9, 9, 10,
    10, 10, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 10, 10, 10, 10,
    11, 11, 11, 12, 11, 11, 11, 12, 12, 12, 12, 12, 13, 13, 13, 14,
    14, 14, 15, 15, 16, 16, 17, 18, 18, 19, 20, 20,
];

pub(crate) const COEF2_LEVELS: [u16; 14] = [
    112, 56, 32, 20, 14, 10, 8, 6, 4, 4, 2, 2, 2, 2,
];

pub(crate) const COEF2_HUFF_LENS: [u8; 276] = [
    21, 5, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6, 7, 7, 7,
    7, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12,
    12, 12, 13, 13, 13, 13, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16,
    16, 17, 17, 17, 18, 18, 18, 18, 19, 19, 19, 20, 20, 20, 20, 21,
    21, 21, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 5, 5, 5, 5, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8,
    9, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 13,
    13, 14, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16, 17, 17, 17, 17,
    18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 6, 6, 6, 7, 7, 7,
    8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 12, 12,
    12, 12, 13, 13, 13, 14, 14, 14, 14, 15, 7, 7, 8, 8, 8, 9,
    9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 8, 9,
    9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 10, 10, 10, 10,
    11, 11, 11, 12, 12, 12, 11, 11, 11, 12, 12, 12, 13, 13, 12, 12,
    13, 13, 13, 14, 13, 14, 14, 14, 15, 15, 15, 15, 16, 16, 17, 17,
    18, 19, 19, 20,
];

pub(crate) const COEF3_LEVELS: [u16; 12] = [
    72, 36, 20, 12, 8, 6, 4, 4, 2, 2, 2, 2,
];

pub(crate) const COEF3_HUFF_LENS: [u8; 172] = [
    21, 5, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6, 6, 7, 7,
    7, 8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 12,
    12, 12, 12, 13, 13, 13, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16,
    17, 17, 17, 17, 18, 18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 20,
    21, 21, 21, 21, 22, 22, 22, 22, 22, 22, 5, 5, 5, 5, 6, 6,
    6, 7, 7, 7, 7, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 11,
    11, 11, 11, 12, 12, 12, 13, 13, 13, 14, 14, 14, 14, 15, 6, 6,
    6, 7, 7, 7, 8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11,
    11, 11, 7, 7, 8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 8, 9,
    9, 9, 10, 10, 10, 10, 10, 10, 10, 10, 11, 11, 11, 11, 11, 12,
    12, 12, 13, 13, 13, 14, 15, 15, 16, 16, 17, 17,
];

pub(crate) const COEF4_LEVELS: [u16; 11] = [
    128, 64, 32, 16, 10, 8, 4, 4, 2, 2, 2,
];

pub(crate) const COEF4_HUFF_LENS: [u8; 274] = [
    21, 5, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6, 7, 7, 7,
    7, 8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12,
    12, 12, 13, 13, 13, 13, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16,
    17, 17, 17, 17, 18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 20, 21,
    21, 21, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 5, 5, 5, 5, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8,
    9, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 13,
    13, 13, 14, 14, 14, 15, 15, 15, 15, 16, 16, 16, 17, 17, 17, 18,
    18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 21, 21, 21, 21, 22, 22,
    22, 22, 6, 6, 6, 7, 7, 7, 8, 8, 8, 8, 9, 9, 9, 10,
    10, 10, 10, 11, 11, 11, 12, 12, 12, 12, 13, 13, 13, 14, 14, 14,
    15, 15, 7, 7, 8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 11, 11,
    11, 11, 8, 9, 9, 9, 9, 10, 10, 10, 11, 11, 10, 10, 10, 10,
    11, 11, 11, 12, 11, 11, 11, 12, 12, 12, 13, 13, 13, 14, 15, 15,
    16, 16,
];

pub(crate) const COEF5_LEVELS: [u16; 10] = [
    80, 40, 20, 12, 8, 4, 4, 2, 2, 2,
];

pub(crate) const COEF5_HUFF_LENS: [u8; 176] = [
    21, 5, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6, 6, 7, 7,
    7, 8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 12,
    12, 12, 12, 13, 13, 13, 14, 14, 14, 14, 15, 15, 15, 15, 16, 16,
    16, 17, 17, 17, 17, 18, 18, 18, 18, 19, 19, 19, 20, 20, 20, 20,
    21, 21, 21, 21, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22, 22,
    22, 22, 5, 5, 5, 5, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8,
    9, 9, 9, 9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 13,
    13, 13, 14, 14, 14, 14, 15, 15, 15, 16, 6, 6, 6, 7, 7, 7,
    8, 8, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 7, 7,
    8, 8, 8, 9, 9, 9, 9, 10, 10, 10, 8, 9, 9, 9, 9, 10,
    10, 10, 10, 10, 10, 10, 11, 11, 11, 12, 12, 12, 13, 14, 14, 15,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_complete_prefix_code(lens: &[u8]) {
        // Kraft equality: a complete code's lengths satisfy sum(2^-len) == 1.
        let max = *lens.iter().max().unwrap() as u32;
        let sum: u64 = lens.iter().map(|&l| 1u64 << (max - l as u32)).sum();
        assert_eq!(sum, 1u64 << max);

        // No codeword is a prefix of another.
        let words = synthesize_codewords(lens).unwrap();
        for (i, (&wi, &li)) in words.iter().zip(lens).enumerate() {
            for (j, (&wj, &lj)) in words.iter().zip(lens).enumerate() {
                if i == j {
                    continue;
                }
                if li <= lj {
                    assert_ne!(wi, wj >> (lj - li), "symbol {} prefixes symbol {}", i, j);
                }
            }
        }
    }

    #[test]
    fn verify_exp_codebook() {
        assert_complete_prefix_code(&EXP_HUFF_LENS);
        // The zero delta has the shortest code.
        let min = *EXP_HUFF_LENS.iter().min().unwrap();
        assert_eq!(EXP_HUFF_LENS[60], min);
    }

    #[test]
    fn verify_hgain_codebook() {
        assert_complete_prefix_code(&HGAIN_HUFF_LENS);
        let min = *HGAIN_HUFF_LENS.iter().min().unwrap();
        assert_eq!(HGAIN_HUFF_LENS[18], min);
    }

    #[test]
    fn verify_coef_codebooks() {
        for (lens, levels) in [
            (&COEF0_HUFF_LENS[..], &COEF0_LEVELS[..]),
            (&COEF1_HUFF_LENS[..], &COEF1_LEVELS[..]),
            (&COEF2_HUFF_LENS[..], &COEF2_LEVELS[..]),
            (&COEF3_HUFF_LENS[..], &COEF3_LEVELS[..]),
            (&COEF4_HUFF_LENS[..], &COEF4_LEVELS[..]),
            (&COEF5_HUFF_LENS[..], &COEF5_LEVELS[..]),
        ] {
            assert_complete_prefix_code(lens);

            let total: usize = levels.iter().map(|&l| l as usize).sum();
            assert_eq!(total + 2, lens.len());
        }
    }

    #[test]
    fn verify_run_level_tables() {
        let cb = make_coef_codebook(&COEF0_HUFF_LENS, &COEF0_LEVELS);

        // The first run/level symbol is a run of zero at magnitude one.
        assert_eq!(cb.run[2], 0);
        assert_eq!(cb.level[2], 1.0);
        assert_eq!(cb.idx[0], 2);

        // Symbol lookup by (level, run) agrees with the flat tables.
        for (k, &runs) in COEF0_LEVELS.iter().enumerate() {
            for r in 0..runs {
                let sym = (cb.idx[k] + r) as usize;
                assert_eq!(cb.run[sym], r);
                assert_eq!(cb.level[sym], (k + 1) as f32);
            }
        }
    }

    #[test]
    fn verify_codebook_decode() {
        use symphonia_core::io::{BitReaderLtr, ReadBitsLtr};

        // Encode a few symbols with the synthesized codewords and read them back.
        let lens = &HGAIN_HUFF_LENS;
        let words = synthesize_codewords(lens).unwrap();

        let symbols = [18usize, 0, 36, 17, 19, 5, 30, 18];

        let mut bits = Vec::new();
        for &sym in &symbols {
            for b in (0..lens[sym]).rev() {
                bits.push((words[sym] >> b) & 1 != 0);
            }
        }

        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }

        let mut bs = BitReaderLtr::new(&bytes);
        for &sym in &symbols {
            let (value, _) = bs.read_codebook(&HGAIN_CODEBOOK).unwrap();
            assert_eq!(value as usize, sym);
        }
    }
}
