// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use symphonia_core::audio::Channels;

/// Maximum number of audio channels supported by WMA v1/v2.
pub const MAX_CHANNELS: usize = 2;

/// Minimum MDCT block size in bits.
pub const BLOCK_MIN_BITS: u32 = 7;
/// Maximum MDCT block size in bits.
pub const BLOCK_MAX_BITS: u32 = 11;
/// Maximum MDCT block size.
pub const BLOCK_MAX_SIZE: usize = 1 << BLOCK_MAX_BITS;
/// Number of possible MDCT block sizes.
pub const BLOCK_NB_SIZES: usize = (BLOCK_MAX_BITS - BLOCK_MIN_BITS + 1) as usize;

/// Maximum size of the bit-reservoir overhang in bytes.
pub const MAX_SUPERFRAME_SIZE: usize = 16384;

/// Maximum number of noise-substituted high bands.
pub const HIGH_BAND_MAX_SIZE: usize = 16;

/// Size of the deterministic noise table.
pub const NOISE_TAB_SIZE: usize = 8192;

/// Number of line spectral pairs coding an exponent envelope.
pub const NB_LSP_COEFS: usize = 10;
/// Mantissa bits used by the x^(-1/4) approximation.
pub const LSP_POW_BITS: u32 = 7;

/// A superframe holds at most 15 new frames (4-bit count) plus the completion of the previous
/// superframe's trailing frame.
pub const MAX_FRAMES_PER_PACKET: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WmaVersion {
    V1,
    V2,
}

#[inline(always)]
pub fn ilog2(value: u32) -> u32 {
    debug_assert!(value > 0);
    31 - value.leading_zeros()
}

pub fn map_channels(channels: u32) -> Option<Channels> {
    match channels {
        1 => Some(Channels::FRONT_LEFT),
        2 => Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT),
        _ => None,
    }
}

/// Stream flags carried in the codec extra data.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamFlags {
    pub raw: u16,
    pub use_exp_huffman: bool,
    pub use_bit_reservoir: bool,
    pub use_variable_block_len: bool,
}

impl StreamFlags {
    /// Parse the flag word from the codec extra data. For v1 the flags are the 16-bit LE word at
    /// offset 2, for v2 at offset 4. A v2 flag word of 0x000d with at least 8 bytes of extra data
    /// forces fixed block lengths (known encoder quirk).
    pub fn parse(version: WmaVersion, extra_data: Option<&[u8]>) -> Self {
        let raw = match (version, extra_data) {
            (WmaVersion::V1, Some(data)) if data.len() >= 4 => {
                u16::from_le_bytes([data[2], data[3]])
            }
            (WmaVersion::V2, Some(data)) if data.len() >= 6 => {
                u16::from_le_bytes([data[4], data[5]])
            }
            _ => 0,
        };

        let mut flags = StreamFlags {
            raw,
            use_exp_huffman: raw & 0x0001 != 0,
            use_bit_reservoir: raw & 0x0002 != 0,
            use_variable_block_len: raw & 0x0004 != 0,
        };

        if version == WmaVersion::V2 && flags.use_variable_block_len {
            if let Some(data) = extra_data {
                if data.len() >= 8 && u16::from_le_bytes([data[4], data[5]]) == 0x000d {
                    flags.use_variable_block_len = false;
                }
            }
        }

        flags
    }
}

/// Frame length in bits for a given sample rate.
pub fn frame_len_bits(version: WmaVersion, sample_rate: u32) -> u32 {
    if sample_rate <= 16000 {
        9
    }
    else if sample_rate <= 22050 || (sample_rate <= 32000 && version == WmaVersion::V1) {
        10
    }
    else if sample_rate <= 48000 {
        11
    }
    else if sample_rate <= 96000 {
        12
    }
    else {
        13
    }
}

/// Number of distinct MDCT block sizes used by the stream.
pub fn block_size_count(
    flags: StreamFlags,
    bit_rate: u32,
    channels: u32,
    frame_len_bits: u32,
) -> usize {
    if !flags.use_variable_block_len {
        return 1;
    }

    let mut count = (u32::from(flags.raw >> 3) & 3) + 1;

    if bit_rate / channels >= 32000 {
        count += 2;
    }

    let max_count = frame_len_bits - BLOCK_MIN_BITS;

    (count.min(max_count) + 1) as usize
}

/// Sample rates are normalized to the closest supported rate, but only in WMA v2.
fn normalized_sample_rate(version: WmaVersion, sample_rate: u32) -> u32 {
    if version != WmaVersion::V2 {
        return sample_rate;
    }

    match sample_rate {
        r if r >= 44100 => 44100,
        r if r >= 22050 => 22050,
        r if r >= 16000 => 16000,
        r if r >= 11025 => 11025,
        r if r >= 8000 => 8000,
        r => r,
    }
}

/// Rate-dependent noise-coding parameters.
pub struct NoiseParams {
    /// Is perceptual noise substitution active?
    pub enabled: bool,
    /// First frequency eligible for noise substitution, in Hz.
    pub high_freq: f32,
    /// Bits-per-sample figure after the stereo adjustment. Also selects the coefficient
    /// codebooks.
    pub bps: f32,
}

/// Decide whether perceptual noise coding is used and where the high band starts. The thresholds
/// depend on the normalized sample rate and the (stereo-adjusted) bits-per-sample figure.
pub fn noise_params(version: WmaVersion, sample_rate: u32, channels: u32, bps_orig: f32) -> NoiseParams {
    let mut high_freq = sample_rate as f32 * 0.5;
    let rate = normalized_sample_rate(version, sample_rate);

    let bps = if channels == 2 { bps_orig * 1.6 } else { bps_orig };

    let enabled = match rate {
        44100 => {
            if bps >= 0.61 {
                false
            }
            else {
                high_freq *= 0.4;
                true
            }
        }
        22050 => {
            if bps >= 1.16 {
                false
            }
            else {
                high_freq *= if bps >= 0.72 { 0.7 } else { 0.6 };
                true
            }
        }
        16000 => {
            high_freq *= if bps_orig > 0.5 { 0.5 } else { 0.3 };
            true
        }
        11025 => {
            high_freq *= 0.7;
            true
        }
        8000 => {
            if bps_orig > 0.75 {
                false
            }
            else {
                high_freq *= if bps_orig <= 0.625 { 0.5 } else { 0.65 };
                true
            }
        }
        _ => {
            high_freq *= if bps_orig >= 0.8 {
                0.75
            }
            else if bps_orig >= 0.6 {
                0.6
            }
            else {
                0.5
            };
            true
        }
    };

    NoiseParams { enabled, high_freq, bps }
}

/// Number of bits used for the superframe bit-offset field, minus 3.
pub fn byte_offset_bits(bps: f32, frame_len: usize) -> u32 {
    let frame_bytes = (bps * frame_len as f32 / 8.0 + 0.05) as u32;
    ilog2(frame_bytes.max(1)) + 2
}

/// Critical band frequencies of the human auditory system, in Hz.
const CRITICAL_FREQS: [u32; 25] = [
    100, 200, 300, 400, 510, 630, 770, 920, 1080, 1270, 1480, 1720, 2000, 2320, 2700, 3150, 3700,
    4400, 5300, 6400, 7700, 9500, 12000, 15500, 24500,
];

// Fixed exponent band layouts for the three smallest v2 block sizes. Each row sums to the block
// length it describes (128, 256, 512).
const EXPONENT_BANDS_22050: [&[u16]; 3] = [
    &[4, 8, 4, 8, 8, 12, 20, 24, 24, 16],
    &[4, 8, 8, 4, 12, 12, 16, 24, 16, 20, 24, 32, 40, 36],
    &[4, 4, 8, 8, 8, 12, 8, 8, 8, 12, 12, 12, 12, 16, 16, 24, 24, 32, 44, 48, 60, 60, 72],
];

const EXPONENT_BANDS_32000: [&[u16]; 3] = [
    &[4, 4, 8, 4, 4, 12, 16, 24, 20, 28, 4],
    &[4, 8, 4, 4, 8, 8, 16, 16, 16, 20, 24, 20, 28, 40, 40],
    &[8, 4, 8, 8, 12, 16, 20, 24, 40, 28, 32, 44, 44, 52, 60, 112],
];

const EXPONENT_BANDS_44100: [&[u16]; 3] = [
    &[4, 8, 8, 8, 12, 16, 24, 24, 24],
    &[4, 8, 8, 8, 8, 12, 12, 16, 20, 24, 28, 32, 36, 40],
    &[4, 4, 4, 8, 8, 8, 12, 12, 12, 16, 16, 16, 24, 24, 32, 44, 68, 200],
];

/// Per-block-size frequency band layout: exponent scale-factor bands, the coded coefficient
/// range, and the noise-substituted high bands.
pub struct BandLayout {
    /// First coded coefficient.
    pub coefs_start: usize,
    pub exponent_sizes: [usize; BLOCK_NB_SIZES],
    pub exponent_bands: [[u16; 25]; BLOCK_NB_SIZES],
    /// First coefficient of the high band.
    pub high_band_start: [usize; BLOCK_NB_SIZES],
    /// One past the last coded coefficient.
    pub coefs_end: [usize; BLOCK_NB_SIZES],
    pub exponent_high_sizes: [usize; BLOCK_NB_SIZES],
    pub exponent_high_bands: [[usize; HIGH_BAND_MAX_SIZE]; BLOCK_NB_SIZES],
}

impl BandLayout {
    pub fn new(
        version: WmaVersion,
        sample_rate: u32,
        frame_len_bits: u32,
        nb_block_sizes: usize,
        high_freq: f32,
    ) -> Self {
        let frame_len = 1usize << frame_len_bits;

        let mut layout = BandLayout {
            coefs_start: if version == WmaVersion::V1 { 3 } else { 0 },
            exponent_sizes: [0; BLOCK_NB_SIZES],
            exponent_bands: [[0; 25]; BLOCK_NB_SIZES],
            high_band_start: [0; BLOCK_NB_SIZES],
            coefs_end: [0; BLOCK_NB_SIZES],
            exponent_high_sizes: [0; BLOCK_NB_SIZES],
            exponent_high_bands: [[0; HIGH_BAND_MAX_SIZE]; BLOCK_NB_SIZES],
        };

        for k in 0..nb_block_sizes {
            let block_len = frame_len >> k;

            match version {
                WmaVersion::V1 => layout.compute_bands_v1(k, block_len, sample_rate),
                WmaVersion::V2 => layout.compute_bands_v2(k, block_len, sample_rate, frame_len_bits),
            }

            layout.coefs_end[k] = (frame_len - ((frame_len * 9) / 100)) >> k;

            layout.high_band_start[k] =
                ((block_len as f32) * 2.0 * high_freq / (sample_rate as f32) + 0.5) as usize;

            // The high bands are the intersections of the exponent bands with the range between
            // the high band start and the end of the coded coefficients.
            let mut j = 0;
            let mut pos = 0;

            for i in 0..layout.exponent_sizes[k] {
                let start = pos;
                pos += layout.exponent_bands[k][i] as usize;
                let end = pos;

                let start = start.max(layout.high_band_start[k]);
                let end = end.min(layout.coefs_end[k]);

                if end > start && j < HIGH_BAND_MAX_SIZE {
                    layout.exponent_high_bands[k][j] = end - start;
                    j += 1;
                }
            }

            layout.exponent_high_sizes[k] = j;
        }

        layout
    }

    fn compute_bands_v1(&mut self, k: usize, block_len: usize, sample_rate: u32) {
        let b = sample_rate as usize;

        let mut lpos = 0;
        let mut n = 0;

        for (i, &freq) in CRITICAL_FREQS.iter().enumerate() {
            let pos = (((block_len * 2 * freq as usize) + (b >> 1)) / b).min(block_len);

            self.exponent_bands[k][i] = (pos - lpos) as u16;
            n = i + 1;

            if pos >= block_len {
                break;
            }

            lpos = pos;
        }

        self.exponent_sizes[k] = n;
    }

    fn compute_bands_v2(
        &mut self,
        k: usize,
        block_len: usize,
        sample_rate: u32,
        frame_len_bits: u32,
    ) {
        // The smallest three block sizes have fixed layouts per rate bucket.
        let t = frame_len_bits - BLOCK_MIN_BITS - k as u32;

        let table = if t < 3 {
            if sample_rate >= 44100 {
                Some(EXPONENT_BANDS_44100[t as usize])
            }
            else if sample_rate >= 32000 {
                Some(EXPONENT_BANDS_32000[t as usize])
            }
            else if sample_rate >= 22050 {
                Some(EXPONENT_BANDS_22050[t as usize])
            }
            else {
                None
            }
        }
        else {
            None
        };

        if let Some(row) = table {
            for (dst, &src) in self.exponent_bands[k].iter_mut().zip(row) {
                *dst = src;
            }
            self.exponent_sizes[k] = row.len();
            return;
        }

        let b = sample_rate as usize;

        let mut j = 0;
        let mut lpos = 0;

        for &freq in CRITICAL_FREQS.iter() {
            let mut pos = ((block_len * 2 * freq as usize) + (b << 1)) / (4 * b);
            pos <<= 2;
            pos = pos.min(block_len);

            if pos > lpos {
                self.exponent_bands[k][j] = (pos - lpos) as u16;
                j += 1;
            }

            if pos >= block_len {
                break;
            }

            lpos = pos;
        }

        self.exponent_sizes[k] = j;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_frame_len_bits() {
        assert_eq!(frame_len_bits(WmaVersion::V1, 8000), 9);
        assert_eq!(frame_len_bits(WmaVersion::V2, 16000), 9);
        assert_eq!(frame_len_bits(WmaVersion::V2, 22050), 10);
        assert_eq!(frame_len_bits(WmaVersion::V1, 32000), 10);
        assert_eq!(frame_len_bits(WmaVersion::V2, 32000), 11);
        assert_eq!(frame_len_bits(WmaVersion::V2, 44100), 11);
        assert_eq!(frame_len_bits(WmaVersion::V2, 48000), 11);
    }

    #[test]
    fn verify_block_size_count() {
        // Fixed block lengths always yield a single size.
        let fixed = StreamFlags { raw: 0x0001, ..Default::default() };
        assert_eq!(block_size_count(fixed, 32000, 1, 9), 1);

        // 48 kHz stereo at 128 kbps with variable blocks enables at least three sizes.
        let flags = StreamFlags::parse(
            WmaVersion::V2,
            Some(&[0, 0, 0, 0, 0x07, 0x00, 0, 0, 0, 0]),
        );
        assert!(flags.use_variable_block_len);
        assert!(block_size_count(flags, 128000, 2, 11) >= 3);

        // The count never exceeds the number of representable sizes.
        let flags = StreamFlags::parse(
            WmaVersion::V2,
            Some(&[0, 0, 0, 0, 0x1f, 0x00, 0, 0, 0, 0]),
        );
        assert!(block_size_count(flags, 320000, 1, 9) <= (9 - BLOCK_MIN_BITS + 1) as usize);
    }

    #[test]
    fn verify_variable_block_quirk() {
        // A v2 flag word of 0x000d with 8+ bytes of extra data disables variable block lengths.
        let extra = [0u8, 0, 0, 0, 0x0d, 0x00, 0, 0, 0, 0];
        let flags = StreamFlags::parse(WmaVersion::V2, Some(&extra));
        assert!(flags.use_exp_huffman);
        assert!(!flags.use_variable_block_len);

        // Without the probe bytes the flag stands.
        let flags = StreamFlags::parse(WmaVersion::V2, Some(&extra[..6]));
        assert!(flags.use_variable_block_len);
    }

    #[test]
    fn verify_fixed_band_rows() {
        for (rows, len0) in [
            (&EXPONENT_BANDS_22050, 128usize),
            (&EXPONENT_BANDS_32000, 128),
            (&EXPONENT_BANDS_44100, 128),
        ] {
            for (t, row) in rows.iter().enumerate() {
                let sum: usize = row.iter().map(|&b| b as usize).sum();
                assert_eq!(sum, len0 << t);
            }
        }
    }

    #[test]
    fn verify_band_layout_sums() {
        for &(version, rate, channels, bit_rate) in &[
            (WmaVersion::V1, 8000u32, 1u32, 8000u32),
            (WmaVersion::V1, 16000, 2, 40000),
            (WmaVersion::V2, 22050, 1, 24000),
            (WmaVersion::V2, 44100, 2, 128000),
            (WmaVersion::V2, 48000, 2, 160000),
        ] {
            let fbits = frame_len_bits(version, rate);
            let bps = bit_rate as f32 / (channels as f32 * rate as f32);
            let noise = noise_params(version, rate, channels, bps);
            let nb = (fbits - BLOCK_MIN_BITS + 1) as usize;

            let layout = BandLayout::new(version, rate, fbits, nb, noise.high_freq);

            for k in 0..nb {
                let block_len = (1usize << fbits) >> k;
                let sum: usize = layout.exponent_bands[k][..layout.exponent_sizes[k]]
                    .iter()
                    .map(|&b| b as usize)
                    .sum();

                // The bands tile the whole block.
                assert_eq!(sum, block_len);
                assert!(layout.coefs_start <= layout.coefs_end[k]);
                assert!(layout.coefs_end[k] <= block_len);
                assert!(layout.high_band_start[k] <= block_len);

                let high_sum: usize =
                    layout.exponent_high_bands[k][..layout.exponent_high_sizes[k]].iter().sum();
                let high_range =
                    layout.coefs_end[k].saturating_sub(layout.high_band_start[k].max(layout.coefs_start));
                assert!(high_sum <= high_range + block_len - layout.coefs_end[k]);
            }
        }
    }

    #[test]
    fn verify_noise_params() {
        // 44.1 kHz stereo at high rates disables noise substitution.
        let np = noise_params(WmaVersion::V2, 44100, 2, 128000.0 / (2.0 * 44100.0));
        assert!(!np.enabled);

        // 22.05 kHz mono at 24 kbps keeps it enabled with a reduced cutoff.
        let np = noise_params(WmaVersion::V2, 22050, 1, 24000.0 / 22050.0);
        assert!(np.enabled);
        assert!(np.high_freq < 22050.0 / 2.0);

        // 16 kHz always enables noise substitution.
        let np = noise_params(WmaVersion::V1, 16000, 2, 40000.0 / (2.0 * 16000.0));
        assert!(np.enabled);
        assert!((np.high_freq - 4000.0).abs() < 1.0);
    }

    #[test]
    fn verify_byte_offset_bits() {
        // 44.1 kHz stereo at 128 kbps, 2048-sample frames.
        let bps = 128000.0 / (2.0 * 44100.0);
        assert_eq!(byte_offset_bits(bps, 2048), 10);
    }
}
