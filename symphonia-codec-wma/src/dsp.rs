// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f32::consts;

use symphonia_core::dsp::mdct::Imdct;

/// Generate a sine MDCT window of the given length: `sin((i + 0.5) * pi / (2 * len))`.
pub fn sine_window(len: usize) -> Vec<f32> {
    let param = consts::PI / ((2 * len) as f32);
    (0..len).map(|i| ((i as f32 + 0.5) * param).sin()).collect()
}

/// The transform side of the decoder: one IMDCT and one half-window per block size.
pub struct BlockDsp {
    frame_len_bits: u32,
    imdct: Vec<Imdct>,
    windows: Vec<Vec<f32>>,
}

impl BlockDsp {
    pub fn new(frame_len_bits: u32, nb_block_sizes: usize) -> Self {
        let mut imdct = Vec::with_capacity(nb_block_sizes);
        let mut windows = Vec::with_capacity(nb_block_sizes);

        for k in 0..nb_block_sizes as u32 {
            let block_len = 1usize << (frame_len_bits - k);
            imdct.push(Imdct::new(block_len));
            windows.push(sine_window(block_len));
        }

        BlockDsp { frame_len_bits, imdct, windows }
    }

    /// Compute the inverse MDCT for block size index `bsize`. `spec` holds `block_len`
    /// coefficients, `out` receives `2 * block_len` samples.
    pub fn imdct(&mut self, bsize: usize, spec: &[f32], out: &mut [f32]) {
        self.imdct[bsize].imdct(spec, out);
    }

    /// Apply the MDCT window to `input` (`2 * block_len` samples) and merge it into `out`.
    ///
    /// The first half overlaps the previous block and is accumulated; the second half starts the
    /// overlap region for the next block and is assigned. When a neighbouring block is shorter,
    /// the join uses that block's window centred in this one, with a plain copy (left) or copy
    /// and zero fill (right) around it, keeping the squared window sum at one across every
    /// overlap.
    pub fn window_overlap_add(
        &self,
        out: &mut [f32],
        input: &[f32],
        block_len_bits: u32,
        prev_block_len_bits: u32,
        next_block_len_bits: u32,
    ) {
        let block_len = 1usize << block_len_bits;

        // Left (overlap with the previous block).
        if block_len_bits <= prev_block_len_bits {
            let win = &self.windows[(self.frame_len_bits - block_len_bits) as usize];

            for i in 0..block_len {
                out[i] += input[i] * win[i];
            }
        }
        else {
            let prev_len = 1usize << prev_block_len_bits;
            let n = (block_len - prev_len) / 2;

            let win = &self.windows[(self.frame_len_bits - prev_block_len_bits) as usize];

            for i in 0..prev_len {
                out[n + i] += input[n + i] * win[i];
            }

            out[n + prev_len..block_len].copy_from_slice(&input[n + prev_len..block_len]);
        }

        let (_, out) = out.split_at_mut(block_len);
        let input = &input[block_len..];

        // Right (overlap with the next block).
        if block_len_bits <= next_block_len_bits {
            let win = &self.windows[(self.frame_len_bits - block_len_bits) as usize];

            for i in 0..block_len {
                out[i] = input[i] * win[block_len - 1 - i];
            }
        }
        else {
            let next_len = 1usize << next_block_len_bits;
            let n = (block_len - next_len) / 2;

            let win = &self.windows[(self.frame_len_bits - next_block_len_bits) as usize];

            out[..n].copy_from_slice(&input[..n]);

            for i in 0..next_len {
                out[n + i] = input[n + i] * win[next_len - 1 - i];
            }

            for s in out[n + next_len..block_len].iter_mut() {
                *s = 0.0;
            }
        }
    }
}

/// Mid-side to left-right butterfly.
pub fn butterflies(v1: &mut [f32], v2: &mut [f32]) {
    debug_assert_eq!(v1.len(), v2.len());

    for (a, b) in v1.iter_mut().zip(v2.iter_mut()) {
        let t = *a - *b;
        *a += *b;
        *b = t;
    }
}

/// Saturating conversion of a full-scale sample to signed 16-bit PCM.
#[inline(always)]
pub fn clamp_sample(x: f32) -> i16 {
    x.round().max(-32768.0).min(32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_sine_window_complementarity() {
        // MDCT reconstruction rule: the squared sum of the rising and falling window halves is
        // one at every overlap position.
        for bits in 7..=11 {
            let len = 1usize << bits;
            let win = sine_window(len);

            for i in 0..len {
                let sum = win[i] * win[i] + win[len - 1 - i] * win[len - 1 - i];
                assert!((sum - 1.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn verify_overlap_add_halves() {
        let dsp = BlockDsp::new(7, 1);

        let input = vec![1.0f32; 256];
        let mut out = vec![0.5f32; 256];

        dsp.window_overlap_add(&mut out, &input, 7, 7, 7);

        let win = sine_window(128);

        // The left half accumulates on top of existing output, the right half overwrites it.
        for i in 0..128 {
            assert!((out[i] - (0.5 + win[i])).abs() < 1e-6);
            assert!((out[128 + i] - win[127 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn verify_short_block_join() {
        // A 128-sample block between 64-sample neighbours: the joins use the short window
        // centred, with pass-through outside of it.
        let dsp = BlockDsp::new(7, 2);

        let input = vec![1.0f32; 256];
        let mut out = vec![0.0f32; 256];

        dsp.window_overlap_add(&mut out, &input, 7, 6, 6);

        let short = sine_window(64);

        for i in 0..32 {
            assert!((out[i] - 0.0).abs() < 1e-6);
        }
        for i in 0..64 {
            assert!((out[32 + i] - short[i]).abs() < 1e-6);
        }
        for i in 96..128 {
            assert!((out[i] - 1.0).abs() < 1e-6);
        }
        for i in 128..160 {
            assert!((out[i] - 1.0).abs() < 1e-6);
        }
        for i in 0..64 {
            assert!((out[160 + i] - short[63 - i]).abs() < 1e-6);
        }
        for i in 224..256 {
            assert!((out[i] - 0.0).abs() < 1e-6);
        }
    }

    #[test]
    fn verify_butterfly_scaled_involution() {
        let a0 = [0.25f32, -1.5, 3.0, 0.0];
        let b0 = [1.0f32, 2.0, -0.5, -4.0];

        let mut a = a0;
        let mut b = b0;

        butterflies(&mut a, &mut b);
        butterflies(&mut a, &mut b);

        // Applying the butterfly twice scales the input by two.
        for i in 0..4 {
            assert!((a[i] - 2.0 * a0[i]).abs() < 1e-6);
            assert!((b[i] - 2.0 * b0[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn verify_clamp_sample() {
        assert_eq!(clamp_sample(0.2), 0);
        assert_eq!(clamp_sample(1.7), 2);
        assert_eq!(clamp_sample(-1.7), -2);
        assert_eq!(clamp_sample(40000.0), 32767);
        assert_eq!(clamp_sample(-40000.0), -32768);
        assert_eq!(clamp_sample(f32::INFINITY), 32767);
        assert_eq!(clamp_sample(f32::NEG_INFINITY), -32768);
    }
}
