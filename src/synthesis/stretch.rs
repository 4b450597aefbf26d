//! WSOLA (Waveform Similarity Overlap-Add) time stretching to an exact length.

use crate::core::resample::{fit_length, resample_cubic};

/// Minimum energy threshold to avoid division by near-zero in correlation normalization.
const ENERGY_EPSILON: f64 = 1e-12;

/// Analysis frame duration in seconds (about 20 ms).
const FRAME_SECONDS: f64 = 0.02;
const MIN_FRAME_LEN: usize = 64;

/// WSOLA stretcher with a fixed synthesis hop of half a frame.
///
/// Each output hop takes the input frame near its nominal position whose
/// leading half best continues the waveform already written, then
/// crossfades it in linearly.
#[derive(Debug, Clone, Copy)]
pub struct Wsola {
    frame_len: usize,
    search_radius: usize,
}

impl Wsola {
    pub fn new(frame_len: usize, search_radius: usize) -> Self {
        Self {
            frame_len: frame_len.max(2),
            search_radius,
        }
    }

    /// Frame of about 20 ms with a search radius of half a frame.
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        let frame_len = ((sample_rate as f64 * FRAME_SECONDS) as usize).max(MIN_FRAME_LEN);
        Self::new(frame_len, frame_len / 2)
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Shortest input WSOLA will process; shorter input is resampled.
    #[inline]
    pub fn min_input_len(&self) -> usize {
        self.frame_len * 2
    }

    /// Stretches `input` to exactly `output_len` samples.
    pub fn process(&self, input: &[f32], output_len: usize) -> Vec<f32> {
        if output_len == 0 || input.is_empty() {
            return vec![0.0; output_len];
        }
        if input.len() == output_len {
            return input.to_vec();
        }
        if input.len() < self.min_input_len() {
            return resample_cubic(input, output_len);
        }

        let frame = self.frame_len;
        let overlap = frame / 2;
        let ratio = output_len as f64 / input.len() as f64;
        let analysis_hop = overlap as f64 / ratio;
        let last_start = input.len() - frame;

        let mut output = vec![0.0f32; output_len + frame];
        output[..frame].copy_from_slice(&input[..frame]);

        let mut k = 1usize;
        while k * overlap < output_len {
            let out_pos = k * overlap;
            let nominal = ((k as f64 * analysis_hop).round() as usize).min(last_start);
            let best = self.find_best_position(
                input,
                &output[out_pos..out_pos + overlap],
                nominal,
                last_start,
            );
            overlap_add(&input[best..best + frame], &mut output[out_pos..out_pos + frame], overlap);
            k += 1;
        }

        fit_length(output, output_len)
    }

    fn find_best_position(
        &self,
        input: &[f32],
        reference: &[f32],
        nominal: usize,
        last_start: usize,
    ) -> usize {
        let lo = nominal.saturating_sub(self.search_radius);
        let hi = (nominal + self.search_radius).min(last_start);
        let mut best_pos = nominal;
        let mut best_corr = f64::NEG_INFINITY;
        for pos in lo..=hi {
            let corr = normalized_cross_correlation(reference, &input[pos..pos + reference.len()]);
            // Ties keep the position closest to nominal
            let closer = pos.abs_diff(nominal) < best_pos.abs_diff(nominal);
            if corr > best_corr || (corr == best_corr && closer) {
                best_corr = corr;
                best_pos = pos;
            }
        }
        best_pos
    }
}

/// Crossfades `segment` into `output` over the first `overlap` samples and
/// copies the rest.
fn overlap_add(segment: &[f32], output: &mut [f32], overlap: usize) {
    for (i, (out, &s)) in output.iter_mut().zip(segment).enumerate() {
        if i < overlap {
            let fade_in = i as f32 / overlap as f32;
            *out = *out * (1.0 - fade_in) + s * fade_in;
        } else {
            *out = s;
        }
    }
}

/// Normalized cross-correlation between two signals, in `[-1, 1]`.
///
/// Returns 0.0 when either signal has no energy.
pub fn normalized_cross_correlation(a: &[f32], b: &[f32]) -> f64 {
    let (mut sum_ab, mut sum_a2, mut sum_b2) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        sum_ab += x * y;
        sum_a2 += x * x;
        sum_b2 += y * y;
    }
    let denom = (sum_a2 * sum_b2).sqrt();
    if denom < ENERGY_EPSILON {
        0.0
    } else {
        sum_ab / denom
    }
}

/// Time-stretches `input` to `output_len` samples at `sample_rate`.
pub fn time_stretch(input: &[f32], output_len: usize, sample_rate: u32) -> Vec<f32> {
    Wsola::for_sample_rate(sample_rate).process(input, output_len)
}
