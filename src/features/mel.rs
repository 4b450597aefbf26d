//! Mel filterbank and DCT used for MFCC extraction.

use std::f64::consts::PI;

/// Converts Hz to the HTK mel scale.
#[inline]
pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Converts an HTK mel value back to Hz.
#[inline]
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank over the bins of an FFT power spectrum.
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    /// Per band: first bin index and the triangle weights from that bin.
    bands: Vec<(usize, Vec<f32>)>,
}

impl MelFilterbank {
    /// Builds `n_mels` triangular bands spanning 0 Hz to Nyquist.
    pub fn new(n_mels: usize, fft_size: usize, sample_rate: u32) -> Self {
        let num_bins = fft_size / 2 + 1;
        let nyquist = sample_rate as f64 / 2.0;
        let mel_max = hz_to_mel(nyquist);
        let bin_hz = sample_rate as f64 / fft_size as f64;

        // n_mels + 2 edge frequencies, evenly spaced in mel
        let edges: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
            .collect();

        let bands = (0..n_mels)
            .map(|m| {
                let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
                let first = (lo / bin_hz).floor() as usize;
                let last = ((hi / bin_hz).ceil() as usize).min(num_bins - 1);
                let weights = (first..=last)
                    .map(|bin| {
                        let f = bin as f64 * bin_hz;
                        let w = if f <= lo || f >= hi {
                            0.0
                        } else if f <= center {
                            (f - lo) / (center - lo)
                        } else {
                            (hi - f) / (hi - center)
                        };
                        w as f32
                    })
                    .collect();
                (first, weights)
            })
            .collect();

        Self { bands }
    }

    #[inline]
    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    /// Applies the filterbank to a power spectrum.
    pub fn apply(&self, power: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend(self.bands.iter().map(|(first, weights)| {
            weights
                .iter()
                .enumerate()
                .filter_map(|(i, &w)| power.get(first + i).map(|&p| p * w))
                .sum::<f32>()
        }));
    }
}

/// Orthonormal DCT-II, keeping the first `n_out` coefficients.
pub fn dct_ii(input: &[f32], n_out: usize) -> Vec<f32> {
    let n = input.len();
    if n == 0 {
        return vec![0.0; n_out];
    }
    let nf = n as f64;
    (0..n_out)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x as f64 * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * nf)).cos()
                })
                .sum();
            let scale = if k == 0 {
                (1.0 / nf).sqrt()
            } else {
                (2.0 / nf).sqrt()
            };
            (sum * scale) as f32
        })
        .collect()
}
