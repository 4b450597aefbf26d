//! Crossfade curves between adjacent timeline slots.

use std::f32::consts::FRAC_PI_2;

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::core::fft::{istft, stft};
use crate::synthesis::stretch::normalized_cross_correlation;

/// Below this many samples the spectral blend degrades to linear.
const MIN_SPECTRAL_LEN: usize = 16;
const MAX_SPECTRAL_FFT: usize = 2048;

/// Crossfade curve applied where two slots overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendAlgorithm {
    /// `1 - t` / `t`.
    Linear,
    /// `log10(1 + 9(1 - t))` / `log10(1 + 9t)`.
    Logarithmic,
    /// `cos(t·π/2)` / `sin(t·π/2)`.
    #[default]
    EqualPower,
    /// Linear crossfade of STFT frames, resynthesized by overlap-add.
    Spectral,
}

impl BlendAlgorithm {
    /// Fade-out and fade-in weights at position `t` in `[0, 1]`.
    ///
    /// The spectral blend uses the linear curve per frame.
    pub fn weights(&self, t: f32) -> (f32, f32) {
        let t = t.clamp(0.0, 1.0);
        match self {
            BlendAlgorithm::Linear | BlendAlgorithm::Spectral => (1.0 - t, t),
            BlendAlgorithm::Logarithmic => {
                ((1.0 + 9.0 * (1.0 - t)).log10(), (1.0 + 9.0 * t).log10())
            }
            BlendAlgorithm::EqualPower => ((t * FRAC_PI_2).cos(), (t * FRAC_PI_2).sin()),
        }
    }
}

/// Position of sample `i` of `n` along the fade, from 0.0 to 1.0 inclusive.
#[inline]
fn fade_position(i: usize, n: usize) -> f32 {
    if n <= 1 {
        0.5
    } else {
        i as f32 / (n - 1) as f32
    }
}

/// Crossfades from `outgoing` to `incoming` over `min(len)` samples.
///
/// Crossfading a signal with itself returns the signal unchanged for every
/// algorithm.
pub fn crossfade(outgoing: &[f32], incoming: &[f32], algorithm: BlendAlgorithm) -> Vec<f32> {
    let n = outgoing.len().min(incoming.len());
    let (a, b) = (&outgoing[..n], &incoming[..n]);
    match algorithm {
        BlendAlgorithm::Spectral if n >= MIN_SPECTRAL_LEN => spectral_crossfade(a, b),
        BlendAlgorithm::Spectral => time_crossfade(a, b, BlendAlgorithm::Linear),
        _ => time_crossfade(a, b, algorithm),
    }
}

/// Time-domain crossfade scaled by the coherence of the two regions.
///
/// With `ρ` the clamped correlation of the regions, each sample is scaled by
/// `1 / (ρ(w_out + w_in) + 1 - ρ)`: identical material keeps its level and
/// uncorrelated material follows the plain curve.
fn time_crossfade(a: &[f32], b: &[f32], algorithm: BlendAlgorithm) -> Vec<f32> {
    let n = a.len();
    let rho = normalized_cross_correlation(a, b).clamp(0.0, 1.0) as f32;
    (0..n)
        .map(|i| {
            let (w_out, w_in) = algorithm.weights(fade_position(i, n));
            let gain = 1.0 / (rho * (w_out + w_in) + (1.0 - rho));
            (a[i] * w_out + b[i] * w_in) * gain
        })
        .collect()
}

/// Largest power of two not above `n`, capped at 2048.
pub(crate) fn spectral_fft_size(n: usize) -> usize {
    let mut size = MAX_SPECTRAL_FFT;
    while size > n {
        size /= 2;
    }
    size
}

fn spectral_crossfade(a: &[f32], b: &[f32]) -> Vec<f32> {
    let n = a.len();
    let fft_size = spectral_fft_size(n);
    let hop = (fft_size / 4).max(1);
    let spec_a = stft(a, fft_size, hop);
    let spec_b = stft(b, fft_size, hop);

    let blended: Vec<Vec<Complex<f32>>> = spec_a
        .iter()
        .zip(&spec_b)
        .enumerate()
        .map(|(k, (fa, fb))| {
            let (w_out, w_in) = BlendAlgorithm::Linear.weights(fade_position(k * hop, n));
            fa.iter().zip(fb).map(|(x, y)| x * w_out + y * w_in).collect()
        })
        .collect();

    istft(&blended, fft_size, hop, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BlendAlgorithm; 4] = [
        BlendAlgorithm::Linear,
        BlendAlgorithm::Logarithmic,
        BlendAlgorithm::EqualPower,
        BlendAlgorithm::Spectral,
    ];

    fn sine(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.6 * (2.0 * std::f32::consts::PI * freq * i as f32 / 8000.0).sin())
            .collect()
    }

    #[test]
    fn test_curve_endpoints() {
        for algorithm in ALL {
            let (out0, in0) = algorithm.weights(0.0);
            let (out1, in1) = algorithm.weights(1.0);
            assert!((out0 - 1.0).abs() < 1e-6 && in0.abs() < 1e-6, "{algorithm:?}");
            assert!(out1.abs() < 1e-6 && (in1 - 1.0).abs() < 1e-6, "{algorithm:?}");
        }
    }

    #[test]
    fn test_equal_power_sums_to_unit_power() {
        for i in 0..=10 {
            let (o, n) = BlendAlgorithm::EqualPower.weights(i as f32 / 10.0);
            assert!((o * o + n * n - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_idempotent_for_every_algorithm() {
        let x = sine(440.0, 800);
        for algorithm in ALL {
            let out = crossfade(&x, &x, algorithm);
            assert_eq!(out.len(), x.len());
            for (i, (a, b)) in out.iter().zip(&x).enumerate() {
                assert!((a - b).abs() < 1e-3, "{algorithm:?} sample {i}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_length_clamped_to_shorter() {
        let a = vec![1.0; 50];
        let b = vec![0.0; 30];
        for algorithm in ALL {
            assert_eq!(crossfade(&a, &b, algorithm).len(), 30);
        }
    }

    #[test]
    fn test_fade_to_silence_follows_curve() {
        let a = vec![1.0f32; 11];
        let b = vec![0.0f32; 11];
        let out = crossfade(&a, &b, BlendAlgorithm::Linear);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[5] - 0.5).abs() < 1e-6);
        assert!(out[10].abs() < 1e-6);
        let eq = crossfade(&a, &b, BlendAlgorithm::EqualPower);
        assert!((eq[5] - (std::f32::consts::FRAC_PI_4).cos()).abs() < 1e-5);
    }

    #[test]
    fn test_spectral_moves_between_signals() {
        let a = sine(300.0, 1024);
        let b = sine(1200.0, 1024);
        let out = crossfade(&a, &b, BlendAlgorithm::Spectral);
        assert_eq!(out.len(), 1024);
        // Start resembles the outgoing signal, end the incoming one
        assert!(normalized_cross_correlation(&out[..128], &a[..128]) > 0.8);
        assert!(normalized_cross_correlation(&out[896..], &b[896..]) > 0.8);
    }

    #[test]
    fn test_single_sample() {
        for algorithm in ALL {
            assert_eq!(crossfade(&[0.4], &[0.4], algorithm).len(), 1);
        }
    }

    #[test]
    fn test_spectral_fft_size() {
        assert_eq!(spectral_fft_size(5000), 2048);
        assert_eq!(spectral_fft_size(1000), 512);
        assert_eq!(spectral_fft_size(16), 16);
    }
}
