//! FFT helpers shared by feature extraction, spectral blending, and quality metrics.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::core::window::{apply_window_into, hann_window};

/// Zero-valued complex number, used for FFT buffer initialization.
pub const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Absolute floor for window-sum normalization to prevent division by zero.
pub const WINDOW_SUM_EPSILON: f32 = 1e-6;

/// Converts an FFT bin index to its center frequency in Hz.
#[inline]
pub fn bin_to_freq(bin: usize, fft_size: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / fft_size as f32
}

/// Reusable windowed magnitude-spectrum analyzer.
///
/// Frames shorter than the FFT size are zero-padded. The analyzer owns its
/// scratch buffers so repeated calls do not allocate.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    windowed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    /// Creates an analyzer whose Hann window covers `frame_len` samples of an
    /// `fft_size`-point transform.
    pub fn new(fft_size: usize, frame_len: usize) -> Self {
        let fft_size = fft_size.max(frame_len).max(1);
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(fft_size),
            fft_size,
            window: hann_window(frame_len),
            windowed: vec![0.0; fft_size],
            buffer: vec![COMPLEX_ZERO; fft_size],
            magnitudes: vec![0.0; fft_size / 2 + 1],
        }
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Computes the magnitude spectrum (bins `0..=fft_size/2`) of one frame.
    pub fn magnitudes(&mut self, frame: &[f32]) -> &[f32] {
        apply_window_into(frame, &self.window, &mut self.windowed);
        for (slot, &s) in self.buffer.iter_mut().zip(self.windowed.iter()) {
            *slot = Complex::new(s, 0.0);
        }
        self.fft.process(&mut self.buffer);
        for (mag, c) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *mag = c.norm();
        }
        &self.magnitudes
    }
}

/// Short-time Fourier transform with centered (zero-padded) framing.
///
/// Produces `len / hop + 1` frames of `fft_size` complex bins. Paired with
/// [`istft`], reconstruction is exact wherever the squared-window sum is
/// above [`WINDOW_SUM_EPSILON`].
pub fn stft(signal: &[f32], fft_size: usize, hop: usize) -> Vec<Vec<Complex<f32>>> {
    let hop = hop.max(1);
    let pad = fft_size / 2;
    let num_frames = signal.len() / hop + 1;
    let window = hann_window(fft_size);

    let mut padded = vec![0.0f32; signal.len() + fft_size];
    padded[pad..pad + signal.len()].copy_from_slice(signal);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    (0..num_frames)
        .map(|k| {
            let start = k * hop;
            let mut frame: Vec<Complex<f32>> = (0..fft_size)
                .map(|i| Complex::new(padded[start + i] * window[i], 0.0))
                .collect();
            fft.process(&mut frame);
            frame
        })
        .collect()
}

/// Inverse of [`stft`] using weighted overlap-add.
pub fn istft(
    frames: &[Vec<Complex<f32>>],
    fft_size: usize,
    hop: usize,
    output_len: usize,
) -> Vec<f32> {
    let hop = hop.max(1);
    let pad = fft_size / 2;
    let window = hann_window(fft_size);
    let total = ((frames.len().saturating_sub(1)) * hop + fft_size).max(output_len + fft_size);

    let mut accum = vec![0.0f32; total];
    let mut weight = vec![0.0f32; total];

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(fft_size);
    let scale = 1.0 / fft_size as f32;
    let mut buf = vec![COMPLEX_ZERO; fft_size];

    for (k, frame) in frames.iter().enumerate() {
        buf.copy_from_slice(frame);
        ifft.process(&mut buf);
        let start = k * hop;
        for i in 0..fft_size {
            let w = window[i];
            accum[start + i] += buf[i].re * scale * w;
            weight[start + i] += w * w;
        }
    }

    (0..output_len)
        .map(|i| {
            let idx = i + pad;
            if weight[idx] > WINDOW_SUM_EPSILON {
                accum[idx] / weight[idx]
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_bin_to_freq() {
        assert_eq!(bin_to_freq(0, 1024, 44100), 0.0);
        assert!((bin_to_freq(512, 1024, 44100) - 22050.0).abs() < 1e-3);
    }

    #[test]
    fn test_magnitudes_peak_at_sine_bin() {
        let sr = 8000;
        let mut analyzer = SpectrumAnalyzer::new(512, 512);
        // 1000 Hz lands exactly on bin 64 for a 512-point FFT at 8 kHz
        let frame = sine(1000.0, sr, 512);
        let mags = analyzer.magnitudes(&frame);
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
    }

    #[test]
    fn test_magnitudes_zero_pads_short_frames() {
        let mut analyzer = SpectrumAnalyzer::new(256, 100);
        assert_eq!(analyzer.num_bins(), 129);
        let mags = analyzer.magnitudes(&[0.5; 100]);
        assert_eq!(mags.len(), 129);
        assert!(mags[0] > 0.0);
    }

    #[test]
    fn test_stft_istft_reconstructs() {
        let signal = sine(440.0, 8000, 3000);
        let frames = stft(&signal, 256, 64);
        assert_eq!(frames.len(), 3000 / 64 + 1);
        let out = istft(&frames, 256, 64, signal.len());
        assert_eq!(out.len(), signal.len());
        for (a, b) in signal.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_stft_short_signal() {
        let signal = vec![0.25f32; 10];
        let frames = stft(&signal, 64, 16);
        let out = istft(&frames, 64, 16, signal.len());
        for (a, b) in signal.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
