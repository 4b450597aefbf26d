//! Objective quality metrics comparing a synthesized output with its target.

use serde::Serialize;

use crate::core::fft::{bin_to_freq, SpectrumAnalyzer};
use crate::core::resample::resample_rate;
use crate::core::types::AudioBuffer;
use crate::features::spectral::{rms, zero_crossing_rate};
use crate::synthesis::SynthesisResult;

const ANALYSIS_FFT: usize = 2048;
const ANALYSIS_HOP: usize = 512;

/// Absolute level at or above which a sample counts as clipped.
const CLIP_LEVEL: f32 = 0.99;
/// Clipping ratio above which the output is considered clipped.
const CLIPPED_RATIO: f64 = 0.001;
/// Frames this far below the loudest frame count as silent.
const SILENCE_DB: f64 = -40.0;

/// Level and spectral statistics of a single signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStats {
    pub rms: f64,
    pub zero_crossing_rate: f64,
    /// Mean spectral centroid of non-silent frames in Hz.
    pub spectral_centroid_hz: f64,
    pub clipped_samples: usize,
    pub clipping_ratio: f64,
    /// Fraction of analysis frames more than 40 dB below the loudest frame.
    pub silence_ratio: f64,
}

impl SignalStats {
    pub fn is_clipped(&self) -> bool {
        self.clipping_ratio > CLIPPED_RATIO
    }
}

/// Comparison of an output against its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// Signal-to-noise ratio in dB; `+inf` when output equals target.
    pub snr_db: f64,
    pub mse: f64,
    /// Mean Euclidean distance between STFT magnitude frames.
    pub spectral_distance: f64,
    pub compared_samples: usize,
    pub output_samples: usize,
    pub target_samples: usize,
    /// True when the two signals differed in length and were truncated.
    pub truncated: bool,
    pub output_stats: SignalStats,
    /// Heuristic score in `[0, 1]` from the output statistics.
    pub quality_score: f64,
}

impl QualityMetrics {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Power of two analysis size for `len` samples, capped at 2048.
fn analysis_size(len: usize) -> usize {
    let mut size = ANALYSIS_FFT;
    while size > len && size > 2 {
        size /= 2;
    }
    size
}

/// Frame starts covering `len` samples with frames of `size`.
fn frame_starts(len: usize, size: usize) -> impl Iterator<Item = usize> {
    let hop = (size * ANALYSIS_HOP / ANALYSIS_FFT).max(1);
    let count = if len >= size { (len - size) / hop + 1 } else { 0 };
    (0..count).map(move |k| k * hop)
}

/// Computes level, spectral and clipping statistics for `samples`.
pub fn signal_stats(samples: &[f32], sample_rate: u32) -> SignalStats {
    if samples.is_empty() {
        return SignalStats {
            rms: 0.0,
            zero_crossing_rate: 0.0,
            spectral_centroid_hz: 0.0,
            clipped_samples: 0,
            clipping_ratio: 0.0,
            silence_ratio: 1.0,
        };
    }

    let clipped_samples = samples.iter().filter(|s| s.abs() >= CLIP_LEVEL).count();
    let size = analysis_size(samples.len());
    let starts: Vec<usize> = frame_starts(samples.len(), size).collect();

    let frame_rms: Vec<f64> = starts
        .iter()
        .map(|&s| rms(&samples[s..s + size]) as f64)
        .collect();
    let loudest = frame_rms.iter().copied().fold(0.0f64, f64::max);
    let silent = |level: f64| {
        loudest <= 0.0 || 20.0 * (level / loudest).max(1e-12).log10() < SILENCE_DB
    };
    let silence_ratio = if frame_rms.is_empty() {
        0.0
    } else {
        frame_rms.iter().filter(|&&level| silent(level)).count() as f64 / frame_rms.len() as f64
    };

    let mut analyzer = SpectrumAnalyzer::new(size, size);
    let mut centroid_sum = 0.0f64;
    let mut voiced = 0usize;
    for (&start, &level) in starts.iter().zip(&frame_rms) {
        if silent(level) {
            continue;
        }
        let mags = analyzer.magnitudes(&samples[start..start + size]);
        let total: f64 = mags.iter().map(|&m| m as f64).sum();
        if total > 0.0 {
            let weighted: f64 = mags
                .iter()
                .enumerate()
                .map(|(bin, &m)| bin_to_freq(bin, size, sample_rate) as f64 * m as f64)
                .sum();
            centroid_sum += weighted / total;
            voiced += 1;
        }
    }

    SignalStats {
        rms: rms(samples) as f64,
        zero_crossing_rate: zero_crossing_rate(samples) as f64,
        spectral_centroid_hz: if voiced > 0 {
            centroid_sum / voiced as f64
        } else {
            0.0
        },
        clipped_samples,
        clipping_ratio: clipped_samples as f64 / samples.len() as f64,
        silence_ratio,
    }
}

/// Heuristic score in `[0, 1]`: penalises clipping, mostly-silent output
/// and very low energy.
pub fn quality_score(stats: &SignalStats) -> f64 {
    let mut score = 1.0;
    if stats.is_clipped() {
        score -= 0.3 * stats.clipping_ratio;
    }
    if stats.silence_ratio > 0.5 {
        score -= 0.2;
    }
    if stats.rms < 0.01 {
        score -= 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// Mean Euclidean distance between the magnitude spectra of aligned frames.
pub fn spectral_distance(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    if len < 2 {
        return 0.0;
    }
    let size = analysis_size(len);
    let mut analyzer = SpectrumAnalyzer::new(size, size);
    let mut total = 0.0f64;
    let mut frames = 0usize;
    for start in frame_starts(len, size) {
        let mags_a = analyzer.magnitudes(&a[start..start + size]).to_vec();
        let mags_b = analyzer.magnitudes(&b[start..start + size]);
        let dist: f64 = mags_a
            .iter()
            .zip(mags_b)
            .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
            .sum::<f64>()
            .sqrt();
        total += dist;
        frames += 1;
    }
    if frames == 0 {
        0.0
    } else {
        total / frames as f64
    }
}

/// Compares `output` with `target` after mono mixdown.
///
/// The output is resampled to the target's rate when they differ, and both
/// are truncated to the shorter length. Never fails.
pub fn compare_buffers(output: &AudioBuffer, target: &AudioBuffer) -> QualityMetrics {
    let target_mono = target.to_mono();
    let sample_rate = target_mono.sample_rate();
    let out_mono = output.to_mono();
    let out_samples = resample_rate(out_mono.samples(), out_mono.sample_rate(), sample_rate);
    let tgt_samples = target_mono.samples();

    let compared = out_samples.len().min(tgt_samples.len());
    let truncated = out_samples.len() != tgt_samples.len();
    if truncated {
        log::debug!(
            "quality comparison truncated to {} samples (output {}, target {})",
            compared,
            out_samples.len(),
            tgt_samples.len()
        );
    }
    let (out, tgt) = (&out_samples[..compared], &tgt_samples[..compared]);

    let (mut signal_power, mut noise_power) = (0.0f64, 0.0f64);
    for (&o, &t) in out.iter().zip(tgt) {
        let (o, t) = (o as f64, t as f64);
        signal_power += t * t;
        noise_power += (t - o) * (t - o);
    }
    let snr_db = if noise_power == 0.0 {
        f64::INFINITY
    } else if signal_power == 0.0 {
        f64::NEG_INFINITY
    } else {
        10.0 * (signal_power / noise_power).log10()
    };
    let mse = if compared == 0 {
        0.0
    } else {
        noise_power / compared as f64
    };

    let output_stats = signal_stats(&out_samples, sample_rate);
    QualityMetrics {
        snr_db,
        mse,
        spectral_distance: spectral_distance(out, tgt),
        compared_samples: compared,
        output_samples: out_samples.len(),
        target_samples: tgt_samples.len(),
        truncated,
        quality_score: quality_score(&output_stats),
        output_stats,
    }
}

/// Compares a synthesis result with the target it imitates.
pub fn evaluate_quality(result: &SynthesisResult, target: &AudioBuffer) -> QualityMetrics {
    let metrics = compare_buffers(result.output(), target);
    log::info!(
        "quality: snr {:.2} dB, mse {:.6}, spectral distance {:.3}, score {:.2}",
        metrics.snr_db,
        metrics.mse,
        metrics.spectral_distance,
        metrics.quality_score
    );
    metrics
}
