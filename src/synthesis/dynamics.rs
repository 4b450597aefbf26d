//! Level processing: energy envelope matching and output clean-up.
//!
//! Envelopes are RMS values of `frame_len` windows centred every `hop`
//! samples, so a buffer of `n` samples has `n / hop + 1` envelope frames.

use rustfft::num_complex::Complex;

use crate::core::fft::{istft, stft};
use crate::core::resample::resample_linear;
use crate::synthesis::blend::spectral_fft_size;

const ENERGY_EPSILON: f32 = 1e-8;
/// Upper bound on the gain applied to any envelope frame.
pub const MAX_ENERGY_GAIN: f32 = 10.0;
/// Level a buffer is scaled to when energy matching pushes it past full scale.
const PEAK_GUARD: f32 = 0.99;
/// Differences beyond this many standard deviations count as clicks.
const CLICK_THRESHOLD_STD: f32 = 5.0;
const NOISE_PROFILE_SECS: f64 = 0.5;
/// Bins at or below this multiple of the noise profile are zeroed.
const NOISE_GATE_RATIO: f32 = 1.5;
const MIN_GATE_LEN: usize = 16;

/// RMS envelope of `samples`.
pub fn rms_envelope(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    let hop = hop.max(1);
    let half = frame_len.max(1) / 2;
    let num_frames = samples.len() / hop + 1;
    (0..num_frames)
        .map(|k| {
            let centre = k * hop;
            let start = centre.saturating_sub(half).min(samples.len());
            let end = (centre + half.max(1)).min(samples.len());
            let region = &samples[start..end];
            if region.is_empty() {
                0.0
            } else {
                (region.iter().map(|s| s * s).sum::<f32>() / region.len() as f32).sqrt()
            }
        })
        .collect()
}

/// Scales `material` so its RMS envelope follows `target_envelope`.
///
/// The target envelope is interpolated onto the material's frame count and
/// per-frame gains (capped at [`MAX_ENERGY_GAIN`]) are interpolated between
/// frame centres. A result peaking above full scale is scaled down to 0.99.
pub fn match_energy(
    material: &mut [f32],
    target_envelope: &[f32],
    frame_len: usize,
    hop: usize,
) {
    if material.is_empty() || target_envelope.is_empty() {
        return;
    }
    let hop = hop.max(1);
    let source = rms_envelope(material, frame_len, hop);
    let target = resample_linear(target_envelope, source.len());
    let gains: Vec<f32> = source
        .iter()
        .zip(&target)
        .map(|(s, t)| ((t + ENERGY_EPSILON) / (s + ENERGY_EPSILON)).min(MAX_ENERGY_GAIN))
        .collect();

    let last = gains.len() - 1;
    for (i, sample) in material.iter_mut().enumerate() {
        let k = (i / hop).min(last);
        let next = (k + 1).min(last);
        let frac = (i - k * hop) as f32 / hop as f32;
        *sample *= gains[k] * (1.0 - frac) + gains[next] * frac;
    }

    let peak = material.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        let scale = PEAK_GUARD / peak;
        material.iter_mut().for_each(|s| *s *= scale);
    }
}

/// Replaces isolated jumps with the mean of the samples two steps away.
///
/// A jump is a first difference larger than five standard deviations of all
/// first differences. Returns the number of samples repaired.
pub fn remove_clicks(samples: &mut [f32]) -> usize {
    if samples.len() < 3 {
        return 0;
    }
    let diffs: Vec<f32> = samples.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = diffs.iter().sum::<f32>() / diffs.len() as f32;
    let var = diffs.iter().map(|d| (d - mean) * (d - mean)).sum::<f32>() / diffs.len() as f32;
    let std = var.sqrt();
    if std <= 0.0 {
        return 0;
    }
    let threshold = CLICK_THRESHOLD_STD * std;

    let mut repaired = 0;
    for (i, d) in diffs.iter().enumerate() {
        if d.abs() <= threshold {
            continue;
        }
        let idx = i + 1;
        if idx >= 2 && idx + 2 < samples.len() {
            samples[idx] = 0.5 * (samples[idx - 2] + samples[idx + 2]);
            repaired += 1;
        }
    }
    repaired
}

/// Scales `samples` so the peak magnitude equals `level`. Returns the gain;
/// silent input is left untouched with gain 1.0.
pub fn normalize_peak(samples: &mut [f32], level: f32) -> f32 {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= 0.0 {
        return 1.0;
    }
    let gain = level / peak;
    samples.iter_mut().for_each(|s| *s *= gain);
    gain
}

/// Spectral gate using the first half second as the noise profile.
///
/// Bins whose magnitude does not exceed 1.5 times the mean profile
/// magnitude of that bin are zeroed before resynthesis.
pub fn noise_gate(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    if samples.len() < MIN_GATE_LEN {
        return samples.to_vec();
    }
    let fft_size = spectral_fft_size(samples.len());
    let hop = (fft_size / 4).max(1);
    let mut frames = stft(samples, fft_size, hop);

    let profile_frames = ((NOISE_PROFILE_SECS * sample_rate as f64 / hop as f64).ceil() as usize)
        .clamp(1, frames.len());
    let mut profile = vec![0.0f32; fft_size];
    for frame in &frames[..profile_frames] {
        for (p, bin) in profile.iter_mut().zip(frame) {
            *p += bin.norm();
        }
    }
    profile.iter_mut().for_each(|p| *p /= profile_frames as f32);

    for frame in frames.iter_mut() {
        for (bin, p) in frame.iter_mut().zip(&profile) {
            if bin.norm() <= NOISE_GATE_RATIO * p {
                *bin = Complex::new(0.0, 0.0);
            }
        }
    }
    istft(&frames, fft_size, hop, samples.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SR: u32 = 8000;

    fn sine(freq: f32, amp: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_envelope_of_constant() {
        let env = rms_envelope(&[0.5; 1000], 200, 100);
        assert_eq!(env.len(), 11);
        assert!(env.iter().all(|v| (v - 0.5).abs() < 1e-6));
        assert_eq!(rms_envelope(&[], 200, 100), vec![0.0]);
    }

    #[test]
    fn test_match_energy_follows_target() {
        let mut material = sine(440.0, 0.5, 8000);
        let mut target = sine(440.0, 0.2, 4000);
        target.extend(sine(440.0, 0.6, 4000));
        let envelope = rms_envelope(&target, 512, 128);

        match_energy(&mut material, &envelope, 512, 128);
        let quiet = rms(&material[500..3500]);
        let loud = rms(&material[4500..7500]);
        assert!((quiet - 0.2 / 2f32.sqrt()).abs() < 0.015, "quiet half rms {quiet}");
        assert!((loud - 0.6 / 2f32.sqrt()).abs() < 0.03, "loud half rms {loud}");
    }

    #[test]
    fn test_match_energy_guards_peak() {
        let mut material = sine(440.0, 0.5, 4000);
        match_energy(&mut material, &[0.9; 32], 512, 128);
        let peak = material.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= PEAK_GUARD + 1e-6, "peak {peak}");
    }

    #[test]
    fn test_match_energy_caps_gain_on_silence() {
        let mut material = vec![1e-4f32; 2000];
        match_energy(&mut material, &[0.5; 16], 256, 64);
        assert!(material.iter().all(|s| *s <= 1e-4 * MAX_ENERGY_GAIN + 1e-9));
    }

    #[test]
    fn test_click_repaired() {
        let mut signal = sine(200.0, 0.1, 2000);
        let clean = signal.clone();
        signal[1000] = 0.9;
        let repaired = remove_clicks(&mut signal);
        assert!(repaired >= 1);
        assert!((signal[1000] - clean[1000]).abs() < 0.01, "sample {}", signal[1000]);
    }

    #[test]
    fn test_smooth_signal_has_no_clicks() {
        let mut signal = sine(200.0, 0.5, 2000);
        let before = signal.clone();
        assert_eq!(remove_clicks(&mut signal), 0);
        assert_eq!(signal, before);
        assert_eq!(remove_clicks(&mut [0.0; 100]), 0);
    }

    #[test]
    fn test_normalize_peak() {
        let mut signal = vec![0.1, -0.4, 0.2];
        let gain = normalize_peak(&mut signal, 0.8);
        assert!((gain - 2.0).abs() < 1e-6);
        assert!((signal[1] + 0.8).abs() < 1e-6);

        let mut silent = vec![0.0; 10];
        assert_eq!(normalize_peak(&mut silent, 0.9), 1.0);
        assert!(silent.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_noise_gate_quiets_noise_keeps_tone() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut signal: Vec<f32> = (0..SR as usize).map(|_| rng.gen_range(-0.01..0.01)).collect();
        let tone = sine(1000.0, 0.5, SR as usize);
        let noisy_tone: Vec<f32> = tone.iter().map(|s| s + rng.gen_range(-0.01..0.01)).collect();
        signal.extend(&noisy_tone);

        let gated = noise_gate(&signal, SR);
        assert_eq!(gated.len(), signal.len());
        assert!(rms(&gated[500..6000]) < 0.85 * rms(&signal[500..6000]));
        let kept = rms(&gated[10000..15000]);
        assert!((kept - rms(&tone[2000..7000])).abs() < 0.02, "tone rms {kept}");
    }

    #[test]
    fn test_noise_gate_short_input_unchanged() {
        let short = vec![0.3; 8];
        assert_eq!(noise_gate(&short, SR), short);
    }
}
