//! Per-frame spectral and time-domain descriptors.

use crate::core::fft::bin_to_freq;

/// Fraction of spectral energy below the roll-off frequency.
const ROLLOFF_FRACTION: f32 = 0.85;

/// Power below which a frame is treated as silent.
const SILENT_POWER: f32 = 1e-12;

/// Spectral centroid, bandwidth, 85% roll-off (each normalised by Nyquist)
/// and spectral flatness of one magnitude spectrum.
///
/// Silent frames yield all zeros.
pub fn spectral_descriptors(magnitudes: &[f32], fft_size: usize, sample_rate: u32) -> [f32; 4] {
    let nyquist = sample_rate as f32 / 2.0;
    let power: Vec<f32> = magnitudes.iter().map(|m| m * m).collect();
    let total_mag: f32 = magnitudes.iter().sum();
    let total_power: f32 = power.iter().sum();
    if total_power <= SILENT_POWER || total_mag <= 0.0 {
        return [0.0; 4];
    }

    let freq = |bin: usize| bin_to_freq(bin, fft_size, sample_rate);

    let centroid = magnitudes
        .iter()
        .enumerate()
        .map(|(bin, &m)| freq(bin) * m)
        .sum::<f32>()
        / total_mag;

    let variance = magnitudes
        .iter()
        .enumerate()
        .map(|(bin, &m)| (freq(bin) - centroid).powi(2) * m)
        .sum::<f32>()
        / total_mag;
    let bandwidth = variance.max(0.0).sqrt();

    let threshold = ROLLOFF_FRACTION * total_power;
    let mut cumulative = 0.0f32;
    let mut rolloff_bin = power.len().saturating_sub(1);
    for (bin, &p) in power.iter().enumerate() {
        cumulative += p;
        if cumulative >= threshold {
            rolloff_bin = bin;
            break;
        }
    }

    [
        centroid / nyquist,
        bandwidth / nyquist,
        freq(rolloff_bin) / nyquist,
        spectral_flatness(&power),
    ]
}

/// Geometric over arithmetic mean of a power spectrum, in `[0, 1]`.
pub fn spectral_flatness(power: &[f32]) -> f32 {
    if power.is_empty() {
        return 0.0;
    }
    let n = power.len() as f64;
    let arith = power.iter().map(|&p| p as f64).sum::<f64>() / n;
    if arith <= SILENT_POWER as f64 {
        return 0.0;
    }
    let log_mean = power
        .iter()
        .map(|&p| (p as f64).max(1e-20).ln())
        .sum::<f64>()
        / n;
    (log_mean.exp() / arith).clamp(0.0, 1.0) as f32
}

/// Root-mean-square level of a frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / frame.len() as f64).sqrt() as f32
}

/// Fraction of adjacent sample pairs whose sign differs.
pub fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fft::SpectrumAnalyzer;

    #[test]
    fn test_silence_is_zero() {
        assert_eq!(spectral_descriptors(&[0.0; 129], 256, 8000), [0.0; 4]);
        assert_eq!(rms(&[0.0; 64]), 0.0);
        assert_eq!(zero_crossing_rate(&[]), 0.0);
    }

    #[test]
    fn test_tone_centroid_and_flatness() {
        let sr = 8000;
        let frame: Vec<f32> = (0..512)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sr as f32).sin())
            .collect();
        let mut analyzer = SpectrumAnalyzer::new(512, 512);
        let d = spectral_descriptors(analyzer.magnitudes(&frame), 512, sr);
        assert!((d[0] - 0.25).abs() < 0.02, "centroid {}", d[0]);
        assert!(d[1] < 0.05, "bandwidth {}", d[1]);
        assert!((d[2] - 0.25).abs() < 0.02, "rolloff {}", d[2]);
        assert!(d[3] < 0.05, "flatness {}", d[3]);
    }

    #[test]
    fn test_flat_spectrum_is_flat() {
        assert!((spectral_flatness(&[2.0; 32]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rms_of_constant() {
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_zero_crossing_alternating() {
        let frame: Vec<f32> = (0..11).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((zero_crossing_rate(&frame) - 1.0).abs() < 1e-6);
        assert_eq!(zero_crossing_rate(&[0.3; 10]), 0.0);
    }
}
