//! Frame-level feature extraction.
//!
//! A buffer is mixed to mono and cut into frames of `window_size` samples
//! every `hop_size` samples; each frame yields one fixed-size descriptor.

pub mod mel;
pub mod pitch;
pub mod spectral;

use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::fft::SpectrumAnalyzer;
use crate::core::types::{AudioBuffer, SourceId, SourceRegistry};
use crate::error::{CollageError, Result, SourceFailure};
use mel::{dct_ii, MelFilterbank};

/// Relative floor applied to mel energies before the logarithm (80 dB).
const MEL_DYNAMIC_RANGE: f32 = 1e-8;
const MEL_ABSOLUTE_FLOOR: f32 = 1e-10;

/// Kind of descriptor computed per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    /// Mel-frequency cepstral coefficients.
    Mfcc,
    /// Centroid, bandwidth, roll-off and flatness.
    Spectral,
    /// RMS level.
    Energy,
    /// Zero-crossing rate.
    ZeroCrossing,
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureType::Mfcc => "mfcc",
            FeatureType::Spectral => "spectral",
            FeatureType::Energy => "energy",
            FeatureType::ZeroCrossing => "zero_crossing",
        };
        f.write_str(name)
    }
}

/// Extraction settings, usually derived with
/// [`CollageConfig::feature_config`](crate::config::CollageConfig::feature_config).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureConfig {
    pub feature_type: FeatureType,
    pub window_size: usize,
    pub hop_size: usize,
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub estimate_pitch: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_type: FeatureType::Mfcc,
            window_size: 2048,
            hop_size: 512,
            n_mfcc: 13,
            n_mels: 40,
            estimate_pitch: false,
        }
    }
}

impl FeatureConfig {
    /// Length of every descriptor produced with this configuration.
    pub fn dimension(&self) -> usize {
        match self.feature_type {
            FeatureType::Mfcc => self.n_mfcc,
            FeatureType::Spectral => 4,
            FeatureType::Energy | FeatureType::ZeroCrossing => 1,
        }
    }

    /// Number of frames for `num_samples` samples, or 0 if the window does not fit.
    pub fn frame_count(&self, num_samples: usize) -> usize {
        if self.hop_size == 0 || num_samples < self.window_size || self.window_size == 0 {
            return 0;
        }
        (num_samples - self.window_size) / self.hop_size + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(CollageError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.hop_size == 0 {
            return Err(CollageError::InvalidConfig(
                "hop_length must be at least 1".to_string(),
            ));
        }
        if self.feature_type == FeatureType::Mfcc {
            if self.n_mels == 0 || self.n_mfcc == 0 {
                return Err(CollageError::InvalidConfig(
                    "n_mfcc and n_mels must be at least 1".to_string(),
                ));
            }
            if self.n_mfcc > self.n_mels {
                return Err(CollageError::InvalidConfig(format!(
                    "n_mfcc ({}) cannot exceed n_mels ({})",
                    self.n_mfcc, self.n_mels
                )));
            }
        }
        Ok(())
    }
}

/// Descriptor of one analysis frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub index: usize,
    /// Start of the frame in seconds.
    pub timestamp: f64,
    pub values: Vec<f32>,
    /// Fundamental frequency in Hz, when estimated and voiced.
    pub pitch_hz: Option<f32>,
}

/// Ordered frames of one buffer together with their extraction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    frames: Vec<FeatureFrame>,
    feature_type: FeatureType,
    dimension: usize,
    window_size: usize,
    hop_size: usize,
    sample_rate: u32,
    num_samples: usize,
}

impl FeatureSequence {
    #[inline]
    pub fn frames(&self) -> &[FeatureFrame] {
        &self.frames
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sample count of the analysed (mono) buffer.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// First sample covered by frame `index`.
    #[inline]
    pub fn frame_start(&self, index: usize) -> usize {
        index * self.hop_size
    }

    /// Median voiced pitch over `frames[start..end]`.
    pub fn median_pitch(&self, start: usize, end: usize) -> Option<f32> {
        let end = end.min(self.frames.len());
        let start = start.min(end);
        pitch::median_pitch(self.frames[start..end].iter().map(|f| f.pitch_hz))
    }
}

/// Per-frame descriptor computation with reusable scratch state.
enum FrameExtractor {
    Mfcc {
        analyzer: SpectrumAnalyzer,
        filterbank: MelFilterbank,
        n_mfcc: usize,
        power: Vec<f32>,
        mel: Vec<f32>,
    },
    Spectral {
        analyzer: SpectrumAnalyzer,
    },
    Energy,
    ZeroCrossing,
}

impl FrameExtractor {
    fn new(config: &FeatureConfig, sample_rate: u32) -> Self {
        let fft_size = config.window_size.next_power_of_two();
        match config.feature_type {
            FeatureType::Mfcc => FrameExtractor::Mfcc {
                analyzer: SpectrumAnalyzer::new(fft_size, config.window_size),
                filterbank: MelFilterbank::new(config.n_mels, fft_size, sample_rate),
                n_mfcc: config.n_mfcc,
                power: Vec::with_capacity(fft_size / 2 + 1),
                mel: Vec::with_capacity(config.n_mels),
            },
            FeatureType::Spectral => FrameExtractor::Spectral {
                analyzer: SpectrumAnalyzer::new(fft_size, config.window_size),
            },
            FeatureType::Energy => FrameExtractor::Energy,
            FeatureType::ZeroCrossing => FrameExtractor::ZeroCrossing,
        }
    }

    fn extract(&mut self, frame: &[f32], sample_rate: u32) -> Vec<f32> {
        match self {
            FrameExtractor::Mfcc {
                analyzer,
                filterbank,
                n_mfcc,
                power,
                mel,
            } => {
                power.clear();
                power.extend(analyzer.magnitudes(frame).iter().map(|m| m * m));
                filterbank.apply(power, mel);
                let peak = mel.iter().copied().fold(0.0f32, f32::max);
                let floor = (peak * MEL_DYNAMIC_RANGE).max(MEL_ABSOLUTE_FLOOR);
                for e in mel.iter_mut() {
                    *e = e.max(floor).ln();
                }
                dct_ii(mel, *n_mfcc)
            }
            FrameExtractor::Spectral { analyzer } => {
                let fft_size = analyzer.fft_size();
                spectral::spectral_descriptors(analyzer.magnitudes(frame), fft_size, sample_rate)
                    .to_vec()
            }
            FrameExtractor::Energy => vec![spectral::rms(frame)],
            FrameExtractor::ZeroCrossing => vec![spectral::zero_crossing_rate(frame)],
        }
    }
}

/// Extracts one descriptor per analysis frame of `buffer`.
///
/// The frame count is `floor((len - window) / hop) + 1` on the mono mixdown.
///
/// # Errors
/// [`CollageError::InvalidAudio`] if the buffer is empty or shorter than one
/// window, [`CollageError::InvalidConfig`] for unusable settings.
pub fn extract_features(buffer: &AudioBuffer, config: &FeatureConfig) -> Result<FeatureSequence> {
    config.validate()?;
    if buffer.is_empty() {
        return Err(CollageError::InvalidAudio("buffer is empty".to_string()));
    }
    let mono = buffer.to_mono();
    let samples = mono.samples();
    if config.window_size > samples.len() {
        return Err(CollageError::InvalidAudio(format!(
            "window of {} samples exceeds buffer length {}",
            config.window_size,
            samples.len()
        )));
    }

    let sample_rate = mono.sample_rate();
    let num_frames = config.frame_count(samples.len());
    let mut extractor = FrameExtractor::new(config, sample_rate);

    let frames = (0..num_frames)
        .map(|index| {
            let start = index * config.hop_size;
            let frame = &samples[start..start + config.window_size];
            FeatureFrame {
                index,
                timestamp: start as f64 / sample_rate as f64,
                values: extractor.extract(frame, sample_rate),
                pitch_hz: if config.estimate_pitch {
                    pitch::estimate_pitch(frame, sample_rate)
                } else {
                    None
                },
            }
        })
        .collect();

    Ok(FeatureSequence {
        frames,
        feature_type: config.feature_type,
        dimension: config.dimension(),
        window_size: config.window_size,
        hop_size: config.hop_size,
        sample_rate,
        num_samples: samples.len(),
    })
}

/// Extracts features for every registered source in parallel.
///
/// A source that fails is reported in the returned failure list and left out
/// of the map; the others are unaffected.
pub fn extract_sources(
    registry: &SourceRegistry,
    config: &FeatureConfig,
) -> (BTreeMap<SourceId, FeatureSequence>, Vec<SourceFailure>) {
    let entries: Vec<_> = registry.iter().collect();
    let results: Vec<(SourceId, Result<FeatureSequence>)> = entries
        .into_par_iter()
        .map(|(id, buffer)| (id.clone(), extract_features(buffer, config)))
        .collect();

    let mut sequences = BTreeMap::new();
    let mut failures = Vec::new();
    for (source_id, result) in results {
        match result {
            Ok(seq) => {
                log::debug!("extracted {} frames from source {}", seq.len(), source_id);
                sequences.insert(source_id, seq);
            }
            Err(error) => {
                log::warn!("feature extraction failed for source {}: {}", source_id, error);
                failures.push(SourceFailure { source_id, error });
            }
        }
    }
    (sequences, failures)
}
