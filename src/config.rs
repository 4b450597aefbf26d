//! Configuration for the collage pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{CollageError, Result};
use crate::features::{FeatureConfig, FeatureType};
use crate::selection::GapPolicy;
use crate::similarity::DistanceMetric;
use crate::synthesis::BlendAlgorithm;

/// Options shared by every stage of the pipeline.
///
/// Missing fields take their default value when deserialized, so a host can
/// load a partial configuration from any serde format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollageConfig {
    /// Descriptor computed per analysis frame (default: MFCC).
    pub feature_type: FeatureType,
    /// Analysis window in samples (default: 2048).
    pub window_size: usize,
    /// Hop between analysis frames in samples (default: 512).
    pub hop_length: usize,
    /// Number of MFCC coefficients (default: 13).
    pub n_mfcc: usize,
    /// Number of mel bands feeding the MFCC DCT (default: 40).
    pub n_mels: usize,
    /// Estimate a per-frame pitch during extraction (default: false).
    pub estimate_pitch: bool,
    /// Target frames per matching window (default: 8).
    pub match_window_frames: usize,
    /// Frame stride when scanning source positions; 1 is exhaustive.
    pub source_stride: usize,
    /// Candidates kept per target window (default: 5).
    pub top_k: usize,
    /// Sequence comparator (default: Euclidean).
    pub distance_metric: DistanceMetric,
    /// Minimum similarity in `[0, 1]` for a candidate to survive (default: 0.5).
    pub similarity_threshold: f64,
    /// Times the same source segment may appear in one timeline (default: 3).
    pub max_source_reuse: usize,
    /// Shortest usable segment in seconds (default: 0.05).
    pub min_segment_duration: f64,
    /// What to do with windows that have no eligible candidate.
    pub gap_policy: GapPolicy,
    /// Allowed difference between timeline length and target length.
    pub gap_tolerance_samples: usize,
    /// Crossfade between adjacent slots in seconds (default: 0.02).
    pub crossfade_duration: f64,
    /// Crossfade curve (default: equal power).
    pub blend_algorithm: BlendAlgorithm,
    /// Maximum number of transformed segments kept in the cache (default: 128).
    pub cache_capacity: usize,
    /// Pitch-shift matched segments towards the target's pitch (default: false).
    pub adjust_pitch: bool,
    /// Upper bound on the pitch correction magnitude (default: 12 semitones).
    pub max_pitch_shift_semitones: f64,
    /// Seed for the random gap baseline (default: 42).
    pub seed: u64,
    /// Scale each rendered segment's RMS envelope to the target's (default: false).
    pub match_energy: bool,
    /// Spectral gate on the output, profiled on its first half second (default: false).
    pub noise_gate: bool,
    /// Repair isolated sample jumps in the output (default: false).
    pub remove_clicks: bool,
    /// Peak level the output is normalized to, if any (default: none).
    pub normalize_level: Option<f32>,
}

impl Default for CollageConfig {
    fn default() -> Self {
        Self {
            feature_type: FeatureType::Mfcc,
            window_size: 2048,
            hop_length: 512,
            n_mfcc: 13,
            n_mels: 40,
            estimate_pitch: false,
            match_window_frames: 8,
            source_stride: 1,
            top_k: 5,
            distance_metric: DistanceMetric::Euclidean,
            similarity_threshold: 0.5,
            max_source_reuse: 3,
            min_segment_duration: 0.05,
            gap_policy: GapPolicy::Silence,
            gap_tolerance_samples: 0,
            crossfade_duration: 0.02,
            blend_algorithm: BlendAlgorithm::EqualPower,
            cache_capacity: 128,
            adjust_pitch: false,
            max_pitch_shift_semitones: 12.0,
            seed: 42,
            match_energy: false,
            noise_gate: false,
            remove_clicks: false,
            normalize_level: None,
        }
    }
}

impl CollageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature_type(mut self, feature_type: FeatureType) -> Self {
        self.feature_type = feature_type;
        self
    }

    /// Sets the analysis window and hop, both in samples.
    pub fn with_framing(mut self, window_size: usize, hop_length: usize) -> Self {
        self.window_size = window_size;
        self.hop_length = hop_length;
        self
    }

    pub fn with_match_window_frames(mut self, frames: usize) -> Self {
        self.match_window_frames = frames;
        self
    }

    pub fn with_source_stride(mut self, stride: usize) -> Self {
        self.source_stride = stride;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_source_reuse(mut self, max_reuse: usize) -> Self {
        self.max_source_reuse = max_reuse;
        self
    }

    pub fn with_min_segment_duration(mut self, seconds: f64) -> Self {
        self.min_segment_duration = seconds;
        self
    }

    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    pub fn with_gap_tolerance(mut self, samples: usize) -> Self {
        self.gap_tolerance_samples = samples;
        self
    }

    pub fn with_crossfade_duration(mut self, seconds: f64) -> Self {
        self.crossfade_duration = seconds;
        self
    }

    pub fn with_blend_algorithm(mut self, algorithm: BlendAlgorithm) -> Self {
        self.blend_algorithm = algorithm;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Enables pitch estimation and pitch correction together.
    pub fn with_pitch_adjustment(mut self, max_semitones: f64) -> Self {
        self.adjust_pitch = true;
        self.estimate_pitch = true;
        self.max_pitch_shift_semitones = max_semitones;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Scales rendered segments to follow the target's loudness envelope.
    pub fn with_energy_matching(mut self, enabled: bool) -> Self {
        self.match_energy = enabled;
        self
    }

    pub fn with_noise_gate(mut self, enabled: bool) -> Self {
        self.noise_gate = enabled;
        self
    }

    pub fn with_click_removal(mut self, enabled: bool) -> Self {
        self.remove_clicks = enabled;
        self
    }

    /// Normalizes the output peak to `level` (in `(0, 1]`).
    pub fn with_normalization(mut self, level: f32) -> Self {
        self.normalize_level = Some(level);
        self
    }

    /// Feature extraction settings derived from this configuration.
    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            feature_type: self.feature_type,
            window_size: self.window_size,
            hop_size: self.hop_length,
            n_mfcc: self.n_mfcc,
            n_mels: self.n_mels,
            estimate_pitch: self.estimate_pitch || self.adjust_pitch,
        }
    }

    /// Shortest usable segment at the given sample rate.
    pub fn min_segment_samples(&self, sample_rate: u32) -> usize {
        (self.min_segment_duration * sample_rate as f64).round() as usize
    }

    /// Crossfade length at the given sample rate, before per-boundary clamping.
    pub fn crossfade_samples(&self, sample_rate: u32) -> usize {
        (self.crossfade_duration * sample_rate as f64).round() as usize
    }

    /// Checks every option for range errors.
    ///
    /// # Errors
    /// [`CollageError::CacheCapacity`] for a zero cache capacity, otherwise
    /// [`CollageError::InvalidConfig`] naming the offending option.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(CollageError::CacheCapacity(0));
        }
        self.feature_config().validate()?;
        if self.match_window_frames == 0 {
            return Err(invalid("match_window_frames must be at least 1"));
        }
        if self.source_stride == 0 {
            return Err(invalid("source_stride must be at least 1"));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(invalid(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.max_source_reuse == 0 {
            return Err(invalid("max_source_reuse must be at least 1"));
        }
        if !self.min_segment_duration.is_finite() || self.min_segment_duration < 0.0 {
            return Err(invalid(format!(
                "min_segment_duration must be non-negative, got {}",
                self.min_segment_duration
            )));
        }
        if !self.crossfade_duration.is_finite() || self.crossfade_duration < 0.0 {
            return Err(invalid(format!(
                "crossfade_duration must be non-negative, got {}",
                self.crossfade_duration
            )));
        }
        if !self.max_pitch_shift_semitones.is_finite() || self.max_pitch_shift_semitones < 0.0 {
            return Err(invalid(format!(
                "max_pitch_shift_semitones must be non-negative, got {}",
                self.max_pitch_shift_semitones
            )));
        }
        if let Some(level) = self.normalize_level {
            if !(level > 0.0 && level <= 1.0) {
                return Err(invalid(format!(
                    "normalize_level must be within (0, 1], got {}",
                    level
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> CollageError {
    CollageError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CollageConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_cache_capacity() {
        let config = CollageConfig::default().with_cache_capacity(0);
        assert_eq!(config.validate(), Err(CollageError::CacheCapacity(0)));
    }

    #[test]
    fn test_invalid_values() {
        let bad = [
            CollageConfig::default().with_framing(0, 512),
            CollageConfig::default().with_framing(1024, 0),
            CollageConfig::default().with_top_k(0),
            CollageConfig::default().with_similarity_threshold(1.5),
            CollageConfig::default().with_similarity_threshold(f64::NAN),
            CollageConfig::default().with_crossfade_duration(-0.1),
            CollageConfig::default().with_max_source_reuse(0),
            CollageConfig::default().with_normalization(0.0),
            CollageConfig::default().with_normalization(1.2),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(CollageError::InvalidConfig(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn test_sample_conversions() {
        let config = CollageConfig::default()
            .with_min_segment_duration(0.1)
            .with_crossfade_duration(0.01);
        assert_eq!(config.min_segment_samples(22050), 2205);
        assert_eq!(config.crossfade_samples(44100), 441);
    }

    #[test]
    fn test_pitch_adjustment_enables_estimation() {
        let config = CollageConfig::default().with_pitch_adjustment(6.0);
        assert!(config.feature_config().estimate_pitch);
        assert_eq!(config.max_pitch_shift_semitones, 6.0);
    }

    #[test]
    fn test_output_stages_default_off() {
        let config = CollageConfig::default();
        assert!(!config.match_energy && !config.noise_gate && !config.remove_clicks);
        assert_eq!(config.normalize_level, None);
        let json: CollageConfig =
            serde_json::from_str(r#"{"match_energy": true, "normalize_level": 0.9}"#).unwrap();
        assert!(json.match_energy);
        assert_eq!(json.normalize_level, Some(0.9));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CollageConfig = serde_json::from_str(
            r#"{"top_k": 3, "gap_policy": "hold_previous", "blend_algorithm": "spectral"}"#,
        )
        .unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.gap_policy, GapPolicy::HoldPrevious);
        assert_eq!(config.blend_algorithm, BlendAlgorithm::Spectral);
        assert_eq!(config.window_size, 2048);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CollageConfig::default()
            .with_distance_metric(DistanceMetric::Dtw)
            .with_seed(7);
        let json = serde_json::to_string(&config).unwrap();
        let back: CollageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
